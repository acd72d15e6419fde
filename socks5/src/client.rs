use std::io::{Error as IoError, ErrorKind};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec;
use crate::proto::*;
use crate::reassembler::Reassembler;
use crate::stream::Socks5Stream;
use crate::{Action, Error, Result};

/// Connect to `address:port` through the SOCKS5 proxy at `socks5`, without
/// authentication.
pub async fn connect<A: ToSocketAddrs>(
    socks5: A,
    address: Address,
    port: u16,
) -> Result<Socks5Stream<TcpStream>> {
    Connector::new().connect(socks5, address, port).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    SendMethodNegotiation,
    AwaitMethodSelection,
    AwaitAuthReply,
    SendConnectRequest,
    AwaitConnectReply,
    Established,
    Failed,
}

/// Client side of a SOCKS5 handshake, independent of any socket.
///
/// Call [`ClientHandshake::start`] once the transport to the proxy is up
/// and send what it returns, then pass every chunk read from the proxy to
/// [`ClientHandshake::handshake`] until the returned [`Action`] is
/// `finished`.
#[derive(Debug)]
pub struct ClientHandshake {
    state: State,
    input: Reassembler,
    address: Address,
    port: u16,
    credentials: Option<Credentials>,
    method: Option<Method>,
    bind: Option<(Address, u16)>,
    queued: Vec<u8>,
}

impl ClientHandshake {
    /// `address:port` is the final destination, not the proxy.
    pub fn new(address: Address, port: u16, credentials: Option<Credentials>) -> Result<Self> {
        if port == 0 {
            return Err(Error::InvalidRequest("invalid destination port 0".into()));
        }
        Ok(Self {
            state: State::SendMethodNegotiation,
            input: Reassembler::new(),
            address,
            port,
            credentials,
            method: None,
            bind: None,
            queued: Vec::new(),
        })
    }

    /// Produce the method negotiation message.
    pub fn start(&mut self) -> Result<Action> {
        if self.state != State::SendMethodNegotiation {
            return Err(Error::Internal("handshake already started"));
        }
        self.state = State::AwaitMethodSelection;
        let auth = self.credentials.is_some();
        Ok(Action::reply(codec::encode_method_negotiation(auth)))
    }

    /// Advance the handshake with bytes read from the proxy.
    ///
    /// Any error is fatal: the handshake moves to its failed state and
    /// drops queued writes.
    pub fn handshake(&mut self, input: &[u8]) -> Result<Action> {
        match self.advance(input) {
            Ok(action) => Ok(action),
            Err(e) => {
                if self.state != State::Established {
                    self.state = State::Failed;
                    self.queued.clear();
                    self.input.clear();
                }
                Err(e)
            }
        }
    }

    fn advance(&mut self, input: &[u8]) -> Result<Action> {
        let mut action = Action::default();

        match self.state {
            State::AwaitMethodSelection => {
                let method = match self.input.feed(input, codec::parse_method_selection)? {
                    Some(m) => m,
                    None => return Ok(action),
                };
                debug!("socks5: proxy selected method {:#04x}", method.0);
                self.method = Some(method);

                match (method, &self.credentials) {
                    (Method::USERNAME_PASSWORD, Some(c)) => {
                        action.reply =
                            codec::encode_username_password_request(c.username(), c.password())?;
                        self.state = State::AwaitAuthReply;
                    }
                    (Method::NO_AUTH, _) => self.state = State::SendConnectRequest,
                    _ => return Err(Error::UnsupportedMethod),
                }
            }
            State::AwaitAuthReply => {
                match self.input.feed(input, codec::parse_username_password_reply)? {
                    Some(true) => self.state = State::SendConnectRequest,
                    Some(false) => return Err(Error::AuthenticationFailed),
                    None => return Ok(action),
                }
            }
            State::AwaitConnectReply => {
                let reply = match self.input.feed(input, codec::parse_connect_reply)? {
                    Some(r) => r,
                    None => return Ok(action),
                };
                if reply.reply != Reply::SUCCEEDED {
                    return Err(Error::ProxyReply(reply.reply));
                }

                self.bind = reply.bind;
                self.state = State::Established;
                action.reply = std::mem::take(&mut self.queued);
                action.finished = true;
            }
            State::Established | State::Failed => return Err(Error::AlreadyFinished),
            State::SendMethodNegotiation | State::SendConnectRequest => {
                return Err(Error::Internal("handshake not started"))
            }
        }

        if self.state == State::SendConnectRequest {
            debug!("socks5: requesting {}:{}", self.address, self.port);
            let request = codec::encode_connect_request(&self.address, self.port);
            action.reply.extend_from_slice(&request);
            self.state = State::AwaitConnectReply;
        }

        Ok(action)
    }

    /// Queue application data until the handshake is established. It is
    /// emitted, in order, by the call to [`ClientHandshake::handshake`] that
    /// completes the handshake.
    pub fn queue_write(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            State::Established | State::Failed => Err(Error::AlreadyFinished),
            _ => {
                self.queued.extend_from_slice(data);
                Ok(())
            }
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Method the proxy selected, once known.
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn bind_addr(&self) -> Option<&(Address, u16)> {
        self.bind.as_ref()
    }

    /// Bytes received after the connect reply. They belong to the
    /// application stream.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        self.input.take_pending()
    }
}

/// Builder for client connections through a SOCKS5 proxy.
#[derive(Clone, Debug, Default)]
pub struct Connector {
    credentials: Option<Credentials>,
    early_data: Vec<u8>,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer username/password authentication as well as no
    /// authentication.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Data written right after the handshake completes, before
    /// [`Connector::connect`] returns.
    pub fn early_data(mut self, data: &[u8]) -> Self {
        self.early_data.extend_from_slice(data);
        self
    }

    pub async fn connect<A: ToSocketAddrs>(
        self,
        socks5: A,
        address: Address,
        port: u16,
    ) -> Result<Socks5Stream<TcpStream>> {
        let mut handshake = ClientHandshake::new(address, port, self.credentials.clone())?;
        let stream = TcpStream::connect(socks5).await?;
        if !self.early_data.is_empty() {
            handshake.queue_write(&self.early_data)?;
        }
        drive(stream, handshake).await
    }

    /// Run the handshake over an already connected transport, such as a
    /// TLS stream to the proxy.
    pub async fn handshake<S>(
        self,
        stream: S,
        address: Address,
        port: u16,
    ) -> Result<Socks5Stream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut handshake = ClientHandshake::new(address, port, self.credentials)?;
        if !self.early_data.is_empty() {
            handshake.queue_write(&self.early_data)?;
        }
        drive(stream, handshake).await
    }
}

async fn drive<S>(mut stream: S, mut handshake: ClientHandshake) -> Result<Socks5Stream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let action = handshake.start()?;
    stream.write_all(&action.reply).await?;

    let mut buf = [0u8; 1024];
    loop {
        let size = stream.read(&mut buf).await?;
        if size == 0 {
            return Err(Error::Transport(IoError::new(
                ErrorKind::UnexpectedEof,
                "socks5: proxy closed during handshake",
            )));
        }

        let action = handshake.handshake(&buf[..size])?;
        if !action.reply.is_empty() {
            stream.write_all(&action.reply).await?;
        }
        if action.finished {
            break;
        }
    }

    let leftover = handshake.take_leftover();
    let bind = handshake.bind.take();
    Ok(Socks5Stream::new(stream, leftover, bind))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::*;

    fn target() -> ClientHandshake {
        ClientHandshake::new("example.com".parse().unwrap(), 443, None).unwrap()
    }

    fn with_auth() -> ClientHandshake {
        let creds = Credentials::new("u", "p").unwrap();
        ClientHandshake::new("example.com".parse().unwrap(), 443, Some(creds)).unwrap()
    }

    fn ok_reply() -> Vec<u8> {
        encode_connect_reply(true, &"10.0.0.1".parse().unwrap(), 5555)
    }

    #[test]
    fn no_auth() {
        let mut hs = target();
        assert_eq!(hs.start().unwrap().reply, [5, 1, 0]);

        let action = hs.handshake(&[5, 0]).unwrap();
        assert!(!action.finished);
        assert_eq!(
            action.reply,
            encode_connect_request(&"example.com".parse().unwrap(), 443)
        );

        let action = hs.handshake(&ok_reply()).unwrap();
        assert!(action.finished);
        assert!(action.reply.is_empty());
        assert!(hs.is_established());
        assert_eq!(hs.method(), Some(Method::NO_AUTH));
        assert_eq!(
            hs.bind_addr(),
            Some(&("10.0.0.1".parse().unwrap(), 5555))
        );
    }

    #[test]
    fn username_password() {
        let mut hs = with_auth();
        assert_eq!(hs.start().unwrap().reply, [5, 2, 2, 0]);

        let action = hs.handshake(&[5, 2]).unwrap();
        assert_eq!(action.reply, [1, 1, b'u', 1, b'p']);

        let action = hs.handshake(&[1, 0]).unwrap();
        assert_eq!(action.reply[..4], [5, 1, 0, 3]);

        assert!(hs.handshake(&ok_reply()).unwrap().finished);
    }

    #[test]
    fn credentials_but_no_auth_selected() {
        let mut hs = with_auth();
        hs.start().unwrap();
        let action = hs.handshake(&[5, 0]).unwrap();
        assert_eq!(action.reply[..4], [5, 1, 0, 3]);
    }

    #[test]
    fn authentication_failed() {
        let mut hs = with_auth();
        hs.start().unwrap();
        hs.handshake(&[5, 2]).unwrap();
        let e = hs.handshake(&[1, 0xFF]);
        assert!(matches!(e, Err(Error::AuthenticationFailed)));
        assert!(hs.is_failed());
        assert!(matches!(hs.handshake(&[]), Err(Error::AlreadyFinished)));
    }

    #[test]
    fn unsupported_method() {
        let mut hs = target();
        hs.start().unwrap();
        // GSSAPI is never acceptable.
        let e = hs.handshake(&[5, 1]);
        assert!(matches!(e, Err(Error::UnsupportedMethod)));

        // Username/password without configured credentials.
        let mut hs = target();
        hs.start().unwrap();
        let e = hs.handshake(&[5, 2]);
        assert!(matches!(e, Err(Error::UnsupportedMethod)));

        let mut hs = target();
        hs.start().unwrap();
        let e = hs.handshake(&[5, 0xFF]);
        assert!(matches!(e, Err(Error::UnsupportedMethod)));
    }

    #[test]
    fn proxy_reply_error() {
        let mut hs = target();
        hs.start().unwrap();
        hs.handshake(&[5, 0]).unwrap();

        let reply = encode_reply(Reply::HOST_UNREACHABLE, &Address::unspecified(), 0);
        let e = hs.handshake(&reply).unwrap_err();
        assert!(matches!(e, Error::ProxyReply(Reply::HOST_UNREACHABLE)));
        assert_eq!(e.to_string(), "socks5 reply host unreachable");
    }

    #[test]
    fn split_replies() {
        let mut hs = with_auth();
        hs.start().unwrap();

        assert!(hs.handshake(&[5]).unwrap().reply.is_empty());
        assert!(!hs.handshake(&[2]).unwrap().reply.is_empty());
        assert!(hs.handshake(&[1]).unwrap().reply.is_empty());
        assert!(!hs.handshake(&[0]).unwrap().reply.is_empty());

        let reply = ok_reply();
        for b in &reply[..reply.len() - 1] {
            let action = hs.handshake(&[*b]).unwrap();
            assert!(!action.finished);
        }
        assert!(hs.handshake(&reply[reply.len() - 1..]).unwrap().finished);
    }

    #[test]
    fn queued_writes() {
        let mut hs = target();
        hs.queue_write(b"Hel").unwrap();
        hs.start().unwrap();
        hs.queue_write(b"lo").unwrap();

        let action = hs.handshake(&[5, 0]).unwrap();
        assert!(!action.reply.ends_with(b"Hello"));

        let action = hs.handshake(&ok_reply()).unwrap();
        assert_eq!(action.reply, b"Hello");
        assert!(matches!(
            hs.queue_write(b"more"),
            Err(Error::AlreadyFinished)
        ));
    }

    #[test]
    fn queued_writes_dropped_on_failure() {
        let mut hs = target();
        hs.start().unwrap();
        hs.queue_write(b"Hello").unwrap();
        hs.handshake(&[5, 0]).unwrap();
        assert!(hs.handshake(&[5, 1, 0, 1, 0]).is_err());
        assert!(hs.queued.is_empty());
    }

    #[test]
    fn leftover_after_reply() {
        let mut hs = target();
        hs.start().unwrap();
        hs.handshake(&[5, 0]).unwrap();

        let mut input = ok_reply();
        input.extend_from_slice(b"banner");
        assert!(hs.handshake(&input).unwrap().finished);
        assert_eq!(hs.take_leftover(), b"banner");
    }

    #[test]
    fn bad_version() {
        let mut hs = target();
        hs.start().unwrap();
        assert!(matches!(
            hs.handshake(&[4, 0]),
            Err(Error::ProtocolVersion(4))
        ));
    }

    #[test]
    fn misuse() {
        assert!(matches!(
            ClientHandshake::new(Address::unspecified(), 0, None),
            Err(Error::InvalidRequest(_))
        ));

        let mut hs = target();
        assert!(matches!(hs.handshake(&[5, 0]), Err(Error::Internal(_))));

        let mut hs = target();
        hs.start().unwrap();
        assert!(matches!(hs.start(), Err(Error::Internal(_))));
    }
}
