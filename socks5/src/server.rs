use std::io::{Error as IoError, ErrorKind};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec;
use crate::proto::*;
use crate::reassembler::Reassembler;
use crate::stream::Socks5Stream;
use crate::{Action, Error, Result};

/// Run the server side of the handshake on a freshly accepted connection.
///
/// On failure, whatever error reply the protocol defines is sent and the
/// connection is shut down before the error is returned.
pub async fn accept<S>(mut stream: S) -> Result<Incoming<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = ServerHandshake::new();
    let mut buf = [0u8; 1024];

    loop {
        let size = stream.read(&mut buf).await?;
        if size == 0 {
            return Err(Error::Transport(IoError::new(
                ErrorKind::UnexpectedEof,
                "socks5: client closed during handshake",
            )));
        }

        match handshake.handshake(&buf[..size]) {
            Ok(action) => {
                if !action.reply.is_empty() {
                    stream.write_all(&action.reply).await?;
                }
                if action.finished {
                    break;
                }
            }
            Err(e) => {
                if let Some(reply) = handshake.take_failure_reply() {
                    let _ = stream.write_all(&reply).await;
                }
                let _ = stream.shutdown().await;
                return Err(e);
            }
        }
    }

    let leftover = handshake.take_leftover();
    let request = handshake
        .into_request()
        .ok_or(Error::Internal("established without a request"))?;
    Ok(Incoming::new(stream, request, leftover))
}

/// What a client asked for, once its handshake has succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    address: Address,
    port: u16,
    credentials: Option<Credentials>,
}

impl Request {
    pub fn destination(&self) -> &Address {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username/password the client authenticated with. They are recorded
    /// as sent; deciding whether to accept them is up to the caller.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username())
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.password())
    }
}

/// An accepted connection that finished its handshake.
#[derive(Debug)]
pub struct Incoming<S> {
    stream: S,
    request: Request,
    leftover: Vec<u8>,
}

impl<S> Incoming<S> {
    fn new(stream: S, request: Request, leftover: Vec<u8>) -> Self {
        Self {
            stream,
            request,
            leftover,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The client stream, replaying any bytes it pipelined after its
    /// request.
    pub fn into_stream(self) -> Socks5Stream<S> {
        Socks5Stream::new(self.stream, self.leftover, None)
    }

    pub fn into_parts(self) -> (Request, Socks5Stream<S>) {
        let stream = Socks5Stream::new(self.stream, self.leftover, None);
        (self.request, stream)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    AwaitMethodMessage,
    AwaitAuthMessage,
    AwaitConnectRequest,
    Established,
    Failed,
}

/// Server side of a SOCKS5 handshake, independent of any socket.
///
/// Feed every chunk read from the client to
/// [`ServerHandshake::handshake`] and write back the returned replies until
/// the action is `finished`. If it fails, send
/// [`ServerHandshake::take_failure_reply`] before closing.
#[derive(Debug)]
pub struct ServerHandshake {
    state: State,
    input: Reassembler,
    method: Option<Method>,
    credentials: Option<Credentials>,
    request: Option<Request>,
    error_reply: Option<Vec<u8>>,
    failure_reply: Option<Vec<u8>>,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self {
            state: State::AwaitMethodMessage,
            input: Reassembler::new(),
            method: None,
            credentials: None,
            request: None,
            error_reply: None,
            failure_reply: None,
        }
    }

    /// Advance the handshake with bytes read from the client. Several
    /// pipelined messages in one chunk are all handled by one call.
    pub fn handshake(&mut self, input: &[u8]) -> Result<Action> {
        let mut action = Action::default();
        let mut chunk = input;

        loop {
            match self.step(chunk) {
                Ok(Some(reply)) => action.reply.extend_from_slice(&reply),
                Ok(None) => return Ok(action),
                Err(e) => {
                    if self.state != State::Established && self.state != State::Failed {
                        self.state = State::Failed;
                        let mut reply = std::mem::take(&mut action.reply);
                        if let Some(error_reply) = self.error_reply.take() {
                            reply.extend_from_slice(&error_reply);
                        }
                        if !reply.is_empty() {
                            self.failure_reply = Some(reply);
                        }
                        self.input.clear();
                    }
                    return Err(e);
                }
            }

            if self.state == State::Established {
                action.finished = true;
                return Ok(action);
            }
            if self.input.is_empty() {
                return Ok(action);
            }
            chunk = &[];
        }
    }

    /// Handle at most one message. `None` means more input is needed.
    fn step(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.state {
            State::AwaitMethodMessage => {
                let methods = match self.input.feed(input, codec::parse_method_negotiation)? {
                    Some(m) => m,
                    None => return Ok(None),
                };

                // Prefer username/password, then none.
                let method = if methods.contains(&Method::USERNAME_PASSWORD) {
                    self.state = State::AwaitAuthMessage;
                    Method::USERNAME_PASSWORD
                } else if methods.contains(&Method::NO_AUTH) {
                    self.state = State::AwaitConnectRequest;
                    Method::NO_AUTH
                } else {
                    self.error_reply = Some(codec::encode_method_selection(Method::NO_ACCEPTABLE));
                    return Err(Error::UnsupportedMethod);
                };

                debug!("socks5: selected method {:#04x}", method.0);
                self.method = Some(method);
                Ok(Some(codec::encode_method_selection(method)))
            }
            State::AwaitAuthMessage => {
                let credentials =
                    match self.input.feed(input, codec::parse_username_password_request) {
                        Ok(Some(c)) => c,
                        Ok(None) => return Ok(None),
                        Err(e) => {
                            self.error_reply = Some(codec::encode_username_password_reply(false));
                            return Err(e);
                        }
                    };

                self.credentials = Some(credentials);
                self.state = State::AwaitConnectRequest;
                Ok(Some(codec::encode_username_password_reply(true)))
            }
            State::AwaitConnectRequest => {
                let request = match self.input.feed(input, codec::parse_connect_request) {
                    Ok(Some(r)) => r,
                    Ok(None) => return Ok(None),
                    Err(e) => {
                        let reply = match e {
                            Error::InvalidRequest(_) => Reply::ADDRTYPE_NOT_SUPPORTED,
                            _ => Reply::GENERAL_FAILURE,
                        };
                        self.error_reply = Some(failure(reply));
                        return Err(e);
                    }
                };

                if request.command != Command::CONNECT {
                    self.error_reply = Some(failure(Reply::COMMAND_NOT_SUPPORTED));
                    return Err(Error::InvalidRequest(format!(
                        "command not supported: {}",
                        request.command.0
                    )));
                }

                debug!("socks5: request {}:{}", request.address, request.port);
                self.request = Some(Request {
                    address: request.address,
                    port: request.port,
                    credentials: self.credentials.take(),
                });
                self.state = State::Established;

                // The bound address is not reported.
                let reply = codec::encode_connect_reply(true, &Address::unspecified(), 0);
                Ok(Some(reply))
            }
            State::Established | State::Failed => Err(Error::AlreadyFinished),
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// Request of a finished handshake.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn into_request(self) -> Option<Request> {
        self.request
    }

    /// Bytes to send the client before closing a failed handshake.
    pub fn take_failure_reply(&mut self) -> Option<Vec<u8>> {
        self.failure_reply.take()
    }

    /// Bytes the client sent after its request.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        self.input.take_pending()
    }
}

fn failure(reply: Reply) -> Vec<u8> {
    codec::encode_reply(reply, &Address::unspecified(), 0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::*;

    const SUCCESS: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

    fn request(host: &str, port: u16) -> Vec<u8> {
        encode_connect_request(&host.parse().unwrap(), port)
    }

    #[test]
    fn no_auth() {
        let mut hs = ServerHandshake::new();

        let action = hs.handshake(&[5, 1, 0]).unwrap();
        assert_eq!(action.reply, [5, 0]);
        assert!(!action.finished);

        let action = hs.handshake(&request("192.168.0.1", 1234)).unwrap();
        assert_eq!(action.reply, SUCCESS);
        assert!(action.finished);
        assert!(hs.is_established());

        let req = hs.into_request().unwrap();
        assert_eq!(req.destination().to_string(), "192.168.0.1");
        assert_eq!(req.port(), 1234);
        assert_eq!(req.username(), None);
    }

    #[test]
    fn prefers_username_password() {
        let mut hs = ServerHandshake::new();
        let action = hs.handshake(&[5, 2, 0, 2]).unwrap();
        assert_eq!(action.reply, [5, 2]);
        assert_eq!(hs.method(), Some(Method::USERNAME_PASSWORD));

        let auth = encode_username_password_request("u", "p").unwrap();
        let action = hs.handshake(&auth).unwrap();
        assert_eq!(action.reply, [1, 0]);

        let action = hs.handshake(&request("example.com", 80)).unwrap();
        assert!(action.finished);

        let req = hs.request().unwrap();
        assert_eq!(req.username(), Some("u"));
        assert_eq!(req.password(), Some("p"));
        assert_eq!(req.destination().to_string(), "example.com");
    }

    #[test]
    fn skips_unknown_methods() {
        let mut hs = ServerHandshake::new();
        let action = hs.handshake(&[5, 3, 0x01, 0x80, 0]).unwrap();
        assert_eq!(action.reply, [5, 0]);
    }

    #[test]
    fn no_acceptable_method() {
        let mut hs = ServerHandshake::new();
        let e = hs.handshake(&[5, 1, 0x01]);
        assert!(matches!(e, Err(Error::UnsupportedMethod)));
        assert!(hs.is_failed());
        assert_eq!(hs.take_failure_reply(), Some(vec![5, 0xFF]));
        assert!(matches!(hs.handshake(&[5]), Err(Error::AlreadyFinished)));
    }

    #[test]
    fn bind_rejected() {
        let mut hs = ServerHandshake::new();
        hs.handshake(&[5, 1, 0]).unwrap();

        let mut req = request("192.168.0.1", 1234);
        req[1] = Command::BIND.0;
        let e = hs.handshake(&req);
        assert!(matches!(e, Err(Error::InvalidRequest(_))));
        assert_eq!(
            hs.take_failure_reply(),
            Some(vec![5, 7, 0, 1, 0, 0, 0, 0, 0, 0])
        );
        assert!(hs.into_request().is_none());
    }

    #[test]
    fn bad_address_type() {
        let mut hs = ServerHandshake::new();
        hs.handshake(&[5, 1, 0]).unwrap();
        let e = hs.handshake(&[5, 1, 0, 2, 1, 2, 3]);
        assert!(matches!(e, Err(Error::InvalidRequest(_))));
        assert_eq!(hs.take_failure_reply().unwrap()[1], 8);
    }

    #[test]
    fn bad_version() {
        let mut hs = ServerHandshake::new();
        let e = hs.handshake(&[4, 1, 0, 80, 127, 0, 0, 1, 0]);
        assert!(matches!(e, Err(Error::ProtocolVersion(4))));
        assert_eq!(hs.take_failure_reply(), None);
    }

    #[test]
    fn empty_credentials() {
        for auth in [&[1, 0, 0][..], &[1, 1, b'u', 0], &[1, 0, 1, b'p']] {
            let mut hs = ServerHandshake::new();
            hs.handshake(&[5, 1, 2]).unwrap();
            let e = hs.handshake(auth);
            assert!(matches!(e, Err(Error::InvalidCredentials)));
            assert!(hs.is_failed());
            assert_eq!(hs.take_failure_reply(), Some(vec![1, 0xFF]));
            assert!(hs.request().is_none());
        }
    }

    #[test]
    fn bad_auth_version() {
        let mut hs = ServerHandshake::new();
        hs.handshake(&[5, 1, 2]).unwrap();
        let e = hs.handshake(&[5, 1, b'u', 1, b'p']);
        assert!(matches!(e, Err(Error::ProtocolVersion(5))));
        assert_eq!(hs.take_failure_reply(), Some(vec![1, 0xFF]));
    }

    #[test]
    fn pipelined() {
        let mut input = vec![5, 2, 0, 2];
        input.extend(encode_username_password_request("user", "pw").unwrap());
        input.extend(request("::1", 4567));
        input.extend_from_slice(b"Hello");

        let mut hs = ServerHandshake::new();
        let action = hs.handshake(&input).unwrap();
        assert!(action.finished);

        let mut expected = vec![5, 2, 1, 0];
        expected.extend_from_slice(&SUCCESS);
        assert_eq!(action.reply, expected);
        assert_eq!(hs.take_leftover(), b"Hello");
        assert_eq!(hs.request().unwrap().port(), 4567);
    }

    #[test]
    fn pipelined_failure_keeps_earlier_replies() {
        let mut input = vec![5, 1, 0];
        let mut req = request("10.1.1.1", 22);
        req[1] = Command::UDP_ASSOCIATE.0;
        input.extend(req);

        let mut hs = ServerHandshake::new();
        assert!(hs.handshake(&input).is_err());
        let reply = hs.take_failure_reply().unwrap();
        assert_eq!(&reply[..2], &[5, 0]);
        assert_eq!(reply[3], 7);
    }

    #[test]
    fn byte_at_a_time() {
        let mut input = vec![5, 1, 0];
        input.extend(request("example.com", 7890));

        let mut hs = ServerHandshake::new();
        let mut replies = Vec::new();
        for b in &input {
            let action = hs.handshake(&[*b]).unwrap();
            replies.extend(action.reply);
        }
        assert!(hs.is_established());
        assert_eq!(replies.len(), 2 + SUCCESS.len());
        assert_eq!(hs.request().unwrap().port(), 7890);
    }
}
