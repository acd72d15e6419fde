//! Error type for the socks5 crate.
use std::io;

use thiserror::Error;

use crate::proto::Reply;

/// An error that occurs while negotiating or relaying a SOCKS5 connection.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The peer sent a version byte we don't speak.
    #[error("socks5: unsupported protocol version {0}")]
    ProtocolVersion(u8),

    /// The two sides share no acceptable authentication method.
    #[error("socks5: unsupported method")]
    UnsupportedMethod,

    /// The server rejected our username/password.
    #[error("socks5: authentication failed")]
    AuthenticationFailed,

    /// A request carried a bad command or address type, or a destination
    /// that can't be encoded.
    #[error("socks5: invalid request: {0}")]
    InvalidRequest(String),

    /// The proxy answered the connect request with a failure code.
    #[error("socks5 reply {0}")]
    ProxyReply(Reply),

    /// The underlying connection failed or closed early.
    #[error("socks5: transport error: {0}")]
    Transport(#[from] io::Error),

    /// Username or password is empty or longer than 255 bytes.
    #[error("socks5: invalid username or password")]
    InvalidCredentials,

    /// Tried to progress a handshake that already succeeded or failed.
    #[error("socks5: handshake was finished; no need to call this again")]
    AlreadyFinished,

    /// A handshake method was called out of order.
    #[error("socks5: internal error: {0}")]
    Internal(&'static str),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Transport(e) => e,
            Error::AuthenticationFailed => io::Error::new(io::ErrorKind::PermissionDenied, e),
            Error::ProxyReply(Reply::CONNECTION_REFUSED) => {
                io::Error::new(io::ErrorKind::ConnectionRefused, e)
            }
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
