//! SOCKS5 (RFC 1928) with username/password authentication (RFC 1929),
//! CONNECT only.
//!
//! The wire format lives in [`codec`]. [`ClientHandshake`] and
//! [`ServerHandshake`] are socket-free state machines fed with whatever
//! bytes arrive; [`connect`]/[`Connector`] and [`accept`] drive them over
//! tokio streams, and [`relay`] forwards an accepted connection to its
//! destination.

mod client;
pub mod codec;
mod error;
mod proto;
mod reassembler;
mod relay;
mod server;
mod stream;

pub use client::{connect, ClientHandshake, Connector};
pub use error::Error;
pub use proto::{
    Address, Command, ConnectReply, ConnectRequest, Credentials, Hostname, Method, Parse, Reply,
};
pub use reassembler::Reassembler;
pub use relay::{connect_destination, pipe, relay, relay_with};
pub use server::{accept, Incoming, Request, ServerHandshake};
pub use stream::Socks5Stream;

pub type Result<T> = std::result::Result<T, Error>;

/// What to do after feeding a handshake some input.
#[derive(Clone, Debug, Default)]
pub struct Action {
    /// Bytes to write to the peer, possibly empty.
    pub reply: Vec<u8>,
    /// The handshake has succeeded; no more input is expected.
    pub finished: bool,
}

impl Action {
    pub(crate) fn reply(reply: Vec<u8>) -> Self {
        Self {
            reply,
            finished: false,
        }
    }
}
