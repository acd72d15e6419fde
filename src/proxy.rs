use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_stream::wrappers::TcpListenerStream;

use crate::config::Config;

/// Bind every listener in `config` and serve SOCKS5 clients until the
/// listeners fail.
pub async fn run_socks5_proxy(config: &Config) -> Result<()> {
    Socks5Proxy::listen(config).await?.run().await;
    Ok(())
}

pub struct Socks5Proxy {
    listeners: Vec<TcpListener>,
    handshake_timeout: Duration,
    connect_timeout: Duration,
}

impl Socks5Proxy {
    /// Addresses that fail to bind are skipped. It is an error if none
    /// can be bound.
    pub async fn listen(config: &Config) -> Result<Self> {
        let mut listeners = Vec::new();
        for address in config.listen() {
            match TcpListener::bind(address.as_str()).await {
                Ok(listener) => {
                    info!("socks5 listening on {}", address);
                    listeners.push(listener);
                }
                Err(e) => warn!("socks5 bind {} failed: {}", address, e),
            }
        }

        if listeners.is_empty() {
            return Err(Error::new(
                ErrorKind::AddrNotAvailable,
                "no listen address could be bound",
            ));
        }

        Ok(Self {
            listeners,
            handshake_timeout: config.handshake_timeout(),
            connect_timeout: config.connect_timeout(),
        })
    }

    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    pub async fn run(self) {
        let mut incoming =
            futures::stream::select_all(self.listeners.into_iter().map(TcpListenerStream::new));

        while let Some(stream) = incoming.next().await {
            match stream {
                Ok(stream) => {
                    let conn = Connection {
                        stream,
                        handshake_timeout: self.handshake_timeout,
                        connect_timeout: self.connect_timeout,
                    };
                    tokio::spawn(async move {
                        if let Err(e) = conn.run().await {
                            debug!("socks5 connection closed: {}", e);
                        }
                    });
                }
                Err(e) => warn!("socks5 accept failed: {}", e),
            }
        }
    }
}

struct Connection {
    stream: TcpStream,
    handshake_timeout: Duration,
    connect_timeout: Duration,
}

impl Connection {
    async fn run(self) -> Result<(u64, u64)> {
        let peer = self.stream.peer_addr()?;

        let incoming = match timeout(self.handshake_timeout, socks5::accept(self.stream)).await {
            Ok(incoming) => incoming?,
            Err(_) => {
                return Err(Error::new(
                    ErrorKind::TimedOut,
                    format!("socks5 handshake with {} timed out", peer),
                ))
            }
        };

        let request = incoming.request();
        match request.username() {
            Some(user) => info!(
                "{} > {}:{} [ {} ]",
                peer,
                request.destination(),
                request.port(),
                user
            ),
            None => info!("{} > {}:{}", peer, request.destination(), request.port()),
        }

        let connect = socks5::connect_destination(request);
        let connected = match timeout(self.connect_timeout, connect).await {
            Ok(connected) => connected,
            Err(_) => Err(Error::new(ErrorKind::TimedOut, "connect timed out")),
        };
        let server = match connected {
            Ok(server) => server,
            Err(e) => {
                warn!(
                    "{} > {}:{} failed: {}",
                    peer,
                    request.destination(),
                    request.port(),
                    e
                );
                let mut client = incoming.into_stream();
                let _ = client.shutdown().await;
                return Err(e);
            }
        };

        Ok(socks5::relay_with(incoming, server).await?)
    }
}
