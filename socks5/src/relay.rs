//! Forward bytes between a proxied client and its destination.

use std::io::{ErrorKind, Result as IoResult};

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::proto::Address;
use crate::server::{Incoming, Request};
use crate::Result;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Open the outbound connection a request asks for.
pub async fn connect_destination(request: &Request) -> IoResult<TcpStream> {
    let port = request.port();
    match request.destination() {
        Address::Ipv4(ip) => TcpStream::connect((*ip, port)).await,
        Address::Ipv6(ip) => TcpStream::connect((*ip, port)).await,
        Address::Domain(host) => TcpStream::connect((host.as_ref(), port)).await,
    }
}

/// Connect to the destination of `incoming` and relay until both
/// directions are closed.
///
/// If the destination can't be reached, the client connection is shut
/// down and the connect error returned. Returns the number of bytes sent
/// to the destination and back to the client.
pub async fn relay<S>(incoming: Incoming<S>) -> Result<(u64, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outbound = match connect_destination(incoming.request()).await {
        Ok(stream) => stream,
        Err(e) => {
            let request = incoming.request();
            warn!(
                "socks5: connect {}:{} failed: {}",
                request.destination(),
                request.port(),
                e
            );
            let mut client = incoming.into_stream();
            let _ = client.shutdown().await;
            return Err(e.into());
        }
    };
    relay_with(incoming, outbound).await
}

/// Relay `incoming` over an outbound connection opened by the caller.
pub async fn relay_with<S, T>(incoming: Incoming<S>, outbound: T) -> Result<(u64, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    Ok(pipe(incoming.into_stream(), outbound).await?)
}

/// Run both directions between `client` and `server` concurrently.
///
/// EOF on one side becomes a write shutdown on the other while the
/// opposite direction keeps flowing. An error in either direction leaves
/// the connection unusable: both directions stop, both transports are
/// dropped, and the error is returned.
pub async fn pipe<A, B>(client: A, server: B) -> IoResult<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_r, client_w) = tokio::io::split(client);
    let (server_r, server_w) = tokio::io::split(server);

    let up = copy_half(client_r, server_w);
    let down = copy_half(server_r, client_w);
    tokio::pin!(up, down);

    tokio::select! {
        sent = &mut up => {
            let sent = sent?;
            Ok((sent, down.await?))
        }
        received = &mut down => {
            let received = received?;
            Ok((up.await?, received))
        }
    }
}

/// Whether an error only means the peer is gone.
fn peer_closed(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

/// Copy `reader` into `writer` until EOF, then shut `writer` down.
///
/// The next read only starts once the previous chunk has been written, so
/// a slow writer holds back its reader.
async fn copy_half<R, W>(mut reader: R, mut writer: W) -> IoResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let size = reader.read(&mut buf).await?;
        if size == 0 {
            break;
        }
        writer.write_all(&buf[..size]).await?;
        writer.flush().await?;
        total += size as u64;
    }

    // Half-close. The other side may already be gone, which is fine here.
    if let Err(e) = writer.shutdown().await {
        if !peer_closed(e.kind()) {
            return Err(e);
        }
        debug!("socks5: relay shutdown after peer closed: {}", e);
    }
    Ok(total)
}
