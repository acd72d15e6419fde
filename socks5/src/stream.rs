use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::proto::Address;

/// A connection whose SOCKS5 handshake has completed.
///
/// Bytes that arrived together with the last handshake message are
/// returned by the first reads, before anything else from `S`.
#[derive(Debug)]
pub struct Socks5Stream<S> {
    inner: S,
    prefix: Vec<u8>,
    prefix_pos: usize,
    bind: Option<(Address, u16)>,
}

impl<S> Socks5Stream<S> {
    pub(crate) fn new(inner: S, prefix: Vec<u8>, bind: Option<(Address, u16)>) -> Self {
        Self {
            inner,
            prefix,
            prefix_pos: 0,
            bind,
        }
    }

    /// Address the proxy reported as bound for this connection, if known.
    pub fn bind_addr(&self) -> Option<&(Address, u16)> {
        self.bind.as_ref()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Split into the transport and the bytes already read from it but not
    /// yet returned.
    pub fn into_parts(mut self) -> (S, Vec<u8>) {
        let prefix = self.prefix.split_off(self.prefix_pos);
        (self.inner, prefix)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Socks5Stream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.prefix_pos < this.prefix.len() {
            let rest = &this.prefix[this.prefix_pos..];
            let n = rest.len().min(buf.remaining());
            buf.put_slice(&rest[..n]);
            this.prefix_pos += n;
            if this.prefix_pos == this.prefix.len() {
                this.prefix = Vec::new();
                this.prefix_pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Socks5Stream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn prefix_first() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut s = Socks5Stream::new(a, b"early".to_vec(), None);

        b.write_all(b" late").await.unwrap();
        drop(b);

        let mut out = String::new();
        s.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "early late");
    }

    #[tokio::test]
    async fn small_reads() {
        let (a, _b) = tokio::io::duplex(64);
        let mut s = Socks5Stream::new(a, b"abc".to_vec(), None);

        let mut buf = [0u8; 2];
        assert_eq!(s.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"ab");

        let (_, rest) = s.into_parts();
        assert_eq!(rest, b"c");
    }
}
