use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

enum Stream<S> {
    Plain(S),
    Secure(Box<TlsStream<S>>),
}

/// A ready, open connection handed to the caller.
///
/// Reads and writes go straight through to the plain or TLS stream. The idle
/// timeout is fixed when the handle is built; enforcing it is up to the
/// protocol layer that owns the handle.
pub struct ConnectionHandle<S> {
    stream: Stream<S>,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
}

impl<S> ConnectionHandle<S> {
    pub(crate) fn plain(stream: S, peer_addr: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            stream: Stream::Plain(stream),
            peer_addr,
            idle_timeout,
        }
    }

    pub(crate) fn secure(
        stream: TlsStream<S>,
        peer_addr: SocketAddr,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            stream: Stream::Secure(Box::new(stream)),
            peer_addr,
            idle_timeout,
        }
    }

    /// Whether a TLS session wraps the transport.
    pub fn is_secure(&self) -> bool {
        matches!(self.stream, Stream::Secure(_))
    }

    /// The candidate endpoint that accepted the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Negotiated TLS session (ALPN, protocol version, peer certificates).
    pub fn tls_session(&self) -> Option<&rustls::ClientConnection> {
        match &self.stream {
            Stream::Plain(_) => None,
            Stream::Secure(tls) => Some(tls.get_ref().1),
        }
    }

    /// The underlying transport.
    pub fn get_ref(&self) -> &S {
        match &self.stream {
            Stream::Plain(s) => s,
            Stream::Secure(tls) => tls.get_ref().0,
        }
    }

    /// Recover the raw transport of a plain connection.
    pub fn into_plain(self) -> Result<S, Self> {
        match self.stream {
            Stream::Plain(s) => Ok(s),
            stream => Err(Self {
                stream,
                peer_addr: self.peer_addr,
                idle_timeout: self.idle_timeout,
            }),
        }
    }
}

impl<S> fmt::Debug for ConnectionHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer_addr", &self.peer_addr)
            .field("secure", &self.is_secure())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for ConnectionHandle<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Secure(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for ConnectionHandle<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().stream {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Secure(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Secure(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Secure(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}
