use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens a plain transport connection to one endpoint.
///
/// In production: [`TcpConnector`].
/// In tests: in-memory duplex streams with scripted outcomes.
#[async_trait::async_trait]
pub trait Connect: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// One attempt, no retries. Dropping the future cancels the attempt.
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

/// TCP via tokio.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TcpConnector {
    pub fn new(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

#[async_trait::async_trait]
impl Connect for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%addr, "failed to set TCP_NODELAY: {e}");
            }
        }
        Ok(stream)
    }
}

// ── MockConnector (tests) ───────────────────────────────────────────
