//! ToM dialer.
//!
//! Turns a hostname (or literal address), a port and a "secure" flag into a
//! ready connection: resolve the name, try the candidate endpoints in order
//! until one accepts, optionally run a TLS client handshake, then hand the
//! connection to the caller. Every stage is bounded by its own deadline and
//! nothing blocks the calling thread.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tom_dial::{ConnectorFactory, DialConfig, TlsContext};
//!
//! # async fn example() -> Result<(), tom_dial::TomDialError> {
//! let factory = ConnectorFactory::new(
//!     tokio::runtime::Handle::current(),
//!     DialConfig::new(),
//!     TlsContext::webpki_roots()?,
//! )?;
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! factory.get_connector(
//!     "example.com",
//!     0, // 443, because secure
//!     true,
//!     move |conn| {
//!         let _ = tx.send(conn);
//!     },
//!     |code| eprintln!("dial failed ({}): {code}", code.code()),
//! );
//!
//! if let Ok(conn) = rx.await {
//!     println!("connected to {} (tls: {})", conn.peer_addr(), conn.is_secure());
//! }
//!
//! factory.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Failure policy: a refused or timed-out connect moves on to the next
//! candidate; resolution failures and TLS handshake failures end the request.

mod config;
mod connect;
mod deadline;
mod error;
mod factory;
mod handle;
mod request;
mod resolve;
mod tls;
mod trial;

pub use config::DialConfig;
pub use connect::{Connect, TcpConnector};
pub use error::{ErrorCode, TomDialError};
pub use factory::ConnectorFactory;
pub use handle::ConnectionHandle;
pub use request::{ConnectionRequest, DEFAULT_PLAIN_PORT, DEFAULT_SECURE_PORT};
pub use resolve::{GaiResolver, HickoryResolver, Resolve};
pub use tls::TlsContext;

// Re-export so callers can build resolvers and trust stores without
// depending on matching crate versions themselves.
pub use hickory_resolver::config::{ResolverConfig, ResolverOpts};
pub use rustls::RootCertStore;
