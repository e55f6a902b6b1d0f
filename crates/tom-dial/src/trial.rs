//! The per-request pipeline: resolve → endpoint trials → optional TLS upgrade.
//!
//! Runs as straight-line async code inside one task, so a request never has
//! more than one connect or handshake in flight.

use std::net::SocketAddr;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connect::Connect;
use crate::deadline::{supervise, Stage};
use crate::factory::Shared;
use crate::handle::ConnectionHandle;
use crate::request::ConnectionRequest;
use crate::tls::{server_name, TlsContext};
use crate::ErrorCode;

/// Drive one request to its single outcome.
pub(crate) async fn establish<C: Connect>(
    shared: &Shared<C>,
    request: &ConnectionRequest,
) -> Result<ConnectionHandle<C::Stream>, ErrorCode> {
    let candidates = resolve_candidates(shared, request).await?;

    let security = if request.is_secure() {
        let Some(name) = server_name(request.address()) else {
            tracing::warn!("{:?} is not a valid TLS server name", request.address());
            return Err(ErrorCode::HandshakeFailed);
        };
        Security::Tls {
            context: &shared.tls,
            server_name: name,
        }
    } else {
        Security::Plain
    };

    try_candidates(shared, &candidates, security).await
}

async fn resolve_candidates<C: Connect>(
    shared: &Shared<C>,
    request: &ConnectionRequest,
) -> Result<Vec<SocketAddr>, ErrorCode> {
    let port = request.port();
    tracing::trace!("resolving {} with port {port}", request.address());

    let lookup = shared.resolver.resolve(request.address(), port);
    match supervise(Stage::Resolve, shared.config.resolve_timeout, lookup).await {
        Ok(candidates) if candidates.is_empty() => {
            tracing::warn!("resolution returned no addresses");
            Err(ErrorCode::ResolutionFailed)
        }
        Ok(candidates) => {
            tracing::debug!(count = candidates.len(), "resolved candidates");
            Ok(candidates)
        }
        Err(e) => {
            tracing::warn!("resolution failed: {e}");
            Err(ErrorCode::ResolutionFailed)
        }
    }
}

/// Walk the candidates in order. A failed or timed-out connect moves on to
/// the next one; whatever happens after a connect succeeds is final.
async fn try_candidates<C: Connect>(
    shared: &Shared<C>,
    candidates: &[SocketAddr],
    security: Security<'_>,
) -> Result<ConnectionHandle<C::Stream>, ErrorCode> {
    let limit = shared.config.connect_timeout;

    for (attempt, &addr) in candidates.iter().enumerate() {
        if shared.is_stopping() {
            tracing::debug!(attempt, "factory stopping, abandoning remaining candidates");
            return Err(ErrorCode::ConnectionExhausted);
        }

        tracing::trace!(%addr, attempt, "connecting");
        let stream = match supervise(Stage::Connect, limit, shared.connector.connect(addr)).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%addr, "connect failed: {e}");
                continue;
            }
        };

        return security
            .finish(stream, addr, limit, shared.config.idle_timeout)
            .await;
    }

    tracing::debug!(candidates = candidates.len(), "all candidates exhausted");
    Err(ErrorCode::ConnectionExhausted)
}

/// What happens to a freshly connected transport.
enum Security<'a> {
    Plain,
    Tls {
        context: &'a TlsContext,
        server_name: ServerName<'static>,
    },
}

impl Security<'_> {
    async fn finish<S>(
        self,
        stream: S,
        addr: SocketAddr,
        handshake_limit: Duration,
        idle_timeout: Duration,
    ) -> Result<ConnectionHandle<S>, ErrorCode>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Security::Plain => {
                tracing::debug!(%addr, "connected");
                Ok(ConnectionHandle::plain(stream, addr, idle_timeout))
            }
            Security::Tls {
                context,
                server_name,
            } => match context.handshake(server_name, stream, handshake_limit).await {
                Ok(tls) => {
                    tracing::debug!(%addr, "connected, TLS established");
                    Ok(ConnectionHandle::secure(tls, addr, idle_timeout))
                }
                Err(e) => {
                    // No fallback: a reachable endpoint that fails TLS ends the request.
                    tracing::warn!(%addr, "TLS handshake failed: {e}");
                    Err(ErrorCode::HandshakeFailed)
                }
            },
        }
    }
}
