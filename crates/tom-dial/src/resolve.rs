//! Name resolution: (host, port) → ordered candidate endpoints.

use std::io;
use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::TomDialError;

/// Resolves a host into candidate endpoints, in the order they should be tried.
///
/// In production: [`GaiResolver`] or [`HickoryResolver`].
/// In tests: a scripted resolver.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync + 'static {
    /// An empty list is a valid answer; the dialer treats it as a failure.
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Literal IP addresses never hit the network.
fn literal(host: &str, port: u16) -> Option<Vec<SocketAddr>> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse::<IpAddr>()
        .ok()
        .map(|ip| vec![SocketAddr::new(ip, port)])
}

// ── System resolver ─────────────────────────────────────────────────

/// The operating system's resolver (`getaddrinfo`), in system order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Resolve for GaiResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = literal(host, port) {
            return Ok(addrs);
        }
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }
}

// ── Hickory resolver ────────────────────────────────────────────────

/// Asynchronous DNS via `hickory-resolver`, querying both A and AAAA.
#[derive(Clone)]
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

impl HickoryResolver {
    /// Build from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// The system options are kept except for the IP strategy, which is
    /// forced to IPv4-and-IPv6 as in [`HickoryResolver::new`].
    pub fn from_system_conf() -> Result<Self, TomDialError> {
        let (config, opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| TomDialError::Resolver(e.into()))?;
        Ok(Self::new(config, opts))
    }

    /// Build from an explicit config; the IP strategy is forced to
    /// IPv4-and-IPv6 so every address family becomes a candidate.
    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            inner: TokioAsyncResolver::tokio(config, dual_stack(opts)),
        }
    }
}

fn dual_stack(mut opts: ResolverOpts) -> ResolverOpts {
    opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    opts
}

#[async_trait::async_trait]
impl Resolve for HickoryResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = literal(host, port) {
            return Ok(addrs);
        }
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect())
    }
}

// ── MockResolver (tests) ────────────────────────────────────────────
