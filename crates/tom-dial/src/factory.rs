use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::DialConfig;
use crate::connect::{Connect, TcpConnector};
use crate::handle::ConnectionHandle;
use crate::request::ConnectionRequest;
use crate::resolve::{GaiResolver, Resolve};
use crate::tls::TlsContext;
use crate::trial;
use crate::{ErrorCode, TomDialError};

/// State every request task reads. Never mutated after construction except
/// for the stopping flag.
pub(crate) struct Shared<C> {
    pub(crate) config: DialConfig,
    pub(crate) resolver: Arc<dyn Resolve>,
    pub(crate) connector: C,
    pub(crate) tls: TlsContext,
    stopping: AtomicBool,
}

impl<C> Shared<C> {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Turns (host, port, secure) into a ready connection, asynchronously.
///
/// Every accepted request runs as its own task on the runtime given at
/// construction and ends with exactly one callback: `on_success` with a
/// [`ConnectionHandle`], or `on_error` with an [`ErrorCode`].
///
/// Dropping the factory cancels all requests still in flight. Their
/// operations are abandoned and neither callback fires.
///
/// ```rust,no_run
/// use tom_dial::{ConnectorFactory, DialConfig, TlsContext};
///
/// # async fn example() -> Result<(), tom_dial::TomDialError> {
/// let factory = ConnectorFactory::new(
///     tokio::runtime::Handle::current(),
///     DialConfig::new(),
///     TlsContext::webpki_roots()?,
/// )?;
///
/// factory.get_connector(
///     "example.com",
///     0,
///     true,
///     |conn| println!("connected to {}", conn.peer_addr()),
///     |code| eprintln!("dial failed: {code}"),
/// );
/// # Ok(())
/// # }
/// ```
pub struct ConnectorFactory<C: Connect = TcpConnector> {
    shared: Arc<Shared<C>>,
    runtime: Handle,
    tasks: TaskTracker,
    lifetime: CancellationToken,
    next_request: AtomicU64,
}

impl ConnectorFactory<TcpConnector> {
    /// TCP over the system resolver.
    pub fn new(runtime: Handle, config: DialConfig, tls: TlsContext) -> Result<Self, TomDialError> {
        let connector = TcpConnector::new(config.nodelay);
        Self::with_parts(runtime, config, tls, Arc::new(GaiResolver::new()), connector)
    }
}

impl<C: Connect> ConnectorFactory<C> {
    /// Build with a custom resolver and connector.
    pub fn with_parts(
        runtime: Handle,
        config: DialConfig,
        tls: TlsContext,
        resolver: Arc<dyn Resolve>,
        connector: C,
    ) -> Result<Self, TomDialError> {
        config.validate()?;
        if !tls.verifies_peer() {
            tracing::warn!("TLS peer verification is disabled for this connector factory");
        }
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                resolver,
                connector,
                tls,
                stopping: AtomicBool::new(false),
            }),
            runtime,
            tasks: TaskTracker::new(),
            lifetime: CancellationToken::new(),
            next_request: AtomicU64::new(0),
        })
    }

    /// Request a connection to `address:port`, upgraded to TLS if `secure`.
    ///
    /// `port == 0` picks 80 or 443. If the factory is stopping, `on_error`
    /// runs with [`ErrorCode::Rejected`] before this returns and nothing
    /// touches the network.
    ///
    /// For a secure request whose address is not a valid TLS server name
    /// (an IPv6 literal with a zone id such as `fe80::1%eth0`, for one),
    /// `on_error` gets [`ErrorCode::HandshakeFailed`] right after
    /// resolution, without any endpoint being dialled.
    pub fn get_connector<F, E>(
        &self,
        address: impl Into<String>,
        port: u16,
        secure: bool,
        on_success: F,
        on_error: E,
    ) where
        F: FnOnce(ConnectionHandle<C::Stream>) + Send + 'static,
        E: FnOnce(ErrorCode) + Send + 'static,
    {
        self.dial(ConnectionRequest::new(address, port, secure), on_success, on_error)
    }

    /// Same as [`get_connector`](Self::get_connector) for a prepared request.
    pub fn dial<F, E>(&self, request: ConnectionRequest, on_success: F, on_error: E)
    where
        F: FnOnce(ConnectionHandle<C::Stream>) + Send + 'static,
        E: FnOnce(ErrorCode) + Send + 'static,
    {
        if self.shared.is_stopping() {
            tracing::debug!(host = request.address(), "rejecting request, factory stopping");
            return on_error(ErrorCode::Rejected);
        }

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let span = tracing::debug_span!(
            "dial",
            request = id,
            host = %request.address(),
            port = request.port(),
            secure = request.is_secure(),
        );
        let shared = self.shared.clone();
        let cancel = self.lifetime.child_token();

        self.tasks.spawn_on(
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    res = trial::establish(&shared, &request) => Some(res),
                };
                let Some(outcome) = outcome.filter(|_| !cancel.is_cancelled()) else {
                    tracing::trace!("factory dropped, discarding request");
                    return;
                };
                match outcome {
                    Ok(conn) => on_success(conn),
                    Err(code) => on_error(code),
                }
            }
            .instrument(span),
            &self.runtime,
        );
    }

    /// Stop accepting requests.
    ///
    /// In-flight requests are not interrupted; each one gives up at its next
    /// candidate boundary with [`ErrorCode::ConnectionExhausted`].
    pub fn stop(&self) {
        if !self.shared.stopping.swap(true, Ordering::AcqRel) {
            tracing::debug!("connector factory stopping");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Number of requests whose task has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Graceful shutdown: stop, then wait for every in-flight request to
    /// deliver its callback.
    pub async fn shutdown(&self) {
        self.stop();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl<C: Connect> Drop for ConnectorFactory<C> {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

impl<C: Connect> std::fmt::Debug for ConnectorFactory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorFactory")
            .field("config", &self.shared.config)
            .field("tls", &self.shared.tls)
            .field("stopping", &self.is_stopping())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::mock::{Behavior, MockConnector};
    use crate::resolve::mock::{Answer, MockResolver};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    type Outcome = Result<ConnectionHandle<DuplexStream>, ErrorCode>;

    fn callbacks() -> (
        impl FnOnce(ConnectionHandle<DuplexStream>) + Send + 'static,
        impl FnOnce(ErrorCode) + Send + 'static,
        mpsc::UnboundedReceiver<Outcome>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let err_tx = tx.clone();
        (
            move |conn| {
                let _ = tx.send(Ok(conn));
            },
            move |code| {
                let _ = err_tx.send(Err(code));
            },
            rx,
        )
    }

    fn factory(resolver: &MockResolver, connector: &MockConnector) -> ConnectorFactory<MockConnector> {
        let config = DialConfig::new()
            .resolve_timeout(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(1))
            .idle_timeout(Duration::from_secs(30));
        ConnectorFactory::with_parts(
            Handle::current(),
            config,
            TlsContext::insecure().unwrap(),
            Arc::new(resolver.clone()),
            connector.clone(),
        )
        .unwrap()
    }

    fn ep(host: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, host], port))
    }

    /// Wait for the single outcome, then make sure no second one follows.
    async fn single_outcome(
        factory: &ConnectorFactory<MockConnector>,
        rx: &mut mpsc::UnboundedReceiver<Outcome>,
    ) -> Outcome {
        let outcome = rx.recv().await.expect("no callback fired");
        factory.shutdown().await;
        assert!(rx.try_recv().is_err(), "second callback fired");
        outcome
    }

    #[tokio::test]
    async fn stopping_factory_rejects_synchronously() {
        let resolver = MockResolver::loopback(&[1]);
        let connector = MockConnector::new();
        let factory = factory(&resolver, &connector);
        factory.stop();

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 0, false, ok, err);

        assert!(matches!(rx.try_recv(), Ok(Err(ErrorCode::Rejected))));
        assert!(resolver.queries().is_empty());
        assert!(connector.attempts().is_empty());
        assert_eq!(factory.in_flight(), 0);
    }

    #[tokio::test]
    async fn zero_port_resolves_protocol_default() {
        let resolver = MockResolver::new(Answer::Fail);
        let connector = MockConnector::new();
        let factory = factory(&resolver, &connector);

        for (port, secure) in [(0, false), (0, true), (8443, false), (8443, true)] {
            let (ok, err, mut rx) = callbacks();
            factory.get_connector("example.com", port, secure, ok, err);
            assert!(matches!(rx.recv().await, Some(Err(ErrorCode::ResolutionFailed))));
        }

        let ports: Vec<u16> = resolver.queries().into_iter().map(|(_, p)| p).collect();
        assert_eq!(ports, vec![80, 443, 8443, 8443]);
    }

    #[tokio::test]
    async fn falls_back_through_candidates_in_order() {
        let resolver = MockResolver::loopback(&[1, 2, 3]);
        let connector = MockConnector::new();
        connector.script(ep(3, 8080), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 8080, false, ok, err);

        let mut conn = single_outcome(&factory, &mut rx).await.unwrap();
        assert_eq!(conn.peer_addr(), ep(3, 8080));
        assert!(!conn.is_secure());
        assert_eq!(conn.idle_timeout(), Duration::from_secs(30));
        assert_eq!(connector.attempts(), vec![ep(1, 8080), ep(2, 8080), ep(3, 8080)]);

        let (peer, mut far) = connector.take_peer().unwrap();
        assert_eq!(peer, ep(3, 8080));
        conn.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn all_candidates_failing_reports_exhaustion_once() {
        let resolver = MockResolver::loopback(&[1, 2, 3]);
        let connector = MockConnector::new();
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::ConnectionExhausted);
        assert_eq!(connector.attempts().len(), 3);
    }

    #[tokio::test]
    async fn handshake_failure_does_not_try_next_candidate() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        connector.script(ep(1, 443), Behavior::AcceptThenClose);
        connector.script(ep(2, 443), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 0, true, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::HandshakeFailed);
        assert_eq!(connector.attempts(), vec![ep(1, 443)]);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_fails_without_fallback() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        // Accepts TCP but never answers the ClientHello.
        connector.script(ep(1, 443), Behavior::Accept);
        connector.script(ep(2, 443), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 0, true, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::HandshakeFailed);
        assert_eq!(connector.attempts(), vec![ep(1, 443)]);

        // The silent peer saw the ClientHello, then an orderly close.
        let (peer, mut far) = connector.take_peer().unwrap();
        assert_eq!(peer, ep(1, 443));
        let mut seen = Vec::new();
        far.read_to_end(&mut seen).await.unwrap();
        assert!(!seen.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_callback_after_teardown_during_handshake() {
        let resolver = MockResolver::loopback(&[1]);
        let connector = MockConnector::new();
        connector.script(ep(1, 443), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 0, true, ok, err);

        let (_, mut far) = loop {
            if let Some(peer) = connector.take_peer() {
                break peer;
            }
            tokio::task::yield_now().await;
        };
        // A ClientHello on the wire means the handshake is in progress.
        let mut hello = [0u8; 512];
        assert!(far.read(&mut hello).await.unwrap() > 0);
        drop(factory);

        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("request task was not cancelled");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn invalid_server_name_fails_before_connecting() {
        let resolver = MockResolver::loopback(&[1]);
        let connector = MockConnector::new();
        connector.script(ep(1, 443), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("bad host!", 0, true, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::HandshakeFailed);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn scoped_ipv6_literal_fails_secure_request_before_connecting() {
        let resolver = MockResolver::loopback(&[1]);
        let connector = MockConnector::new();
        connector.script(ep(1, 443), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("fe80::1%eth0", 0, true, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::HandshakeFailed);
        assert_eq!(resolver.queries().len(), 1);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_timeout_reports_resolution_failure() {
        let resolver = MockResolver::new(Answer::Hang);
        let connector = MockConnector::new();
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);

        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::ResolutionFailed);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn resolution_error_or_empty_answer_fails() {
        for answer in [Answer::Fail, Answer::Addrs(Vec::new())] {
            let resolver = MockResolver::new(answer);
            let connector = MockConnector::new();
            let factory = factory(&resolver, &connector);

            let (ok, err, mut rx) = callbacks();
            factory.get_connector("example.com", 80, false, ok, err);

            let outcome = single_outcome(&factory, &mut rx).await;
            assert_eq!(outcome.unwrap_err(), ErrorCode::ResolutionFailed);
            assert!(connector.attempts().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_falls_back_like_an_error() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        connector.script(ep(1, 80), Behavior::Hang);
        connector.script(ep(2, 80), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 0, false, ok, err);

        let conn = single_outcome(&factory, &mut rx).await.unwrap();
        assert_eq!(conn.peer_addr(), ep(2, 80));
        assert_eq!(connector.attempts(), vec![ep(1, 80), ep(2, 80)]);
    }

    #[tokio::test]
    async fn no_callback_after_teardown_during_resolve() {
        let resolver = MockResolver::new(Answer::Hang);
        let connector = MockConnector::new();
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);
        tokio::task::yield_now().await;
        drop(factory);

        // Both callbacks are dropped unused, closing the channel.
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("request task was not cancelled");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn no_callback_after_teardown_during_connect() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        connector.script(ep(1, 80), Behavior::Hang);
        connector.script(ep(2, 80), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);
        while connector.attempts().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(factory);

        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("request task was not cancelled");
        assert!(next.is_none());
        assert_eq!(connector.attempts(), vec![ep(1, 80)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_at_next_candidate() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        connector.script(ep(1, 80), Behavior::Hang);
        connector.script(ep(2, 80), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);
        while connector.attempts().is_empty() {
            tokio::task::yield_now().await;
        }
        factory.stop();

        // The attempt in flight runs to its deadline, then the trial loop gives up.
        let outcome = single_outcome(&factory, &mut rx).await;
        assert_eq!(outcome.unwrap_err(), ErrorCode::ConnectionExhausted);
        assert_eq!(connector.attempts(), vec![ep(1, 80)]);

        let (ok, err, mut rx) = callbacks();
        factory.get_connector("example.com", 80, false, ok, err);
        assert!(matches!(rx.try_recv(), Ok(Err(ErrorCode::Rejected))));
    }

    #[tokio::test]
    async fn concurrent_requests_are_independent() {
        let resolver = MockResolver::loopback(&[1, 2]);
        let connector = MockConnector::new();
        connector.script(ep(2, 80), Behavior::Accept);
        let factory = factory(&resolver, &connector);

        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (ok, err, rx) = callbacks();
            factory.get_connector("example.com", 80, false, ok, err);
            receivers.push(rx);
        }
        for rx in &mut receivers {
            let conn = rx.recv().await.unwrap().unwrap();
            assert_eq!(conn.peer_addr(), ep(2, 80));
        }
        factory.shutdown().await;
        assert_eq!(factory.in_flight(), 0);
        assert_eq!(connector.attempts().len(), 8);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = ConnectorFactory::with_parts(
            rt.handle().clone(),
            DialConfig::new().connect_timeout(Duration::ZERO),
            TlsContext::insecure().unwrap(),
            Arc::new(MockResolver::loopback(&[1])),
            MockConnector::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TomDialError::Config(_)));
    }
}
