//! Client-side TLS: the security context and the handshake stage.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::deadline::{timed_out, Stage};
use crate::TomDialError;

/// Process-level TLS settings, built once and shared by every secure request.
///
/// Whether the peer's certificate is verified is chosen here, explicitly:
/// [`TlsContext::insecure`] accepts any certificate, the other constructors
/// verify against a trust store.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
    verifies_peer: bool,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("verifies_peer", &self.verifies_peer)
            .finish_non_exhaustive()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

impl TlsContext {
    /// Accept any server certificate.
    ///
    /// Handshake signatures are still checked, so the session is encrypted,
    /// but the peer's identity is not authenticated.
    pub fn insecure() -> Result<Self, TomDialError> {
        let provider = provider();
        let verifier = AcceptAnyServerCert {
            provider: provider.clone(),
        };
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            verifies_peer: false,
        })
    }

    /// Verify servers against the bundled Mozilla root set.
    pub fn webpki_roots() -> Result<Self, TomDialError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_root_certificates(roots)
    }

    /// Verify servers against a caller-supplied trust store.
    pub fn with_root_certificates(roots: RootCertStore) -> Result<Self, TomDialError> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            verifies_peer: true,
        })
    }

    /// Wrap a fully custom client config. Assumed to verify peers.
    pub fn from_client_config(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
            verifies_peer: true,
        }
    }

    /// `false` only for [`TlsContext::insecure`].
    pub fn verifies_peer(&self) -> bool {
        self.verifies_peer
    }

    /// Client handshake over an established transport, bounded by `limit`.
    ///
    /// When the deadline fires the transport is shut down gracefully rather
    /// than dropped mid-handshake.
    pub(crate) async fn handshake<S>(
        &self,
        server_name: ServerName<'static>,
        stream: S,
        limit: Duration,
    ) -> std::io::Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut connect = self.connector.connect(server_name, stream);
        match tokio::time::timeout(limit, &mut connect).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?limit, "handshake deadline fired, shutting transport down");
                if let Some(io) = connect.get_mut() {
                    if let Err(e) = io.shutdown().await {
                        tracing::trace!("shutdown after handshake timeout: {e}");
                    }
                }
                Err(timed_out(Stage::Handshake, limit))
            }
        }
    }
}

/// SNI / verification name for a request address (DNS name or IP literal).
pub(crate) fn server_name(address: &str) -> Option<ServerName<'static>> {
    let host = address
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(address);
    ServerName::try_from(host.to_string()).ok()
}

/// Certificate verifier that trusts every end-entity certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
