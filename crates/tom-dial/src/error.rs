/// Outcome delivered to a request's error callback.
///
/// Transport, resolver and timer errors are logged where they happen and
/// never reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    /// The factory is stopping and no longer accepts requests.
    #[error("connector factory is not accepting requests")]
    Rejected,

    /// Name lookup failed, timed out, or returned no addresses.
    #[error("address resolution failed")]
    ResolutionFailed,

    /// Every candidate endpoint refused or timed out.
    #[error("all candidate endpoints failed")]
    ConnectionExhausted,

    /// A transport connection was established but the TLS handshake failed.
    #[error("TLS handshake failed")]
    HandshakeFailed,
}

impl ErrorCode {
    /// Stable numeric code, suitable for logs and FFI boundaries.
    pub fn code(self) -> u8 {
        match self {
            ErrorCode::Rejected => 1,
            ErrorCode::ResolutionFailed => 2,
            ErrorCode::ConnectionExhausted => 3,
            ErrorCode::HandshakeFailed => 4,
        }
    }
}

/// Errors raised while building a dialer (never during a request).
#[derive(Debug, thiserror::Error)]
pub enum TomDialError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialise resolver: {0}")]
    Resolver(#[source] anyhow::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}
