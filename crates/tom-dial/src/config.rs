use std::time::Duration;

use crate::TomDialError;

/// Configuration for a [`ConnectorFactory`](crate::ConnectorFactory).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use tom_dial::DialConfig;
///
/// let config = DialConfig::new()
///     .connect_timeout(Duration::from_secs(2))
///     .idle_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Upper bound for a single name lookup.
    pub(crate) resolve_timeout: Duration,
    /// Upper bound for one connect attempt, and separately for the TLS handshake.
    pub(crate) connect_timeout: Duration,
    /// Idle timeout stamped on every produced connection handle.
    pub(crate) idle_timeout: Duration,
    /// Set `TCP_NODELAY` on established sockets.
    pub(crate) nodelay: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DialConfig {
    /// Create a new config with defaults.
    ///
    /// The timeouts can be overridden from the environment with
    /// `TOM_DIAL_RESOLVE_TIMEOUT_MS`, `TOM_DIAL_CONNECT_TIMEOUT_MS` and
    /// `TOM_DIAL_IDLE_TIMEOUT_MS`. Values that do not parse are ignored.
    pub fn new() -> Self {
        Self {
            resolve_timeout: env_millis("TOM_DIAL_RESOLVE_TIMEOUT_MS")
                .unwrap_or(Duration::from_secs(5)),
            connect_timeout: env_millis("TOM_DIAL_CONNECT_TIMEOUT_MS")
                .unwrap_or(Duration::from_secs(5)),
            idle_timeout: env_millis("TOM_DIAL_IDLE_TIMEOUT_MS")
                .unwrap_or(Duration::from_secs(30)),
            nodelay: true,
        }
    }

    /// Set the name resolution timeout (default: 5 s).
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Set the per-candidate connect timeout (default: 5 s).
    ///
    /// The same window bounds the TLS handshake of a secure request.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle timeout carried by produced connections (default: 30 s).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY` (default: enabled).
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Reject configurations that would make every request fail.
    pub fn validate(&self) -> Result<(), TomDialError> {
        if self.resolve_timeout.is_zero() {
            return Err(TomDialError::Config("resolve_timeout must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(TomDialError::Config("connect_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
