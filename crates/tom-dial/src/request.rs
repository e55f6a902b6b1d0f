/// Default port for plain requests that leave the port unset.
pub const DEFAULT_PLAIN_PORT: u16 = 80;
/// Default port for secure requests that leave the port unset.
pub const DEFAULT_SECURE_PORT: u16 = 443;

/// What the caller asked for. Immutable once accepted by the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    address: String,
    port: u16,
    secure: bool,
}

impl ConnectionRequest {
    /// `port == 0` selects the protocol default (80 plain, 443 secure).
    pub fn new(address: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            address: address.into(),
            port,
            secure,
        }
    }

    /// Hostname or literal IP address as given by the caller.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Port as given by the caller (may be 0).
    pub fn requested_port(&self) -> u16 {
        self.port
    }

    /// Port actually used for resolution.
    pub fn port(&self) -> u16 {
        match self.port {
            0 if self.secure => DEFAULT_SECURE_PORT,
            0 => DEFAULT_PLAIN_PORT,
            port => port,
        }
    }

    /// Whether the connection must be upgraded with a TLS handshake.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_port_defaults_by_security() {
        assert_eq!(ConnectionRequest::new("example.com", 0, false).port(), 80);
        assert_eq!(ConnectionRequest::new("example.com", 0, true).port(), 443);
    }

    #[test]
    fn explicit_port_is_verbatim() {
        assert_eq!(ConnectionRequest::new("example.com", 8443, false).port(), 8443);
        assert_eq!(ConnectionRequest::new("example.com", 8443, true).port(), 8443);
        assert_eq!(ConnectionRequest::new("example.com", 8443, true).requested_port(), 8443);
    }
}
