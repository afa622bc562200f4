//! Client transport settings.

use std::time::Duration;

use crate::{TransportError, TransportResult};

/// How long a client waits for `mcp-server-ready` by default.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration for a [`ClientTransport`](crate::ClientTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    ready_timeout: Duration,
}

impl TransportConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(ready_timeout: Duration) -> Self {
        Self { ready_timeout }
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub const fn ready_timeout(self) -> Duration {
        self.ready_timeout
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] when the timeout is zero.
    pub fn validate(self) -> TransportResult<()> {
        if self.ready_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "ready timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_READY_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_five_seconds() {
        assert_eq!(TransportConfig::default().ready_timeout(), Duration::from_secs(5));
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = TransportConfig::new(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
    }
}
