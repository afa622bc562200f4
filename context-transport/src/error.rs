//! Transport error taxonomy.

use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by client and server transports.
///
/// [`HandshakeTimeout`](Self::HandshakeTimeout), [`Navigated`](Self::Navigated),
/// [`ServerStopped`](Self::ServerStopped) and [`Closed`](Self::Closed) end the
/// transport instance that produced them; see [`is_terminal`](Self::is_terminal).
/// The remaining variants reject a single call and leave the transport usable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// No `mcp-server-ready` arrived within the readiness timeout.
    #[error("server did not become ready within {timeout_ms}ms")]
    HandshakeTimeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The hosting document navigated away.
    #[error("hosting document navigated away")]
    Navigated,

    /// The server announced that it stopped.
    #[error("server stopped")]
    ServerStopped,

    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// The transport has not completed its handshake.
    #[error("transport is not connected")]
    NotConnected,

    /// Transport configuration was invalid.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(&'static str),

    /// The peer answered with a JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message supplied by the peer.
        message: String,
    },

    /// A state transition was not permitted.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A message could not be framed or a result could not be decoded.
    #[error("encoding error: {reason}")]
    Encode {
        /// Human-readable description.
        reason: String,
    },
}

impl TransportError {
    pub(crate) fn encode(reason: impl ToString) -> Self {
        Self::Encode {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` when the error ended the transport.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::Navigated | Self::ServerStopped | Self::Closed
        )
    }
}

impl From<context_primitives::Error> for TransportError {
    fn from(err: context_primitives::Error) -> Self {
        Self::encode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_shutdown_errors_are_terminal() {
        for err in [
            TransportError::HandshakeTimeout { timeout_ms: 100 },
            TransportError::Navigated,
            TransportError::ServerStopped,
            TransportError::Closed,
        ] {
            assert!(err.is_terminal(), "{err} should be terminal");
        }
        for err in [
            TransportError::NotConnected,
            TransportError::InvalidConfig("ready timeout must be positive"),
            TransportError::Rpc {
                code: -32601,
                message: "method not found".into(),
            },
            TransportError::encode("bad shape"),
        ] {
            assert!(!err.is_terminal(), "{err} should not be terminal");
        }
    }
}
