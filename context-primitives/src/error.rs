//! Shared error definitions for context primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the workspace primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided window identifier could not be parsed.
    #[error("invalid window id: {source}")]
    InvalidWindowId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Channel identifier failed validation.
    #[error("invalid channel id `{id}`: {reason}")]
    InvalidChannelId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A bus message could not be decoded into an envelope.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
