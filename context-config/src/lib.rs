//! Configuration for hosts that expose a model context.
//!
//! Settings layer as defaults, then an optional TOML document, then
//! `MODEL_CONTEXT_*` environment variables.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

use thiserror::Error;

pub use loader::{ENV_PREFIX, apply_env, apply_env_from, from_path, from_toml_str};
pub use schema::ContextConfig;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid configuration document: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },

    /// An environment variable held a value of the wrong shape.
    #[error("invalid value for {var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A setting failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    /// The channel name failed validation.
    #[error(transparent)]
    Channel(#[from] context_primitives::Error),
}
