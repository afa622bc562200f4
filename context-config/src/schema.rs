//! Strongly typed configuration schema.

use std::time::Duration;

use context_primitives::ChannelId;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Settings for a model context host and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Logical channel name shared by client and server.
    pub channel_id: String,
    /// Origin outgoing messages are addressed to; `*` for any.
    pub target_origin: String,
    /// Origins accepted on incoming messages. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// How long a client waits for the server to announce readiness.
    pub ready_timeout_ms: u64,
    /// Reject descriptors whose schemas fail to compile.
    pub strict_schemas: bool,
    /// Tracing filter directive, e.g. `info,context_tools=debug`.
    pub log_filter: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            channel_id: ChannelId::DEFAULT.to_owned(),
            target_origin: "*".to_owned(),
            allowed_origins: Vec::new(),
            ready_timeout_ms: 5000,
            strict_schemas: false,
            log_filter: "info".to_owned(),
        }
    }
}

impl ContextConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range values and
    /// [`ConfigError::Channel`] when the channel name is malformed.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ready_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ready_timeout_ms must be greater than zero"));
        }
        if self.target_origin.trim().is_empty() {
            return Err(ConfigError::Invalid("target_origin must not be empty"));
        }
        if self.allowed_origins.iter().any(|origin| origin.trim().is_empty()) {
            return Err(ConfigError::Invalid("allowed_origins must not contain empty entries"));
        }
        self.channel()?;
        Ok(())
    }

    /// Returns the validated channel identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Channel`] when the name is malformed.
    pub fn channel(&self) -> ConfigResult<ChannelId> {
        Ok(ChannelId::new(self.channel_id.clone())?)
    }

    /// Returns the readiness timeout.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}
