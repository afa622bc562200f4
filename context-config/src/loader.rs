//! Loading configuration from TOML and the environment.

use std::path::Path;

use anyhow::Context as _;
use tracing::debug;

use crate::{ConfigError, ConfigResult, ContextConfig};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "MODEL_CONTEXT_";

/// Parses a TOML document. Missing keys fall back to defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed documents or unknown keys and
/// any error reported by [`ContextConfig::validate`].
pub fn from_toml_str(document: &str) -> ConfigResult<ContextConfig> {
    let config: ContextConfig = toml::from_str(document).map_err(|err| ConfigError::Parse {
        reason: err.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Reads and parses a TOML file.
///
/// # Errors
///
/// Fails when the file cannot be read or its contents are invalid.
pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<ContextConfig> {
    let path = path.as_ref();
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    let config = from_toml_str(&document)
        .with_context(|| format!("parsing configuration from {}", path.display()))?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Applies `MODEL_CONTEXT_*` overrides from the process environment.
///
/// # Errors
///
/// See [`apply_env_from`].
pub fn apply_env(config: ContextConfig) -> ConfigResult<ContextConfig> {
    apply_env_from(config, |name| std::env::var(name).ok())
}

/// Applies overrides read through `lookup`, keyed by full variable name.
///
/// Recognised variables: `CHANNEL_ID`, `TARGET_ORIGIN`, `ALLOWED_ORIGINS`
/// (comma separated), `READY_TIMEOUT_MS`, `STRICT_SCHEMAS`, and `LOG`.
///
/// # Errors
///
/// Returns [`ConfigError::Env`] when a value cannot be parsed and any error
/// reported by [`ContextConfig::validate`].
pub fn apply_env_from<F>(mut config: ContextConfig, lookup: F) -> ConfigResult<ContextConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        let name = format!("{ENV_PREFIX}{suffix}");
        lookup(&name).map(|value| (name, value))
    };

    if let Some((_, value)) = var("CHANNEL_ID") {
        config.channel_id = value;
    }
    if let Some((_, value)) = var("TARGET_ORIGIN") {
        config.target_origin = value;
    }
    if let Some((_, value)) = var("ALLOWED_ORIGINS") {
        config.allowed_origins = value
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();
    }
    if let Some((name, value)) = var("READY_TIMEOUT_MS") {
        config.ready_timeout_ms = value.trim().parse().map_err(|err: std::num::ParseIntError| {
            ConfigError::Env {
                var: name,
                reason: err.to_string(),
            }
        })?;
    }
    if let Some((name, value)) = var("STRICT_SCHEMAS") {
        config.strict_schemas = parse_flag(&value).ok_or_else(|| ConfigError::Env {
            var: name,
            reason: format!("expected a boolean, got `{value}`"),
        })?;
    }
    if let Some((_, value)) = var("LOG") {
        config.log_filter = value;
    }

    config.validate()?;
    Ok(config)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
