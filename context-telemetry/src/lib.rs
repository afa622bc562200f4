//! Observability utilities for model context hosts.

#![warn(missing_docs, clippy::pedantic)]

pub mod tracing_support {
    //! Structured tracing helpers.

    use tracing_subscriber::EnvFilter;

    /// Installs a global `fmt` subscriber filtered by `RUST_LOG`, or by
    /// `default_filter` when the variable is unset or malformed.
    ///
    /// Returns `false` when a global subscriber was already installed, which
    /// makes repeated calls harmless.
    pub fn init(default_filter: &str) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    }

}
