//! Expose a page's tools, resources, and prompts to agents.
//!
//! [`ModelContext::initialize`] installs a registry on a [`Window`] and serves
//! it over a channel-based MCP transport. Agents connect with a
//! [`ClientTransport`]. The component crates are re-exported so most users only
//! depend on this one; configuration and telemetry sit behind the `config` and
//! `telemetry` features.
//!
//! ```no_run
//! use model_context::{ModelContext, ModelContextOptions, Window};
//! use model_context::tools::{ExecutionContext, ToolDescriptor};
//! use serde_json::Value;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let page = Window::new("https://shop.example");
//! let handle = ModelContext::initialize(&page, ModelContextOptions::new())?;
//! handle.registry().register_tool(ToolDescriptor::new(
//!     "greet",
//!     "Says hello",
//!     |_args: Value, _ctx: ExecutionContext| async move { anyhow::Ok("hello") },
//! ))?;
//! ModelContext::teardown(handle);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, clippy::pedantic)]

pub mod dispatch;
mod host;
pub mod testing;

/// Re-export shared primitives for convenience.
pub use context_primitives as primitives;

/// Tool, resource, and prompt registry.
pub use context_tools as tools;

/// Window bus and JSON-RPC transports.
pub use context_transport as transport;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use context_config as config;

/// Tracing bootstrap (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use context_telemetry as telemetry;

pub use context_primitives::ToolResult;
pub use context_tools::ToolRegistry;
pub use context_transport::{ClientTransport, TransportConfig, TransportError, Window};
pub use dispatch::{McpDispatcher, ServerInfo};
#[cfg(feature = "config")]
pub use host::client_config;
pub use host::{ModelContext, ModelContextHandle, ModelContextOptions};
pub use testing::{ModelContextTesting, TestingToolInfo};
