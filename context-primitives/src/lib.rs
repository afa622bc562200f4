//! Core shared types for exposing page tools to an external agent.

#![warn(missing_docs, clippy::pedantic)]

mod content;
mod envelope;
mod error;
mod ids;
pub mod jsonrpc;

/// Content blocks and result payloads returned by tools, resources, and prompts.
pub use content::{
    ContentBlock, GetPromptResult, PromptMessage, ReadResourceResult, ResourceContents, Role,
    ToolResult,
};
/// Wire envelope framing every message carried over a channel.
pub use envelope::{Direction, ENVELOPE_TYPE, Envelope, HandshakeSignal, Payload};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for windows, channels, and JSON-RPC requests.
pub use ids::{ChannelId, RequestId, WindowId};
/// JSON-RPC message shapes.
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
