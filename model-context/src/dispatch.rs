//! MCP request dispatch over a [`ToolRegistry`].

use async_trait::async_trait;
use context_primitives::jsonrpc::{MCP_PROTOCOL_VERSION, error_codes};
use context_primitives::{JsonRpcError, JsonRpcNotification, ToolResult};
use context_tools::{CallToolParams, RegistryError, ToolRegistry};
use context_transport::RequestHandler;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

/// Text returned in place of a failed handler's error.
pub const TOOL_EXECUTION_FAILED: &str = "Tool execution failed";

/// Name and version announced in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[derive(Deserialize)]
struct ReadResourceParams {
    uri: String,
}

#[derive(Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// Serves MCP methods from a registry.
#[derive(Debug, Clone)]
pub struct McpDispatcher {
    registry: ToolRegistry,
    info: ServerInfo,
    shutdown: CancellationToken,
}

impl McpDispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: ToolRegistry, info: ServerInfo) -> Self {
        Self {
            registry,
            info,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the registry requests are resolved against.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Cancels every in-flight tool call. Later calls are rejected as cancelled.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "listChanged": true },
                "prompts": { "listChanged": true },
            },
            "serverInfo": { "name": self.info.name, "version": self.info.version },
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;
        let name = params.name.clone();
        match self
            .registry
            .call_tool(params, Some(self.shutdown.child_token()))
            .await
        {
            Ok(result) => to_value(&result),
            Err(RegistryError::InvocationFailed { .. }) => {
                debug!(tool = %name, "reporting handler failure as tool error");
                to_value(&ToolResult::error(TOOL_EXECUTION_FAILED))
            }
            Err(err) => Err(rpc_error(&err)),
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let ReadResourceParams { uri } = parse_params(params)?;
        let result = self
            .registry
            .read_resource(&uri)
            .await
            .map_err(|err| rpc_error(&err))?;
        to_value(&result)
    }

    async fn get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let GetPromptParams { name, arguments } = parse_params(params)?;
        let result = self
            .registry
            .get_prompt(&name, arguments)
            .await
            .map_err(|err| rpc_error(&err))?;
        to_value(&result)
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list_tools() })),
            "tools/call" => self.call_tool(params).await,
            "resources/list" => Ok(json!({ "resources": self.registry.list_resources() })),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": self.registry.list_resource_templates()
            })),
            "resources/read" => self.read_resource(params).await,
            "prompts/list" => Ok(json!({ "prompts": self.registry.list_prompts() })),
            "prompts/get" => self.get_prompt(params).await,
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }
}

#[async_trait]
impl RequestHandler for McpDispatcher {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        self.dispatch(method, params)
            .instrument(debug_span!("mcp.request", method = %method))
            .await
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        debug!(method = %notification.method, "client notification");
    }
}

/// Maps a registry failure onto a JSON-RPC error.
///
/// Lookup and validation failures become `-32602`, cancellation `-32800`, and
/// everything else `-32603` with a generic message.
#[must_use]
pub fn rpc_error(err: &RegistryError) -> JsonRpcError {
    if err.is_not_found() || err.is_validation() {
        JsonRpcError::new(error_codes::INVALID_PARAMS, err.to_string())
    } else if err.is_cancelled() {
        JsonRpcError::new(error_codes::REQUEST_CANCELLED, err.to_string())
    } else {
        warn!(error = %err, "request failed");
        JsonRpcError::new(error_codes::INTERNAL_ERROR, "internal error")
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| JsonRpcError::new(error_codes::INVALID_PARAMS, format!("invalid params: {err}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|err| JsonRpcError::new(error_codes::INTERNAL_ERROR, format!("encoding failed: {err}")))
}
