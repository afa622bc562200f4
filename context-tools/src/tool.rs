//! Tool descriptors and handler traits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use context_primitives::ToolResult;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ExecutionContext;
use crate::schema::{NormalizedSchema, SchemaSource};

/// Converts a handler's return value into a [`ToolResult`].
pub trait IntoToolResult {
    /// Performs the conversion.
    fn into_tool_result(self) -> ToolResult;
}

impl IntoToolResult for ToolResult {
    fn into_tool_result(self) -> ToolResult {
        self
    }
}

impl IntoToolResult for String {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::text(self)
    }
}

impl IntoToolResult for &'static str {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::text(self)
    }
}

/// Objects shaped like a tool result are taken as-is; strings become a text
/// block; anything else becomes its JSON text, with objects also exposed as
/// structured content.
impl IntoToolResult for Value {
    fn into_tool_result(self) -> ToolResult {
        match self {
            Value::String(text) => ToolResult::text(text),
            Value::Object(map) if map.get("content").is_some_and(Value::is_array) => {
                let fallback = Value::Object(map.clone()).to_string();
                serde_json::from_value(Value::Object(map))
                    .unwrap_or_else(|_| ToolResult::text(fallback))
            }
            Value::Object(map) => {
                ToolResult::text(Value::Object(map.clone()).to_string()).with_structured(map)
            }
            other => ToolResult::text(other.to_string()),
        }
    }
}

/// Trait implemented by tool executors.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with validated arguments.
    async fn execute(&self, args: Value, ctx: ExecutionContext) -> anyhow::Result<ToolResult>;
}

#[async_trait]
impl<F, Fut, R> ToolHandler for F
where
    F: Send + Sync + Fn(Value, ExecutionContext) -> Fut,
    Fut: Future<Output = anyhow::Result<R>> + Send,
    R: IntoToolResult + Send,
{
    async fn execute(&self, args: Value, ctx: ExecutionContext) -> anyhow::Result<ToolResult> {
        (self)(args, ctx).await.map(IntoToolResult::into_tool_result)
    }
}

/// Everything needed to register a tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: Option<SchemaSource>,
    pub(crate) output_schema: Option<SchemaSource>,
    pub(crate) annotations: Option<Map<String, Value>>,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Creates a descriptor. Validation happens when it is registered.
    #[must_use]
    pub fn new<H>(name: impl Into<String>, description: impl Into<String>, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
            annotations: None,
            handler: Arc::new(handler),
        }
    }

    /// Sets the input schema. Without one, any object is accepted.
    #[must_use]
    pub fn with_input_schema(mut self, schema: impl Into<SchemaSource>) -> Self {
        self.input_schema = Some(schema.into());
        self
    }

    /// Sets the output schema checked against structured content.
    #[must_use]
    pub fn with_output_schema(mut self, schema: impl Into<SchemaSource>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    /// Attaches free-form annotations (hints such as `readOnlyHint`).
    #[must_use]
    pub fn with_annotations(mut self, annotations: Map<String, Value>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Immutable snapshot of a registered tool, as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Input schema.
    pub input_schema: Value,
    /// Output schema, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Annotations, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Map<String, Value>>,
}

pub(crate) struct RegisteredTool {
    pub(crate) id: u64,
    pub(crate) base: bool,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input: NormalizedSchema,
    pub(crate) output: Option<NormalizedSchema>,
    pub(crate) annotations: Option<Map<String, Value>>,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub(crate) fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input.json_schema().clone(),
            output_schema: self.output.as_ref().map(|s| s.json_schema().clone()),
            annotations: self.annotations.clone(),
        }
    }
}
