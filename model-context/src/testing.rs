//! In-process testing surface for driving a registry without a transport.

use std::fmt;
use std::sync::{Arc, Mutex};

use context_tools::{RegistryResult, SubscriptionId, ToolRegistry};
use context_transport::Window;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A tool as seen by test harnesses: the input schema is serialized JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingToolInfo {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Input schema as a JSON string.
    pub input_schema: String,
}

/// Drives the registry of one window directly.
#[derive(Clone)]
pub struct ModelContextTesting {
    registry: ToolRegistry,
    window: Window,
    cross_document: Arc<Mutex<Option<String>>>,
}

impl fmt::Debug for ModelContextTesting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContextTesting")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl ModelContextTesting {
    /// Creates a testing surface for `registry`, installed on `window`.
    #[must_use]
    pub fn new(registry: ToolRegistry, window: Window) -> Self {
        Self {
            registry,
            window,
            cross_document: Arc::new(Mutex::new(None)),
        }
    }

    /// Lists registered tools.
    #[must_use]
    pub fn list_tools(&self) -> Vec<TestingToolInfo> {
        self.registry
            .list_tools()
            .into_iter()
            .map(|tool| TestingToolInfo {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema.to_string(),
            })
            .collect()
    }

    /// Runs a tool with JSON-encoded arguments and returns its serialized
    /// result.
    ///
    /// Returns `Ok(None)` when the tool navigated the window. The result is
    /// then held for the next document and can be collected once with
    /// [`get_cross_document_script_tool_result`](Self::get_cross_document_script_tool_result).
    ///
    /// # Errors
    ///
    /// Propagates every [`context_tools::RegistryError`] from the call.
    ///
    /// # Panics
    ///
    /// Panics if the result slot lock is poisoned.
    pub async fn execute_tool(
        &self,
        name: &str,
        args_json: &str,
        signal: Option<CancellationToken>,
    ) -> RegistryResult<Option<String>> {
        let generation = self.window.generation();
        let result = self.registry.execute_tool(name, args_json, signal).await?;
        let serialized = serde_json::to_string(&result).unwrap_or_else(|_| String::from("null"));

        if self.window.generation() != generation {
            debug!(tool = %name, "tool navigated the window; holding result");
            *self.cross_document.lock().expect("cross-document slot poisoned") = Some(serialized);
            return Ok(None);
        }
        Ok(Some(serialized))
    }

    /// Installs the tools-changed callback, replacing any earlier one.
    ///
    /// # Panics
    ///
    /// Panics if the registry's callback slot lock is poisoned.
    pub fn register_tools_changed_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry.set_tools_changed_callback(callback)
    }

    /// Takes the result held for a tool that navigated the window.
    ///
    /// # Panics
    ///
    /// Panics if the result slot lock is poisoned.
    #[must_use]
    pub fn get_cross_document_script_tool_result(&self) -> Option<String> {
        self.cross_document
            .lock()
            .expect("cross-document slot poisoned")
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use context_primitives::ToolResult;
    use context_tools::{ExecutionContext, RegistryError, SchemaSource, ToolDescriptor};
    use serde_json::{Value, json};

    fn surface() -> (ModelContextTesting, Window) {
        let window = Window::new("https://shop.example");
        (
            ModelContextTesting::new(ToolRegistry::new(), window.clone()),
            window,
        )
    }

    #[tokio::test]
    async fn listing_serializes_input_schema() {
        let (testing, _window) = surface();
        testing
            .registry
            .register_tool(
                ToolDescriptor::new("search", "Searches the catalog", |_args: Value, _ctx: ExecutionContext| async move {
                    anyhow::Ok(ToolResult::text("[]"))
                })
                .with_input_schema(SchemaSource::json(json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"],
                }))),
            )
            .unwrap();

        let tools = testing.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "Searches the catalog");
        let schema: Value = serde_json::from_str(&tools[0].input_schema).unwrap();
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn navigating_tools_hand_off_their_result() {
        let (testing, window) = surface();
        let nav = window.clone();
        testing
            .registry
            .register_tool(ToolDescriptor::new(
                "checkout",
                "Goes to checkout",
                move |_args: Value, _ctx: ExecutionContext| {
                    let nav = nav.clone();
                    async move {
                        nav.navigate(Some("https://shop.example"));
                        anyhow::Ok(ToolResult::text("navigated"))
                    }
                },
            ))
            .unwrap();

        assert_eq!(testing.execute_tool("checkout", "", None).await.unwrap(), None);
        let held = testing.get_cross_document_script_tool_result().unwrap();
        assert!(held.contains("navigated"));
        assert_eq!(testing.get_cross_document_script_tool_result(), None);
    }

    #[tokio::test]
    async fn errors_propagate_and_results_serialize() {
        let (testing, _window) = surface();
        testing
            .registry
            .register_tool(ToolDescriptor::new("ok", "Fine", |_args: Value, _ctx: ExecutionContext| async move {
                anyhow::Ok("fine")
            }))
            .unwrap();

        let result = testing.execute_tool("ok", "{}", None).await.unwrap().unwrap();
        let parsed: ToolResult = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed.first_text(), Some("fine"));

        assert!(matches!(
            testing.execute_tool("ok", "[1]", None).await,
            Err(RegistryError::InvalidArguments { .. })
        ));
        assert!(matches!(
            testing.execute_tool("missing", "{}", None).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tools_changed_callback_ignores_other_lists() {
        let (testing, _window) = surface();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        testing.register_tools_changed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        testing
            .registry
            .register_prompt(context_tools::PromptDescriptor::new("p", |_args: Value| async move {
                anyhow::Ok(context_primitives::GetPromptResult::default())
            }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        testing
            .registry
            .register_tool(ToolDescriptor::new("t", "T", |_args: Value, _ctx: ExecutionContext| async move {
                anyhow::Ok("t")
            }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_tools_changed_callback_replaces_earlier() {
        let (testing, _window) = surface();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first);
        testing.register_tools_changed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        testing.register_tools_changed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        testing
            .registry
            .register_tool(ToolDescriptor::new("t", "T", |_args: Value, _ctx: ExecutionContext| async move {
                anyhow::Ok("t")
            }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
