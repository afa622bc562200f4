//! Runtime registry for tools, resources, and prompts.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use context_primitives::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::notify::{ChangeNotifier, DeferredScheduler, SubscriptionId, TokioScheduler};
use crate::prompt::{PromptDescriptor, RegisteredPrompt};
use crate::resource::{RegisteredResource, ResourceDescriptor};
use crate::schema::{self, NormalizedSchema, SchemaMode, SchemaSource};
use crate::tool::{RegisteredTool, ToolDescriptor, ToolInfo};
use crate::{ExecutionContext, ListKind, RegistryError, RegistryResult};

/// Registry-wide settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryConfig {
    schema_mode: SchemaMode,
}

impl RegistryConfig {
    /// Creates a configuration with the given schema mode.
    #[must_use]
    pub const fn new(schema_mode: SchemaMode) -> Self {
        Self { schema_mode }
    }

    /// Returns how schemas are checked at registration.
    #[must_use]
    pub const fn schema_mode(self) -> SchemaMode {
        self.schema_mode
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    config: RegistryConfig,
    scheduler: Option<Arc<dyn DeferredScheduler>>,
}

impl ToolRegistryBuilder {
    /// Sets the schema mode.
    #[must_use]
    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.config.schema_mode = mode;
        self
    }

    /// Installs the scheduler used to defer change notifications.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the registry. Defaults to [`TokioScheduler`].
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        ToolRegistry {
            shared: Arc::new(RegistryShared {
                state: RwLock::new(RegistryState::default()),
                notifier: ChangeNotifier::new(scheduler),
                config: self.config,
                next_id: AtomicU64::new(1),
                tools_callback: Mutex::new(None),
            }),
        }
    }
}

/// A full registration set handed to [`ToolRegistry::provide_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    /// Tools to expose.
    pub tools: Vec<ToolDescriptor>,
    /// Resources to expose.
    pub resources: Vec<ResourceDescriptor>,
    /// Prompts to expose.
    pub prompts: Vec<PromptDescriptor>,
}

impl ContextBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool.
    #[must_use]
    pub fn tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    /// Adds a resource.
    #[must_use]
    pub fn resource(mut self, resource: ResourceDescriptor) -> Self {
        self.resources.push(resource);
        self
    }

    /// Adds a prompt.
    #[must_use]
    pub fn prompt(mut self, prompt: PromptDescriptor) -> Self {
        self.prompts.push(prompt);
        self
    }
}

impl From<Vec<ToolDescriptor>> for ContextBundle {
    fn from(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments; absent means `{}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

impl CallToolParams {
    /// Creates call parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments: Some(arguments),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct RegistryState {
    pub(crate) tools: HashMap<String, Arc<RegisteredTool>>,
    pub(crate) resources: HashMap<String, Arc<RegisteredResource>>,
    pub(crate) prompts: HashMap<String, Arc<RegisteredPrompt>>,
}

pub(crate) struct RegistryShared {
    state: RwLock<RegistryState>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) config: RegistryConfig,
    next_id: AtomicU64,
    tools_callback: Mutex<Option<SubscriptionId>>,
}

impl RegistryShared {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().expect("tool registry poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().expect("tool registry poisoned")
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn normalize(&self, source: Option<SchemaSource>) -> RegistryResult<NormalizedSchema> {
        let source = source.unwrap_or_else(|| SchemaSource::json(schema::empty_object_schema()));
        Ok(schema::normalize(source, self.config.schema_mode())?)
    }

    /// Removes `key` from the `kind` list. With `id`, only that exact
    /// registration is removed, so a stale handle cannot drop a newer entry.
    pub(crate) fn remove_entry(&self, kind: ListKind, key: &str, id: Option<u64>) -> bool {
        let removed = {
            let mut state = self.write();
            match kind {
                ListKind::Tools => remove_matching(&mut state.tools, key, id, |t| t.id),
                ListKind::Resources => remove_matching(&mut state.resources, key, id, |r| r.id),
                ListKind::Prompts => remove_matching(&mut state.prompts, key, id, |p| p.id),
            }
        };
        if removed {
            debug!(%kind, name = key, "unregistered");
            self.notifier.mark(kind);
        }
        removed
    }
}

fn remove_matching<T>(
    map: &mut HashMap<String, Arc<T>>,
    key: &str,
    id: Option<u64>,
    id_of: impl Fn(&T) -> u64,
) -> bool {
    let matches = map
        .get(key)
        .is_some_and(|entry| id.is_none_or(|wanted| id_of(entry) == wanted));
    if matches {
        map.remove(key);
    }
    matches
}

/// Capability returned by `register_*`; unregistering through it is idempotent.
pub struct RegistrationHandle {
    registry: Weak<RegistryShared>,
    kind: ListKind,
    key: String,
    id: u64,
    removed: AtomicBool,
}

impl fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("kind", &self.kind)
            .field("name", &self.key)
            .field("removed", &self.removed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RegistrationHandle {
    pub(crate) fn new(shared: &Arc<RegistryShared>, kind: ListKind, key: String, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(shared),
            kind,
            key,
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Returns the registered name (or URI for resources).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key
    }

    /// Returns which list the registration belongs to.
    #[must_use]
    pub const fn kind(&self) -> ListKind {
        self.kind
    }

    /// Removes the registration. Later calls, and calls after the registry
    /// was cleared or dropped, do nothing.
    pub fn unregister(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.registry.upgrade() {
            shared.remove_entry(self.kind, &self.key, Some(self.id));
        }
    }
}

/// Registry that stores tools, resources, and prompts keyed by name.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct ToolRegistry {
    pub(crate) shared: Arc<RegistryShared>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.read();
        let mut tools: Vec<_> = state.tools.keys().cloned().collect();
        tools.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &tools)
            .field("resources", &state.resources.len())
            .field("prompts", &state.prompts.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Returns the registry configuration.
    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        self.shared.config
    }

    /// Subscribes to coalesced change notifications.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ListKind) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(callback)
    }

    /// Removes a change subscription.
    pub fn remove_change_listener(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    /// Installs the single tools-changed callback, replacing the previous one.
    ///
    /// # Panics
    ///
    /// Panics if the callback slot lock is poisoned.
    pub fn set_tools_changed_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.on_change(move |kind: ListKind| {
            if kind == ListKind::Tools {
                callback();
            }
        });
        let previous = self
            .shared
            .tools_callback
            .lock()
            .expect("tools callback slot poisoned")
            .replace(id);
        if let Some(previous) = previous {
            self.shared.notifier.unsubscribe(previous);
        }
        id
    }

    /// Replaces the base registration set.
    ///
    /// Every base entry is dropped and the bundle is staged one descriptor at a
    /// time. The first invalid descriptor aborts the call and the registry keeps
    /// its prior contents. Dynamic registrations made with `register_*` are
    /// kept, and a bundle name colliding with one is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`], [`RegistryError::Schema`],
    /// or [`RegistryError::Duplicate`].
    pub fn provide_context(&self, bundle: ContextBundle) -> RegistryResult<()> {
        let ContextBundle {
            tools,
            resources,
            prompts,
        } = bundle;

        let tools = tools
            .into_iter()
            .map(|d| self.prepare_tool(d, true))
            .collect::<RegistryResult<Vec<_>>>()?;
        let resources = resources
            .into_iter()
            .map(|d| self.prepare_resource(d, true))
            .collect::<RegistryResult<Vec<_>>>()?;
        let prompts = prompts
            .into_iter()
            .map(|d| self.prepare_prompt(d, true))
            .collect::<RegistryResult<Vec<_>>>()?;

        let (tool_count, resources_changed, prompts_changed) = {
            let mut state = self.shared.write();
            let mut next = state.clone();
            let had_base_resources = next.resources.values().any(|r| r.base);
            let had_base_prompts = next.prompts.values().any(|p| p.base);
            next.tools.retain(|_, t| !t.base);
            next.resources.retain(|_, r| !r.base);
            next.prompts.retain(|_, p| !p.base);

            let tool_count = tools.len();
            let resources_changed = had_base_resources || !resources.is_empty();
            let prompts_changed = had_base_prompts || !prompts.is_empty();

            for tool in tools {
                stage(&mut next.tools, ListKind::Tools, tool.name.clone(), tool)?;
            }
            for resource in resources {
                stage(&mut next.resources, ListKind::Resources, resource.uri.clone(), resource)?;
            }
            for prompt in prompts {
                stage(&mut next.prompts, ListKind::Prompts, prompt.name.clone(), prompt)?;
            }

            *state = next;
            (tool_count, resources_changed, prompts_changed)
        };

        self.shared.notifier.mark(ListKind::Tools);
        if resources_changed {
            self.shared.notifier.mark(ListKind::Resources);
        }
        if prompts_changed {
            self.shared.notifier.mark(ListKind::Prompts);
        }
        debug!(tools = tool_count, "context provided");
        Ok(())
    }

    /// Removes every tool, resource, and prompt.
    pub fn clear_context(&self) {
        let cleared = {
            let mut state = self.shared.write();
            let cleared = [
                !state.tools.is_empty(),
                !state.resources.is_empty(),
                !state.prompts.is_empty(),
            ];
            *state = RegistryState::default();
            cleared
        };
        for kind in ListKind::ALL {
            if cleared[kind.index()] {
                self.shared.notifier.mark(kind);
            }
        }
        debug!("context cleared");
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] or [`RegistryError::Schema`]
    /// if the descriptor fails validation and [`RegistryError::Duplicate`] if
    /// the name is already present.
    pub fn register_tool(&self, descriptor: ToolDescriptor) -> RegistryResult<RegistrationHandle> {
        let tool = self.prepare_tool(descriptor, false)?;
        let (name, id) = (tool.name.clone(), tool.id);
        {
            let mut state = self.shared.write();
            stage(&mut state.tools, ListKind::Tools, name.clone(), tool)?;
        }
        self.shared.notifier.mark(ListKind::Tools);
        debug!(tool = %name, "tool registered");
        Ok(RegistrationHandle::new(&self.shared, ListKind::Tools, name, id))
    }

    /// Removes a tool by name. Returns `false` if it was not registered.
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.shared.remove_entry(ListKind::Tools, name, None)
    }

    /// Returns `true` if a tool with this name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.shared.read().tools.contains_key(name)
    }

    /// Lists registered tools in registration order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let state = self.shared.read();
        let mut tools: Vec<_> = state.tools.values().collect();
        tools.sort_by_key(|t| t.id);
        tools.into_iter().map(|t| t.info()).collect()
    }

    /// Invokes a tool with structured arguments.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn call_tool(
        &self,
        params: CallToolParams,
        signal: Option<CancellationToken>,
    ) -> RegistryResult<ToolResult> {
        let args = Value::Object(params.arguments.unwrap_or_default());
        self.execute(&params.name, args, signal).await
    }

    /// Invokes a tool with arguments encoded as a JSON string. An empty string
    /// means no arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidArguments`] if `args_json` is not a JSON
    /// object, otherwise see [`execute`](Self::execute).
    pub async fn execute_tool(
        &self,
        name: &str,
        args_json: &str,
        signal: Option<CancellationToken>,
    ) -> RegistryResult<ToolResult> {
        let args = if args_json.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str::<Value>(args_json).map_err(|err| {
                RegistryError::InvalidArguments {
                    kind: ListKind::Tools,
                    name: name.to_owned(),
                    reason: format!("arguments are not valid JSON: {err}"),
                }
            })?
        };
        if !args.is_object() {
            return Err(RegistryError::InvalidArguments {
                kind: ListKind::Tools,
                name: name.to_owned(),
                reason: "arguments must be a JSON object".into(),
            });
        }
        self.execute(name, args, signal).await
    }

    /// Looks up, validates, and runs a tool.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] when no such tool exists;
    /// - [`RegistryError::InvalidArguments`] when `args` fail the input schema;
    /// - [`RegistryError::Cancelled`] when `signal` fires before or during the run;
    /// - [`RegistryError::InvocationFailed`] when the handler returns an error;
    /// - [`RegistryError::InvalidOutput`] when structured content fails the
    ///   output schema.
    ///
    /// None of the first two invoke the handler.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        signal: Option<CancellationToken>,
    ) -> RegistryResult<ToolResult> {
        let tool = self
            .shared
            .read()
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: ListKind::Tools,
                name: name.to_owned(),
            })?;

        tool.input
            .validate(&args)
            .map_err(|err| RegistryError::InvalidArguments {
                kind: ListKind::Tools,
                name: name.to_owned(),
                reason: err.to_string(),
            })?;

        let signal = signal.unwrap_or_default();
        if signal.is_cancelled() {
            return Err(RegistryError::Cancelled {
                name: name.to_owned(),
            });
        }

        let ctx = ExecutionContext::new(name, signal.clone());
        debug!(tool = %name, "executing tool");
        let outcome = tokio::select! {
            biased;
            () = signal.cancelled() => Err(RegistryError::Cancelled { name: name.to_owned() }),
            result = tool.handler.execute(args, ctx.clone()) => result.map_err(|err| {
                warn!(tool = %name, error = %err, "tool handler failed");
                RegistryError::InvocationFailed { kind: ListKind::Tools, name: name.to_owned() }
            }),
        };
        ctx.deactivate();
        let result = outcome?;

        if let (Some(output), Some(structured)) = (&tool.output, &result.structured_content) {
            if !result.is_error() {
                if let Err(err) = output.validate(&Value::Object(structured.clone())) {
                    warn!(tool = %name, error = %err, "structured content failed output schema");
                    return Err(RegistryError::InvalidOutput {
                        name: name.to_owned(),
                    });
                }
            }
        }

        Ok(result)
    }

    fn prepare_tool(&self, descriptor: ToolDescriptor, base: bool) -> RegistryResult<RegisteredTool> {
        let ToolDescriptor {
            name,
            description,
            input_schema,
            output_schema,
            annotations,
            handler,
        } = descriptor;

        if name.trim().is_empty() {
            return Err(RegistryError::invalid(ListKind::Tools, "tool name cannot be empty"));
        }
        if description.trim().is_empty() {
            return Err(RegistryError::invalid(
                ListKind::Tools,
                format!("tool `{name}` must have a description"),
            ));
        }

        let input = self.shared.normalize(input_schema)?;
        let output = output_schema
            .map(|source| self.shared.normalize(Some(source)))
            .transpose()?;

        Ok(RegisteredTool {
            id: self.shared.next_id(),
            base,
            name,
            description,
            input,
            output,
            annotations,
            handler,
        })
    }
}

/// Inserts an entry, rejecting an existing key.
pub(crate) fn stage<T>(
    map: &mut HashMap<String, Arc<T>>,
    kind: ListKind,
    key: String,
    entry: T,
) -> RegistryResult<()> {
    if map.contains_key(&key) {
        warn!(%kind, name = %key, "rejecting duplicate registration");
        return Err(RegistryError::Duplicate { kind, name: key });
    }
    map.insert(key, Arc::new(entry));
    Ok(())
}
