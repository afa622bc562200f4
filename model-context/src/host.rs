//! Installing and removing a model context on a window.

use std::sync::{Arc, Weak};

use context_primitives::ChannelId;
use context_tools::{ListKind, SchemaMode, SubscriptionId, ToolRegistry};
use context_transport::{
    ANY_ORIGIN, OriginFilter, Role, RpcChannel, ServerTransport, TransportResult, Window,
};
use tracing::{debug, info, trace};

use crate::dispatch::{McpDispatcher, ServerInfo};
use crate::testing::ModelContextTesting;

/// Settings for [`ModelContext::initialize`].
#[derive(Debug, Clone)]
pub struct ModelContextOptions {
    channel: ChannelId,
    peer: Option<Window>,
    target_origin: String,
    allowed_origins: OriginFilter,
    schema_mode: SchemaMode,
    server_info: ServerInfo,
}

impl Default for ModelContextOptions {
    fn default() -> Self {
        Self {
            channel: ChannelId::default(),
            peer: None,
            target_origin: ANY_ORIGIN.to_owned(),
            allowed_origins: OriginFilter::Any,
            schema_mode: SchemaMode::default(),
            server_info: ServerInfo::default(),
        }
    }
}

impl ModelContextOptions {
    /// Creates options for a same-window server on the default channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`context_config::ConfigError`] when the configuration is invalid.
    #[cfg(feature = "config")]
    pub fn from_config(
        config: &context_config::ContextConfig,
    ) -> context_config::ConfigResult<Self> {
        config.validate()?;
        let schema_mode = if config.strict_schemas {
            SchemaMode::Strict
        } else {
            SchemaMode::Lenient
        };
        Ok(Self {
            channel: config.channel()?,
            target_origin: config.target_origin.clone(),
            allowed_origins: OriginFilter::from_list(&config.allowed_origins),
            schema_mode,
            ..Self::default()
        })
    }

    /// Sets the channel name.
    #[must_use]
    pub fn channel(mut self, channel: ChannelId) -> Self {
        self.channel = channel;
        self
    }

    /// Serves a client living in another window, such as an embedding parent.
    #[must_use]
    pub fn peer(mut self, peer: Window) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Sets the origin outgoing messages are addressed to.
    #[must_use]
    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }

    /// Restricts which origins may talk to the server.
    #[must_use]
    pub fn allowed_origins(mut self, filter: OriginFilter) -> Self {
        self.allowed_origins = filter;
        self
    }

    /// Sets how descriptor schemas are checked.
    #[must_use]
    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    /// Sets the name and version announced to clients.
    #[must_use]
    pub fn server_info(mut self, info: ServerInfo) -> Self {
        self.server_info = info;
        self
    }
}

/// Client transport settings matching loaded configuration.
#[cfg(feature = "config")]
#[must_use]
pub fn client_config(config: &context_config::ContextConfig) -> context_transport::TransportConfig {
    context_transport::TransportConfig::new(config.ready_timeout())
}

/// Entry point for exposing a window's tools to agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelContext;

impl ModelContext {
    /// Creates a registry for `window`, starts an MCP server for it on the
    /// configured channel, and forwards registry changes to connected clients.
    ///
    /// Registry changes are flushed on the thread that made them, so the
    /// registry must be mutated from a current-thread runtime or, on a
    /// multi-thread runtime, from inside a [`tokio::task::LocalSet`].
    ///
    /// # Errors
    ///
    /// Returns a [`context_transport::TransportError`] when the server cannot
    /// start.
    pub fn initialize(window: &Window, options: ModelContextOptions) -> TransportResult<ModelContextHandle> {
        let ModelContextOptions {
            channel,
            peer,
            target_origin,
            allowed_origins,
            schema_mode,
            server_info,
        } = options;

        let registry = ToolRegistry::builder().schema_mode(schema_mode).build();
        let dispatcher = McpDispatcher::new(registry.clone(), server_info);
        let peer = peer.unwrap_or_else(|| window.clone());
        let channel = RpcChannel::new(Role::Server, window.clone(), peer, channel)
            .with_target_origin(target_origin)
            .with_allowed_origins(allowed_origins);
        let server = Arc::new(ServerTransport::new(channel, Arc::new(dispatcher.clone())));
        server.start()?;

        let forward: Weak<ServerTransport> = Arc::downgrade(&server);
        let subscription = registry.on_change(move |kind: ListKind| {
            let Some(server) = forward.upgrade() else {
                return;
            };
            if let Err(err) = server.notify(kind.notification_method(), None) {
                trace!(%err, %kind, "dropping list change notification");
            }
        });

        let testing = ModelContextTesting::new(registry.clone(), window.clone());
        info!(channel = %server.channel().id(), "model context initialized");
        Ok(ModelContextHandle {
            registry,
            dispatcher,
            server,
            window: window.clone(),
            subscription,
            testing,
        })
    }

    /// Stops the server, cancels running tool calls, and drops every
    /// registration.
    pub fn teardown(handle: ModelContextHandle) {
        let ModelContextHandle {
            registry,
            dispatcher,
            server,
            subscription,
            ..
        } = handle;
        registry.remove_change_listener(subscription);
        dispatcher.cancel_all();
        server.close();
        registry.clear_context();
        debug!(channel = %server.channel().id(), "model context torn down");
    }
}

/// A live model context returned by [`ModelContext::initialize`].
#[derive(Debug)]
pub struct ModelContextHandle {
    registry: ToolRegistry,
    dispatcher: McpDispatcher,
    server: Arc<ServerTransport>,
    window: Window,
    subscription: SubscriptionId,
    testing: ModelContextTesting,
}

impl ModelContextHandle {
    /// Returns the registry providers register into.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Returns the server transport.
    #[must_use]
    pub fn server(&self) -> &ServerTransport {
        &self.server
    }

    /// Returns the window the context was installed on.
    #[must_use]
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Returns the in-process testing surface.
    #[must_use]
    pub fn testing(&self) -> &ModelContextTesting {
        &self.testing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use context_primitives::{JsonRpcNotification, ToolResult};
    use context_tools::{ExecutionContext, ToolDescriptor};
    use context_transport::{ClientTransport, TransportConfig, TransportError, TransportObserver};
    use serde_json::{Value, json};

    #[derive(Default)]
    struct Notifications(Mutex<Vec<String>>);

    impl TransportObserver for Notifications {
        fn on_notification(&self, notification: &JsonRpcNotification) {
            self.0.lock().unwrap().push(notification.method.clone());
        }
    }

    fn echo() -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echoes", |args: Value, _ctx: ExecutionContext| async move {
            anyhow::Ok(ToolResult::text(args.to_string()))
        })
    }

    fn client_for(window: &Window) -> ClientTransport {
        ClientTransport::new(
            RpcChannel::new(Role::Client, window.clone(), window.clone(), ChannelId::default()),
            TransportConfig::new(Duration::from_millis(500)),
        )
    }

    #[tokio::test]
    async fn registry_changes_reach_connected_clients() {
        let page = Window::new("https://shop.example");
        let handle = ModelContext::initialize(&page, ModelContextOptions::new()).unwrap();
        let client = client_for(&page);
        let seen = Arc::new(Notifications::default());
        client.set_observer(seen.clone());
        client.connect().await.unwrap();

        handle.registry().register_tool(echo()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            *seen.0.lock().unwrap(),
            vec!["notifications/tools/list_changed".to_owned()]
        );

        let result = client.call_tool("echo", json!({ "x": 1 })).await.unwrap();
        assert_eq!(result.first_text(), Some(r#"{"x":1}"#));
    }

    #[tokio::test]
    async fn teardown_stops_server_and_clears_registry() {
        let page = Window::new("https://shop.example");
        let handle = ModelContext::initialize(&page, ModelContextOptions::new()).unwrap();
        let registry = handle.registry().clone();
        registry.register_tool(echo()).unwrap();
        let client = client_for(&page);
        client.connect().await.unwrap();

        ModelContext::teardown(handle);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(registry.list_tools().is_empty());
        assert_eq!(
            client.list_tools().await.unwrap_err(),
            TransportError::ServerStopped
        );
    }

    #[tokio::test]
    async fn frame_server_talks_to_parent_client() {
        let top = Window::new("https://shop.example");
        let widget = top.frame("https://widget.example");
        let handle = ModelContext::initialize(
            &widget,
            ModelContextOptions::new()
                .peer(top.clone())
                .target_origin("https://shop.example")
                .allowed_origins(OriginFilter::Only(vec!["https://shop.example".to_owned()])),
        )
        .unwrap();
        handle.registry().register_tool(echo()).unwrap();

        let client = ClientTransport::new(
            RpcChannel::new(Role::Client, top.clone(), widget.clone(), ChannelId::default())
                .with_target_origin("https://widget.example"),
            TransportConfig::default(),
        );
        client.connect().await.unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0]["name"], "echo");
    }

    #[cfg(feature = "config")]
    #[test]
    fn options_follow_configuration() {
        let config = context_config::from_toml_str(
            r#"
            channel_id = "checkout"
            strict_schemas = true
            allowed_origins = ["https://shop.example"]
            "#,
        )
        .unwrap();
        let options = ModelContextOptions::from_config(&config).unwrap();
        assert_eq!(options.channel.as_str(), "checkout");
        assert_eq!(options.schema_mode, SchemaMode::Strict);
        assert!(options.allowed_origins.allows("https://shop.example"));
        assert!(!options.allowed_origins.allows("https://evil.example"));
        assert_eq!(client_config(&config), TransportConfig::default());
    }
}
