//! Client end of a channel: handshake, request correlation, shutdown.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use context_primitives::jsonrpc::{MCP_PROTOCOL_VERSION, error_codes};
use context_primitives::{
    GetPromptResult, HandshakeSignal, JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, ReadResourceResult, RequestId, ToolResult,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelEvent, ChannelReceiver, RpcChannel};
use crate::lifecycle::{Lifecycle, TransportEvent, TransportState};
use crate::observer::{TracingObserver, TransportObserver};
use crate::{TransportConfig, TransportError, TransportResult};

struct PendingCall {
    method: String,
    created_at: DateTime<Utc>,
    responder: oneshot::Sender<TransportResult<Value>>,
}

struct ClientShared {
    channel: RpcChannel,
    config: TransportConfig,
    lifecycle: Mutex<Lifecycle>,
    pending: Mutex<HashMap<i64, PendingCall>>,
    next_id: AtomicI64,
    observer: RwLock<Arc<dyn TransportObserver>>,
    ready: Mutex<Option<oneshot::Sender<()>>>,
    shutdown: CancellationToken,
    close_reason: Mutex<Option<TransportError>>,
    close_notified: AtomicBool,
}

impl ClientShared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().expect("transport lifecycle poisoned")
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<i64, PendingCall>> {
        self.pending.lock().expect("pending calls poisoned")
    }

    fn observer(&self) -> Arc<dyn TransportObserver> {
        Arc::clone(&self.observer.read().expect("transport observer poisoned"))
    }

    fn terminal_error(&self) -> TransportError {
        self.close_reason
            .lock()
            .expect("close reason poisoned")
            .clone()
            .unwrap_or(TransportError::Closed)
    }

    fn mark_ready(&self) {
        let Some(ready) = self.ready.lock().expect("ready signal poisoned").take() else {
            trace!(channel = %self.channel.id(), "ignoring unsolicited server-ready");
            return;
        };
        match self.lifecycle().transition(TransportEvent::HandshakeComplete) {
            Ok(_) => {
                let _ = ready.send(());
            }
            Err(err) => debug!(%err, "server-ready arrived after the handshake was abandoned"),
        }
    }

    fn fail(&self, error: TransportError) {
        if self.lifecycle().transition(TransportEvent::Fail).is_err() {
            return;
        }
        self.close_reason
            .lock()
            .expect("close reason poisoned")
            .get_or_insert_with(|| error.clone());
        warn!(channel = %self.channel.id(), %error, "client transport failed");
        self.observer().on_error(&error);
        self.shut_down();
    }

    fn shut_down(&self) {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state().is_terminal() {
                return;
            }
            let _ = lifecycle.transition(TransportEvent::Close);
        }
        self.close_reason
            .lock()
            .expect("close reason poisoned")
            .get_or_insert(TransportError::Closed);
        self.shutdown.cancel();
        drop(self.ready.lock().expect("ready signal poisoned").take());

        let reason = self.terminal_error();
        let pending = std::mem::take(&mut *self.pending());
        for (id, call) in pending {
            trace!(id, method = %call.method, "rejecting pending call");
            let _ = call.responder.send(Err(reason.clone()));
        }

        debug!(channel = %self.channel.id(), %reason, "client transport closed");
        if !self.close_notified.swap(true, Ordering::AcqRel) {
            self.observer().on_close();
        }
    }

    fn dispatch(&self, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.settle(&response.id, Ok(response.result)),
            JsonRpcMessage::Error(failure) => self.settle(
                &failure.id,
                Err(TransportError::Rpc {
                    code: failure.error.code,
                    message: failure.error.message,
                }),
            ),
            JsonRpcMessage::Notification(notification) => {
                self.observer().on_notification(&notification);
            }
            JsonRpcMessage::Request(request) => {
                trace!(method = %request.method, "rejecting server-initiated request");
                let reply = JsonRpcErrorResponse::error(
                    request.id,
                    JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "client does not accept requests"),
                );
                if let Err(err) = self.channel.send_message(JsonRpcMessage::Error(reply)) {
                    warn!(%err, "failed to reject server request");
                }
            }
        }
    }

    fn settle(&self, id: &RequestId, result: TransportResult<Value>) {
        let RequestId::Number(id) = id else {
            trace!(%id, "dropping response with foreign id");
            return;
        };
        let Some(call) = self.pending().remove(id) else {
            trace!(id, "dropping response for unknown request");
            return;
        };
        let elapsed_ms = (Utc::now() - call.created_at).num_milliseconds();
        trace!(id, method = %call.method, elapsed_ms, ok = result.is_ok(), "response received");
        let _ = call.responder.send(result);
    }
}

async fn run_reader(shared: Arc<ClientShared>, mut receiver: ChannelReceiver) {
    loop {
        let event = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return,
            event = receiver.next() => event,
        };
        match event {
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerReady)) => shared.mark_ready(),
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerStopped)) => {
                shared.fail(TransportError::ServerStopped);
                return;
            }
            Some(ChannelEvent::Handshake(HandshakeSignal::CheckReady)) => {}
            Some(ChannelEvent::Message(message)) => shared.dispatch(message),
            Some(ChannelEvent::Navigated) | None => {
                shared.fail(TransportError::Navigated);
                return;
            }
        }
    }
}

/// Client end of a channel. Closes on drop.
pub struct ClientTransport {
    shared: Arc<ClientShared>,
}

impl fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransport")
            .field("channel", self.shared.channel.id())
            .field("state", &self.state())
            .field("pending", &self.shared.pending().len())
            .finish_non_exhaustive()
    }
}

impl ClientTransport {
    /// Creates an unconnected client.
    #[must_use]
    pub fn new(channel: RpcChannel, config: TransportConfig) -> Self {
        let lifecycle = Lifecycle::new(channel.id().clone());
        Self {
            shared: Arc::new(ClientShared {
                channel,
                config,
                lifecycle: Mutex::new(lifecycle),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                observer: RwLock::new(Arc::new(TracingObserver)),
                ready: Mutex::new(None),
                shutdown: CancellationToken::new(),
                close_reason: Mutex::new(None),
                close_notified: AtomicBool::new(false),
            }),
        }
    }

    /// Replaces the observer. Defaults to [`TracingObserver`].
    ///
    /// # Panics
    ///
    /// Panics if the observer lock is poisoned.
    pub fn set_observer(&self, observer: Arc<dyn TransportObserver>) {
        *self.shared.observer.write().expect("transport observer poisoned") = observer;
    }

    /// Returns the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &RpcChannel {
        &self.shared.channel
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.lifecycle().state()
    }

    /// Returns `true` once the transport is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Performs the readiness handshake.
    ///
    /// # Errors
    ///
    /// - [`TransportError::HandshakeTimeout`] if the server stays silent; the
    ///   transport is closed afterwards;
    /// - [`TransportError::Navigated`] or [`TransportError::Closed`] if the
    ///   document unloads or [`close`](Self::close) is called meanwhile;
    /// - [`TransportError::Lifecycle`] when called twice.
    pub async fn connect(&self) -> TransportResult<()> {
        self.shared.config.validate()?;
        self.shared.lifecycle().transition(TransportEvent::Connect)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        *self.shared.ready.lock().expect("ready signal poisoned") = Some(ready_tx);
        tokio::spawn(run_reader(Arc::clone(&self.shared), self.shared.channel.listen()));

        debug!(channel = %self.shared.channel.id(), "probing for server");
        if let Err(err) = self.shared.channel.send_handshake(HandshakeSignal::CheckReady) {
            self.shared.fail(err.clone());
            return Err(err);
        }

        let timeout = self.shared.config.ready_timeout();
        tokio::select! {
            ready = ready_rx => match ready {
                Ok(()) => {
                    debug!(channel = %self.shared.channel.id(), "server ready");
                    Ok(())
                }
                Err(_) => Err(self.shared.terminal_error()),
            },
            () = tokio::time::sleep(timeout) => {
                let err = TransportError::HandshakeTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                self.shared.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Sends a request and waits for the response with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Rpc`] for JSON-RPC error responses,
    /// [`TransportError::NotConnected`] before the handshake, and the terminal
    /// error of the transport once it is closed.
    pub async fn request(&self, method: &str, params: Option<Value>) -> TransportResult<Value> {
        self.ensure_ready()?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if self.shared.shutdown.is_cancelled() {
                return Err(self.shared.terminal_error());
            }
            pending.insert(
                id,
                PendingCall {
                    method: method.to_owned(),
                    created_at: Utc::now(),
                    responder: tx,
                },
            );
        }

        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);
        if let Err(err) = self.shared.channel.send_message(JsonRpcMessage::Request(request)) {
            self.shared.pending().remove(&id);
            return Err(err);
        }
        trace!(id, method, "request sent");

        rx.await.unwrap_or_else(|_| Err(self.shared.terminal_error()))
    }

    /// Sends a request and decodes its result.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request); additionally
    /// [`TransportError::Encode`] when the result has the wrong shape.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> TransportResult<T> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result).map_err(TransportError::encode)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Fails when the transport is not ready or the message cannot be encoded.
    pub fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        self.ensure_ready()?;
        self.shared
            .channel
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(method, params)))
    }

    /// Closes the transport, rejecting pending calls with
    /// [`TransportError::Closed`]. Idempotent.
    pub fn close(&self) {
        self.shared.shut_down();
    }

    fn ensure_ready(&self) -> TransportResult<()> {
        match self.state() {
            TransportState::Ready => Ok(()),
            TransportState::Unconnected | TransportState::Connecting => {
                Err(TransportError::NotConnected)
            }
            TransportState::Closed | TransportState::Errored => Err(self.shared.terminal_error()),
        }
    }

    /// Runs `initialize` and then sends `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn initialize(&self, client_name: &str, client_version: &str) -> TransportResult<Value> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": client_name, "version": client_version },
                })),
            )
            .await?;
        self.notify("notifications/initialized", None)?;
        Ok(result)
    }

    /// Sends `ping`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn ping(&self) -> TransportResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Lists tools.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn list_tools(&self) -> TransportResult<Vec<Value>> {
        self.list("tools/list", "tools").await
    }

    /// Calls a tool.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> TransportResult<ToolResult> {
        self.request_as("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    /// Lists static resources.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn list_resources(&self) -> TransportResult<Vec<Value>> {
        self.list("resources/list", "resources").await
    }

    /// Lists resource templates.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn list_resource_templates(&self) -> TransportResult<Vec<Value>> {
        self.list("resources/templates/list", "resourceTemplates").await
    }

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn read_resource(&self, uri: &str) -> TransportResult<ReadResourceResult> {
        self.request_as("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// Lists prompts.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn list_prompts(&self) -> TransportResult<Vec<Value>> {
        self.list("prompts/list", "prompts").await
    }

    /// Renders a prompt.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> TransportResult<GetPromptResult> {
        self.request_as("prompts/get", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    async fn list(&self, method: &str, field: &str) -> TransportResult<Vec<Value>> {
        let mut result = self.request(method, None).await?;
        match result.get_mut(field).map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(TransportError::encode(format!(
                "`{method}` result has no `{field}` array"
            ))),
        }
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.shared.shut_down();
    }
}
