//! Server end of a channel: readiness announcements and request dispatch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use context_primitives::{
    HandshakeSignal, JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelEvent, ChannelReceiver, RpcChannel};
use crate::lifecycle::{Lifecycle, TransportEvent, TransportState};
use crate::observer::{TracingObserver, TransportObserver};
use crate::{TransportError, TransportResult};

/// Trait implemented by whatever answers requests arriving on a server transport.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles a request, returning its result or a JSON-RPC error.
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError>;

    /// Handles a client notification. Defaults to ignoring it.
    async fn handle_notification(&self, _notification: JsonRpcNotification) {}
}

struct ServerShared {
    channel: RpcChannel,
    handler: Arc<dyn RequestHandler>,
    lifecycle: Mutex<Lifecycle>,
    observer: RwLock<Arc<dyn TransportObserver>>,
    shutdown: CancellationToken,
    close_notified: AtomicBool,
}

impl ServerShared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().expect("transport lifecycle poisoned")
    }

    fn observer(&self) -> Arc<dyn TransportObserver> {
        Arc::clone(&self.observer.read().expect("transport observer poisoned"))
    }

    fn announce(&self, signal: HandshakeSignal) {
        if let Err(err) = self.channel.send_handshake(signal) {
            warn!(%err, ?signal, "failed to send handshake signal");
        }
    }

    fn stop(&self, reason: Option<&TransportError>) {
        let was_running = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state().is_terminal() {
                return;
            }
            let was_running = lifecycle.state().is_ready();
            if reason.is_some() {
                let _ = lifecycle.transition(TransportEvent::Fail);
            }
            let _ = lifecycle.transition(TransportEvent::Close);
            was_running
        };
        if was_running {
            self.announce(HandshakeSignal::ServerStopped);
        }
        self.shutdown.cancel();

        let observer = self.observer();
        if let Some(error) = reason {
            observer.on_error(error);
        }
        debug!(channel = %self.channel.id(), "server transport stopped");
        if !self.close_notified.swap(true, Ordering::AcqRel) {
            observer.on_close();
        }
    }

    fn respond(&self, message: JsonRpcMessage) {
        if self.shutdown.is_cancelled() {
            trace!("dropping response; server stopped");
            return;
        }
        if let Err(err) = self.channel.send_message(message) {
            warn!(%err, "failed to send response");
        }
    }
}

async fn handle_request(shared: Arc<ServerShared>, request: JsonRpcRequest) {
    let JsonRpcRequest { id, method, params, .. } = request;
    trace!(%id, %method, "handling request");
    let reply = match shared.handler.handle_request(&method, params).await {
        Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::success(id, result)),
        Err(error) => {
            debug!(%method, code = error.code, "request failed");
            JsonRpcMessage::Error(JsonRpcErrorResponse::error(id, error))
        }
    };
    shared.respond(reply);
}

async fn run_reader(shared: Arc<ServerShared>, mut receiver: ChannelReceiver) {
    loop {
        let event = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return,
            event = receiver.next() => event,
        };
        match event {
            Some(ChannelEvent::Handshake(HandshakeSignal::CheckReady)) => {
                shared.announce(HandshakeSignal::ServerReady);
            }
            Some(ChannelEvent::Handshake(_)) => {}
            Some(ChannelEvent::Message(JsonRpcMessage::Request(request))) => {
                tokio::spawn(handle_request(Arc::clone(&shared), request));
            }
            Some(ChannelEvent::Message(JsonRpcMessage::Notification(notification))) => {
                shared.observer().on_notification(&notification);
                let handler = Arc::clone(&shared.handler);
                tokio::spawn(async move { handler.handle_notification(notification).await });
            }
            Some(ChannelEvent::Message(message)) => {
                trace!(id = ?message.id(), "ignoring response sent to server");
            }
            Some(ChannelEvent::Navigated) | None => {
                shared.stop(Some(&TransportError::Navigated));
                return;
            }
        }
    }
}

/// Server end of a channel. Stops on drop.
pub struct ServerTransport {
    shared: Arc<ServerShared>,
}

impl fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTransport")
            .field("channel", self.shared.channel.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerTransport {
    /// Creates a server that answers requests with `handler`.
    #[must_use]
    pub fn new(channel: RpcChannel, handler: Arc<dyn RequestHandler>) -> Self {
        let lifecycle = Lifecycle::new(channel.id().clone());
        Self {
            shared: Arc::new(ServerShared {
                channel,
                handler,
                lifecycle: Mutex::new(lifecycle),
                observer: RwLock::new(Arc::new(TracingObserver)),
                shutdown: CancellationToken::new(),
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

    /// Returns `true` once the server stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Starts listening and announces `mcp-server-ready`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Lifecycle`] if already started or stopped.
    pub fn start(&self) -> TransportResult<()> {
        self.shared.lifecycle().transition(TransportEvent::Connect)?;
        tokio::spawn(run_reader(Arc::clone(&self.shared), self.shared.channel.listen()));
        self.shared.lifecycle().transition(TransportEvent::HandshakeComplete)?;
        self.shared.announce(HandshakeSignal::ServerReady);
        debug!(channel = %self.shared.channel.id(), "server transport started");
        Ok(())
    }

    /// Pushes a notification to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] before [`start`](Self::start),
    /// [`TransportError::Closed`] after [`close`](Self::close), and
    /// [`TransportError::Encode`] if the message cannot be framed.
    pub fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        match self.state() {
            TransportState::Ready => {}
            TransportState::Unconnected | TransportState::Connecting => {
                return Err(TransportError::NotConnected);
            }
            TransportState::Closed | TransportState::Errored => return Err(TransportError::Closed),
        }
        self.shared
            .channel
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(method, params)))
    }

    /// Sends `mcp-server-stopped` and stops listening. Idempotent.
    pub fn close(&self) {
        self.shared.stop(None);
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        self.shared.stop(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use context_primitives::jsonrpc::error_codes;
    use context_primitives::{ChannelId, RequestId};
    use serde_json::json;

    use crate::bus::Window;
    use crate::channel::Role;

    struct Echo {
        notifications: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
            match method {
                "echo" => Ok(params.unwrap_or(Value::Null)),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(json!("slow"))
                }
                _ => Err(JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "method not found")),
            }
        }

        async fn handle_notification(&self, _notification: JsonRpcNotification) {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        page: Window,
        server: ServerTransport,
        client: RpcChannel,
        client_rx: ChannelReceiver,
        notifications: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let page = Window::new("https://shop.example");
        let notifications = Arc::new(AtomicUsize::new(0));
        let server = ServerTransport::new(
            RpcChannel::new(Role::Server, page.clone(), page.clone(), ChannelId::default()),
            Arc::new(Echo {
                notifications: Arc::clone(&notifications),
            }),
        );
        let client = RpcChannel::new(Role::Client, page.clone(), page.clone(), ChannelId::default());
        let client_rx = client.listen();
        Fixture {
            page,
            server,
            client,
            client_rx,
            notifications,
        }
    }

    async fn next_event(rx: &mut ChannelReceiver) -> Option<ChannelEvent> {
        tokio::time::timeout(Duration::from_millis(200), rx.next())
            .await
            .ok()
            .flatten()
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::Number(id), method, params))
    }

    #[tokio::test]
    async fn announces_on_start_and_answers_probes() {
        let Fixture { server, client, mut client_rx, .. } = fixture();
        server.start().unwrap();
        assert_eq!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerReady))
        );

        client.send_handshake(HandshakeSignal::CheckReady).unwrap();
        assert_eq!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerReady))
        );
        assert!(matches!(server.start(), Err(TransportError::Lifecycle(_))));
    }

    #[tokio::test]
    async fn requests_are_answered_concurrently() {
        let Fixture { server, client, mut client_rx, .. } = fixture();
        server.start().unwrap();
        next_event(&mut client_rx).await;

        client.send_message(request(1, "slow", None)).unwrap();
        client.send_message(request(2, "echo", Some(json!({ "x": 1 })))).unwrap();
        client.send_message(request(3, "nope", None)).unwrap();

        let mut answered = Vec::new();
        for _ in 0..3 {
            match next_event(&mut client_rx).await {
                Some(ChannelEvent::Message(message)) => answered.push(message),
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(answered[2].id(), Some(&RequestId::Number(1)));
        assert!(answered.iter().any(|m| matches!(
            m,
            JsonRpcMessage::Error(e) if e.error.code == error_codes::METHOD_NOT_FOUND
        )));
        assert!(answered.iter().any(|m| matches!(
            m,
            JsonRpcMessage::Response(r) if r.result == json!({ "x": 1 })
        )));
    }

    #[tokio::test]
    async fn notifications_reach_handler() {
        let Fixture { server, client, mut client_rx, notifications, .. } = fixture();
        server.start().unwrap();
        next_event(&mut client_rx).await;

        client
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/initialized",
                None,
            )))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_announces_stop_once() {
        let Fixture { server, mut client_rx, .. } = fixture();
        server.start().unwrap();
        next_event(&mut client_rx).await;

        server.close();
        server.close();
        assert_eq!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerStopped))
        );
        assert_eq!(next_event(&mut client_rx).await, None);
        assert!(server.is_closed());
        assert!(matches!(server.notify("x", None), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn frame_navigation_stops_server() {
        let top = Window::new("https://shop.example");
        let widget = top.frame("https://widget.example");
        let server = ServerTransport::new(
            RpcChannel::new(Role::Server, widget.clone(), top.clone(), ChannelId::default()),
            Arc::new(Echo {
                notifications: Arc::new(AtomicUsize::new(0)),
            }),
        );
        let client = RpcChannel::new(Role::Client, top.clone(), widget.clone(), ChannelId::default());
        let mut client_rx = client.listen();

        server.start().unwrap();
        assert_eq!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerReady))
        );

        widget.navigate(None);
        assert_eq!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerStopped))
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn notify_requires_start() {
        let Fixture { page: _page, server, mut client_rx, .. } = fixture();
        assert!(matches!(server.notify("x", None), Err(TransportError::NotConnected)));

        server.start().unwrap();
        next_event(&mut client_rx).await;
        server
            .notify("notifications/tools/list_changed", None)
            .unwrap();
        assert!(matches!(
            next_event(&mut client_rx).await,
            Some(ChannelEvent::Message(JsonRpcMessage::Notification(n)))
                if n.method == "notifications/tools/list_changed"
        ));
    }
}
