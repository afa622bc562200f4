//! Typed RPC channel over the window bus.

use context_primitives::{
    ChannelId, Direction, Envelope, HandshakeSignal, JsonRpcMessage, Payload, WindowId,
};
use tracing::trace;

use crate::bus::{ANY_ORIGIN, BusEvent, MessageEvent, Window, WindowListener};
use crate::error::TransportResult;

/// Which end of the channel this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `client-to-server`, accepts `server-to-client`.
    Client,
    /// Sends `server-to-client`, accepts `client-to-server`.
    Server,
}

impl Role {
    /// Direction of outgoing envelopes.
    #[must_use]
    pub const fn outgoing(self) -> Direction {
        match self {
            Self::Client => Direction::ClientToServer,
            Self::Server => Direction::ServerToClient,
        }
    }

    /// Direction of envelopes this role accepts.
    #[must_use]
    pub const fn incoming(self) -> Direction {
        self.outgoing().reverse()
    }
}

/// Which sender origins a receiver accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginFilter {
    /// Accept every origin.
    #[default]
    Any,
    /// Accept only the listed origins.
    Only(Vec<String>),
}

impl OriginFilter {
    /// Builds a filter from a list, where an empty list or a `*` entry means any.
    #[must_use]
    pub fn from_list(origins: &[String]) -> Self {
        if origins.is_empty() || origins.iter().any(|o| o == ANY_ORIGIN) {
            Self::Any
        } else {
            Self::Only(origins.to_vec())
        }
    }

    /// Returns `true` if `origin` passes the filter.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(allowed) => allowed.iter().any(|o| o == origin),
        }
    }
}

/// A filtered, decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Readiness signal from the peer.
    Handshake(HandshakeSignal),
    /// JSON-RPC traffic from the peer.
    Message(JsonRpcMessage),
    /// The local document navigated away.
    Navigated,
}

/// One end of a channel between two windows (possibly the same window).
#[derive(Debug, Clone)]
pub struct RpcChannel {
    role: Role,
    local: Window,
    peer: Window,
    channel: ChannelId,
    target_origin: String,
    allowed_origins: OriginFilter,
}

impl RpcChannel {
    /// Creates a channel that listens on `local` and posts to `peer`.
    ///
    /// For same-tab transports both are the same window. Defaults: target
    /// origin `*`, any sender origin accepted.
    #[must_use]
    pub fn new(role: Role, local: Window, peer: Window, channel: ChannelId) -> Self {
        Self {
            role,
            local,
            peer,
            channel,
            target_origin: ANY_ORIGIN.to_owned(),
            allowed_origins: OriginFilter::Any,
        }
    }

    /// Sets the origin posted messages are restricted to.
    #[must_use]
    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }

    /// Sets the sender origins accepted on receipt.
    #[must_use]
    pub fn with_allowed_origins(mut self, filter: OriginFilter) -> Self {
        self.allowed_origins = filter;
        self
    }

    /// Returns the channel identifier.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.channel
    }

    /// Returns this end's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the window this end listens on.
    #[must_use]
    pub fn local(&self) -> &Window {
        &self.local
    }

    /// Returns the window this end posts to.
    #[must_use]
    pub fn peer(&self) -> &Window {
        &self.peer
    }

    /// Sends a handshake signal.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`](crate::TransportError::Encode) if the
    /// envelope cannot be encoded.
    pub fn send_handshake(&self, signal: HandshakeSignal) -> TransportResult<()> {
        self.send(Payload::Handshake(signal))
    }

    /// Sends a JSON-RPC message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`](crate::TransportError::Encode) if the
    /// envelope cannot be encoded.
    pub fn send_message(&self, message: JsonRpcMessage) -> TransportResult<()> {
        self.send(Payload::Message(message))
    }

    fn send(&self, payload: Payload) -> TransportResult<()> {
        let data = Envelope::new(self.channel.clone(), self.role.outgoing(), payload).encode()?;
        let delivered = self.peer.post_message(data, &self.local, &self.target_origin);
        trace!(channel = %self.channel, role = ?self.role, delivered, "posted envelope");
        Ok(())
    }

    /// Attaches a receiver to the local window's current document.
    #[must_use]
    pub fn listen(&self) -> ChannelReceiver {
        ChannelReceiver {
            listener: self.local.listen(),
            filter: Filter {
                peer: self.peer.id(),
                channel: self.channel.clone(),
                accept: self.role.incoming(),
                origins: self.allowed_origins.clone(),
            },
        }
    }
}

#[derive(Debug)]
struct Filter {
    peer: WindowId,
    channel: ChannelId,
    accept: Direction,
    origins: OriginFilter,
}

impl Filter {
    fn accept(&self, event: MessageEvent) -> Option<Payload> {
        if event.source != self.peer {
            trace!(source = %event.source, "dropping message from unexpected window");
            return None;
        }
        if !self.origins.allows(&event.origin) {
            trace!(origin = %event.origin, "dropping message from disallowed origin");
            return None;
        }
        let envelope = match Envelope::decode(&event.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                trace!(error = %err, "dropping undecodable message");
                return None;
            }
        };
        if envelope.channel() != &self.channel || envelope.direction() != self.accept {
            trace!(
                channel = %envelope.channel(),
                direction = ?envelope.direction(),
                "dropping message for another channel or direction"
            );
            return None;
        }
        Some(envelope.into_payload())
    }
}

/// Receiving half of an [`RpcChannel`].
#[derive(Debug)]
pub struct ChannelReceiver {
    listener: WindowListener,
    filter: Filter,
}

impl ChannelReceiver {
    /// Waits for the next accepted event.
    ///
    /// Returns [`ChannelEvent::Navigated`] once when the local document
    /// unloads, and `None` afterwards.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.listener.recv().await? {
                BusEvent::Unload => return Some(ChannelEvent::Navigated),
                BusEvent::Message(event) => match self.filter.accept(event) {
                    Some(Payload::Handshake(signal)) => return Some(ChannelEvent::Handshake(signal)),
                    Some(Payload::Message(message)) => return Some(ChannelEvent::Message(message)),
                    None => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_primitives::JsonRpcNotification;
    use serde_json::json;
    use std::time::Duration;

    async fn next_within(rx: &mut ChannelReceiver) -> Option<ChannelEvent> {
        tokio::time::timeout(Duration::from_millis(50), rx.next())
            .await
            .ok()
            .flatten()
    }

    fn same_tab() -> (Window, RpcChannel, RpcChannel) {
        let page = Window::new("https://shop.example");
        let client = RpcChannel::new(Role::Client, page.clone(), page.clone(), ChannelId::default());
        let server = RpcChannel::new(Role::Server, page.clone(), page.clone(), ChannelId::default());
        (page, client, server)
    }

    #[tokio::test]
    async fn roles_only_see_the_other_direction() {
        let (_page, client, server) = same_tab();
        let mut client_rx = client.listen();
        let mut server_rx = server.listen();

        client.send_handshake(HandshakeSignal::CheckReady).unwrap();
        assert_eq!(
            next_within(&mut server_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::CheckReady))
        );
        assert_eq!(next_within(&mut client_rx).await, None);

        server.send_handshake(HandshakeSignal::ServerReady).unwrap();
        assert_eq!(
            next_within(&mut client_rx).await,
            Some(ChannelEvent::Handshake(HandshakeSignal::ServerReady))
        );
    }

    #[tokio::test]
    async fn other_channels_and_foreign_data_are_dropped() {
        let (page, client, _server) = same_tab();
        let other = RpcChannel::new(
            Role::Server,
            page.clone(),
            page.clone(),
            ChannelId::new("other").unwrap(),
        );
        let mut client_rx = client.listen();

        other.send_handshake(HandshakeSignal::ServerReady).unwrap();
        page.post_message(json!({ "type": "devtools" }), &page, ANY_ORIGIN);
        page.post_message(json!("mcp-server-ready"), &page, ANY_ORIGIN);
        assert_eq!(next_within(&mut client_rx).await, None);
    }

    #[tokio::test]
    async fn origin_filter_and_source_check() {
        let top = Window::new("https://shop.example");
        let widget = top.frame("https://widget.example");
        let stranger = Window::new("https://widget.example");

        let server = RpcChannel::new(Role::Server, widget.clone(), top.clone(), ChannelId::default())
            .with_allowed_origins(OriginFilter::Only(vec!["https://shop.example".into()]));
        let mut server_rx = server.listen();

        let impostor = RpcChannel::new(Role::Client, stranger, widget.clone(), ChannelId::default());
        impostor.send_handshake(HandshakeSignal::CheckReady).unwrap();
        assert_eq!(next_within(&mut server_rx).await, None);

        let client = RpcChannel::new(Role::Client, top.clone(), widget.clone(), ChannelId::default())
            .with_target_origin("https://widget.example");
        client
            .send_message(JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/initialized",
                None,
            )))
            .unwrap();
        assert!(matches!(
            next_within(&mut server_rx).await,
            Some(ChannelEvent::Message(JsonRpcMessage::Notification(_)))
        ));
    }

    #[tokio::test]
    async fn navigation_surfaces_once() {
        let (page, client, _server) = same_tab();
        let mut client_rx = client.listen();

        page.navigate(None);
        assert_eq!(client_rx.next().await, Some(ChannelEvent::Navigated));
        assert_eq!(client_rx.next().await, None);
    }

    #[test]
    fn origin_filter_from_list() {
        assert_eq!(OriginFilter::from_list(&[]), OriginFilter::Any);
        assert_eq!(OriginFilter::from_list(&["*".into()]), OriginFilter::Any);
        let only = OriginFilter::from_list(&["https://a.example".into()]);
        assert!(only.allows("https://a.example"));
        assert!(!only.allows("https://b.example"));
    }
}
