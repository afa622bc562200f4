//! Wire envelope framing channel traffic on a shared message bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jsonrpc::JsonRpcMessage;
use crate::{ChannelId, Error, Result};

/// Value of the `type` field on every envelope.
pub const ENVELOPE_TYPE: &str = "mcp";

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Sent by the client, accepted only by the server.
    ClientToServer,
    /// Sent by the server, accepted only by the client.
    ServerToClient,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::ClientToServer => Self::ServerToClient,
            Self::ServerToClient => Self::ClientToServer,
        }
    }
}

/// Readiness signals exchanged before and around RPC traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeSignal {
    /// Client probe asking whether a server is listening.
    #[serde(rename = "mcp-check-ready")]
    CheckReady,
    /// Server announcement that it is listening.
    #[serde(rename = "mcp-server-ready")]
    ServerReady,
    /// Server announcement that it has stopped.
    #[serde(rename = "mcp-server-stopped")]
    ServerStopped,
}

/// Envelope payload: a bare handshake string or a JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Handshake signal.
    Handshake(HandshakeSignal),
    /// JSON-RPC traffic.
    Message(JsonRpcMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum EnvelopeKind {
    #[serde(rename = "mcp")]
    Mcp,
}

/// `{ channel, type: "mcp", direction, payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    channel: ChannelId,
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    direction: Direction,
    payload: Payload,
}

impl Envelope {
    /// Creates an envelope for the given channel and direction.
    #[must_use]
    pub fn new(channel: ChannelId, direction: Direction, payload: Payload) -> Self {
        Self {
            channel,
            kind: EnvelopeKind::Mcp,
            direction,
            payload,
        }
    }

    /// Returns the channel the envelope was sent on.
    #[must_use]
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Returns the travel direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the envelope, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Decodes an envelope from raw bus data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnvelope`] when the data is not a well-formed
    /// envelope (wrong `type`, unknown direction, undecodable payload).
    pub fn decode(data: &Value) -> Result<Self> {
        Self::deserialize(data).map_err(|err| Error::InvalidEnvelope {
            reason: err.to_string(),
        })
    }

    /// Encodes the envelope into bus data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnvelope`] if the payload cannot be represented
    /// as JSON.
    pub fn encode(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|err| Error::InvalidEnvelope {
            reason: err.to_string(),
        })
    }
}
