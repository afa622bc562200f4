//! Connection state machine shared by client and server transports.

use context_primitives::ChannelId;
use thiserror::Error;
use tracing::debug;

/// States a transport can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, nothing sent yet.
    Unconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; requests may flow.
    Ready,
    /// Closed; no further traffic.
    Closed,
    /// Failed; will close.
    Errored,
}

impl TransportState {
    /// Returns `true` when requests may be sent.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` once the transport is closed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Events that drive transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Begin the handshake.
    Connect,
    /// The peer confirmed readiness.
    HandshakeComplete,
    /// Something went wrong: timeout, navigation, peer stopped.
    Fail,
    /// Shut down.
    Close,
}

/// Tracks the state of one transport instance.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    channel: ChannelId,
    state: TransportState,
}

impl Lifecycle {
    /// Creates a lifecycle in [`TransportState::Unconnected`].
    #[must_use]
    pub const fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            state: TransportState::Unconnected,
        }
    }

    /// Returns the channel this lifecycle belongs to.
    #[must_use]
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> TransportState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: TransportEvent) -> LifecycleResult<TransportState> {
        use TransportState::{Closed, Connecting, Errored, Ready, Unconnected};

        let next = match (self.state, event) {
            (Unconnected, TransportEvent::Connect) => Some(Connecting),
            (Connecting, TransportEvent::HandshakeComplete) => Some(Ready),
            (Unconnected | Connecting | Ready, TransportEvent::Fail) => Some(Errored),
            (_, TransportEvent::Close) => Some(Closed),
            _ => None,
        };

        let Some(next_state) = next else {
            debug!(channel = %self.channel, from = ?self.state, ?event, "rejected transport transition");
            return Err(LifecycleError::InvalidTransition {
                channel: self.channel.clone(),
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(
                channel = %self.channel,
                ?self.state,
                ?next_state,
                ?event,
                "transport transition"
            );
            self.state = next_state;
        }

        Ok(self.state)
    }
}

/// Errors emitted by the lifecycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid transport transition from {from:?} via {event:?} on channel {channel}")]
    InvalidTransition {
        /// Channel whose transition failed.
        channel: ChannelId,
        /// State prior to the attempted transition.
        from: TransportState,
        /// Event that triggered the failure.
        event: TransportEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_ready_flow() {
        let mut lifecycle = Lifecycle::new(ChannelId::default());

        assert_eq!(lifecycle.state(), TransportState::Unconnected);
        lifecycle.transition(TransportEvent::Connect).unwrap();
        assert_eq!(lifecycle.state(), TransportState::Connecting);
        lifecycle.transition(TransportEvent::HandshakeComplete).unwrap();
        assert!(lifecycle.state().is_ready());
    }

    #[test]
    fn connecting_twice_is_rejected() {
        let mut lifecycle = Lifecycle::new(ChannelId::default());
        lifecycle.transition(TransportEvent::Connect).unwrap();

        let err = lifecycle
            .transition(TransportEvent::Connect)
            .expect_err("second connect should fail");
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: TransportState::Connecting,
                ..
            }
        ));
    }

    #[test]
    fn failure_then_close() {
        let mut lifecycle = Lifecycle::new(ChannelId::default());
        lifecycle.transition(TransportEvent::Connect).unwrap();
        lifecycle.transition(TransportEvent::Fail).unwrap();
        assert_eq!(lifecycle.state(), TransportState::Errored);

        assert!(lifecycle.transition(TransportEvent::Fail).is_err());
        lifecycle.transition(TransportEvent::Close).unwrap();
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let mut lifecycle = Lifecycle::new(ChannelId::default());
        lifecycle.transition(TransportEvent::Close).unwrap();
        lifecycle.transition(TransportEvent::Close).unwrap();
        assert!(lifecycle.state().is_terminal());
        assert!(lifecycle.transition(TransportEvent::Connect).is_err());
    }
}
