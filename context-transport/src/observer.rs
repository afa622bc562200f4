//! Callbacks for transport lifecycle events.

use std::sync::Arc;

use context_primitives::JsonRpcNotification;
use tracing::{debug, warn};

use crate::TransportError;

/// Observer notified about transport events. Every method defaults to a no-op.
pub trait TransportObserver: Send + Sync {
    /// Called exactly once when the transport closes.
    fn on_close(&self) {}

    /// Called when the transport fails, before it closes.
    fn on_error(&self, _error: &TransportError) {}

    /// Called for every notification received from the peer.
    fn on_notification(&self, _notification: &JsonRpcNotification) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransportObserver for NoopObserver {}

/// Observer that emits events to the tracing system.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransportObserver for TracingObserver {
    fn on_close(&self) {
        debug!("transport closed");
    }

    fn on_error(&self, error: &TransportError) {
        warn!(%error, "transport error");
    }

    fn on_notification(&self, notification: &JsonRpcNotification) {
        debug!(method = %notification.method, "notification received");
    }
}

/// Forwards events to a collection of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn TransportObserver>>,
}

impl CompositeObserver {
    /// Creates a composite observer from the supplied list.
    #[must_use]
    pub fn new<I>(observers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn TransportObserver>>,
    {
        Self {
            observers: observers.into_iter().collect(),
        }
    }

    /// Adds an observer.
    pub fn push(&mut self, observer: Arc<dyn TransportObserver>) {
        self.observers.push(observer);
    }
}

impl TransportObserver for CompositeObserver {
    fn on_close(&self) {
        for observer in &self.observers {
            observer.on_close();
        }
    }

    fn on_error(&self, error: &TransportError) {
        for observer in &self.observers {
            observer.on_error(error);
        }
    }

    fn on_notification(&self, notification: &JsonRpcNotification) {
        for observer in &self.observers {
            observer.on_notification(notification);
        }
    }
}
