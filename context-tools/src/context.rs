//! Per-invocation execution context handed to tool handlers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{RegistryError, RegistryResult};

#[derive(Debug)]
struct ContextInner {
    tool: String,
    signal: CancellationToken,
    active: AtomicBool,
}

/// Gives a running handler access to cancellation and user interaction.
///
/// A context is created for exactly one call and goes inactive when that call
/// settles; clones share the same state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub(crate) fn new(tool: impl Into<String>, signal: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                tool: tool.into(),
                signal,
                active: AtomicBool::new(true),
            }),
        }
    }

    /// Returns the name of the tool being executed.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.inner.tool
    }

    /// Returns the abort signal for this call.
    #[must_use]
    pub fn signal(&self) -> &CancellationToken {
        &self.inner.signal
    }

    /// Returns `true` once the caller has cancelled the call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    /// Returns `false` once the call has settled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Runs a human-in-the-loop step on behalf of the handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ContextInactive`] if the call already settled and
    /// [`RegistryError::Cancelled`] if the signal fires while waiting.
    pub async fn request_user_interaction<F, Fut, T>(&self, interaction: F) -> RegistryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_active() {
            return Err(RegistryError::ContextInactive {
                name: self.inner.tool.clone(),
            });
        }

        debug!(tool = %self.inner.tool, "requesting user interaction");
        tokio::select! {
            biased;
            () = self.inner.signal.cancelled() => Err(RegistryError::Cancelled {
                name: self.inner.tool.clone(),
            }),
            output = interaction() => Ok(output),
        }
    }

    pub(crate) fn deactivate(&self) {
        self.inner.active.store(false, Ordering::Release);
    }
}
