//! Errors produced by registration, lookup, and invocation.

use std::fmt;

use thiserror::Error;

use crate::schema::SchemaError;

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The three lists a registry maintains, each with its own change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Callable tools.
    Tools,
    /// Readable resources and resource templates.
    Resources,
    /// Prompt templates.
    Prompts,
}

impl ListKind {
    /// Every list kind, in notification order.
    pub const ALL: [Self; 3] = [Self::Tools, Self::Resources, Self::Prompts];

    /// Returns the MCP notification method announcing a change to this list.
    #[must_use]
    pub const fn notification_method(self) -> &'static str {
        match self {
            Self::Tools => "notifications/tools/list_changed",
            Self::Resources => "notifications/resources/list_changed",
            Self::Prompts => "notifications/prompts/list_changed",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Tools => 0,
            Self::Resources => 1,
            Self::Prompts => 2,
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tools => "tool",
            Self::Resources => "resource",
            Self::Prompts => "prompt",
        })
    }
}

/// Errors produced by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A descriptor failed validation at registration time.
    #[error("invalid {kind} descriptor: {reason}")]
    InvalidDescriptor {
        /// Which list the descriptor targeted.
        kind: ListKind,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// The name (or URI) is already registered.
    #[error("{kind} `{name}` is already registered")]
    Duplicate {
        /// Which list the collision happened in.
        kind: ListKind,
        /// Name of the offending entry.
        name: String,
    },

    /// Requested entry does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Which list was searched.
        kind: ListKind,
        /// Name that was looked up.
        name: String,
    },

    /// Arguments did not satisfy the stored schema.
    #[error("invalid arguments for {kind} `{name}`: {reason}")]
    InvalidArguments {
        /// Which list the target belongs to.
        kind: ListKind,
        /// Target name.
        name: String,
        /// Validation failure description.
        reason: String,
    },

    /// Structured output did not satisfy the declared output schema.
    #[error("tool `{name}` produced output that does not match its output schema")]
    InvalidOutput {
        /// Tool name.
        name: String,
    },

    /// The handler failed. The underlying error is deliberately not carried.
    #[error("{kind} `{name}` failed to execute")]
    InvocationFailed {
        /// Which list the handler belongs to.
        kind: ListKind,
        /// Target name.
        name: String,
    },

    /// The abort signal fired before or during execution.
    #[error("execution of `{name}` was cancelled")]
    Cancelled {
        /// Target name.
        name: String,
    },

    /// An execution context was used after its call settled.
    #[error("execution context for `{name}` is no longer active")]
    ContextInactive {
        /// Tool the context belonged to.
        name: String,
    },

    /// Schema normalization failed in strict mode.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl RegistryError {
    pub(crate) fn invalid(kind: ListKind, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns `true` for lookup failures.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for argument or descriptor validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArguments { .. } | Self::InvalidDescriptor { .. } | Self::Schema(_)
        )
    }

    /// Returns `true` when the call was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
