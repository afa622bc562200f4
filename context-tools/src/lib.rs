//! Page-side registry for tools, resources, and prompts.
//!
//! Providers register descriptors here; consumers list and invoke them. Every
//! mutation is folded into at most one change notification per scheduler turn
//! and per list kind, see [`notify`].

#![warn(missing_docs, clippy::pedantic)]

pub mod context;
pub mod error;
pub mod notify;
pub mod prompt;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod tool;

pub use context::ExecutionContext;
pub use error::{ListKind, RegistryError, RegistryResult};
pub use notify::{ChangeNotifier, DeferredScheduler, ManualScheduler, SubscriptionId, TokioScheduler};
pub use prompt::{PromptArgument, PromptDescriptor, PromptHandler, PromptInfo};
pub use registry::{
    CallToolParams, ContextBundle, RegistrationHandle, RegistryConfig, ToolRegistry,
    ToolRegistryBuilder,
};
pub use resource::{
    ResourceDescriptor, ResourceHandler, ResourceInfo, ResourceTemplateInfo, UriTemplate,
};
pub use schema::{NormalizedSchema, SchemaError, SchemaMode, SchemaSource};
pub use tool::{IntoToolResult, ToolDescriptor, ToolHandler, ToolInfo};
