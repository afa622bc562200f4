//! Prompt templates.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use context_primitives::GetPromptResult;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::registry::{RegistrationHandle, stage};
use crate::schema::{NormalizedSchema, SchemaSource};
use crate::{ListKind, RegistryError, RegistryResult, ToolRegistry};

/// Trait implemented by prompt renderers.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Renders the prompt with validated arguments.
    async fn get(&self, args: Value) -> anyhow::Result<GetPromptResult>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = anyhow::Result<GetPromptResult>> + Send,
{
    async fn get(&self, args: Value) -> anyhow::Result<GetPromptResult> {
        (self)(args).await
    }
}

/// Everything needed to register a prompt.
#[derive(Clone)]
pub struct PromptDescriptor {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) args_schema: Option<SchemaSource>,
    pub(crate) handler: Arc<dyn PromptHandler>,
}

impl fmt::Debug for PromptDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args_schema", &self.args_schema)
            .finish_non_exhaustive()
    }
}

impl PromptDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: PromptHandler + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            args_schema: None,
            handler: Arc::new(handler),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the schema prompt arguments are validated against.
    #[must_use]
    pub fn with_args_schema(mut self, schema: impl Into<SchemaSource>) -> Self {
        self.args_schema = Some(schema.into());
        self
    }

    /// Returns the prompt name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An argument a prompt accepts, derived from its schema's properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Description taken from the property schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the schema lists the argument as required.
    pub required: bool,
}

/// Listing entry for a prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptInfo {
    /// Prompt name.
    pub name: String,
    /// Description, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

pub(crate) struct RegisteredPrompt {
    pub(crate) id: u64,
    pub(crate) base: bool,
    pub(crate) name: String,
    description: Option<String>,
    args: Option<NormalizedSchema>,
    handler: Arc<dyn PromptHandler>,
}

impl RegisteredPrompt {
    fn info(&self) -> PromptInfo {
        PromptInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self
                .args
                .as_ref()
                .map(|schema| arguments_from_schema(schema.json_schema()))
                .unwrap_or_default(),
        }
    }
}

fn arguments_from_schema(schema: &Value) -> Vec<PromptArgument> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut arguments: Vec<_> = properties
        .iter()
        .map(|(name, property)| PromptArgument {
            name: name.clone(),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
            required: required.contains(&name.as_str()),
        })
        .collect();
    arguments.sort_by(|a, b| a.name.cmp(&b.name));
    arguments
}

impl ToolRegistry {
    pub(crate) fn prepare_prompt(
        &self,
        descriptor: PromptDescriptor,
        base: bool,
    ) -> RegistryResult<RegisteredPrompt> {
        let PromptDescriptor {
            name,
            description,
            args_schema,
            handler,
        } = descriptor;

        if name.trim().is_empty() {
            return Err(RegistryError::invalid(ListKind::Prompts, "prompt name cannot be empty"));
        }
        let args = args_schema
            .map(|source| self.shared.normalize(Some(source)))
            .transpose()?;

        Ok(RegisteredPrompt {
            id: self.shared.next_id(),
            base,
            name,
            description,
            args,
            handler,
        })
    }

    /// Registers a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] or [`RegistryError::Schema`]
    /// for a bad descriptor and [`RegistryError::Duplicate`] for a taken name.
    pub fn register_prompt(&self, descriptor: PromptDescriptor) -> RegistryResult<RegistrationHandle> {
        let prompt = self.prepare_prompt(descriptor, false)?;
        let (name, id) = (prompt.name.clone(), prompt.id);
        {
            let mut state = self.shared.write();
            stage(&mut state.prompts, ListKind::Prompts, name.clone(), prompt)?;
        }
        self.shared.notifier.mark(ListKind::Prompts);
        debug!(prompt = %name, "prompt registered");
        Ok(RegistrationHandle::new(&self.shared, ListKind::Prompts, name, id))
    }

    /// Removes a prompt by name.
    pub fn unregister_prompt(&self, name: &str) -> bool {
        self.shared.remove_entry(ListKind::Prompts, name, None)
    }

    /// Lists prompts in registration order.
    #[must_use]
    pub fn list_prompts(&self) -> Vec<PromptInfo> {
        let state = self.shared.read();
        let mut prompts: Vec<_> = state.prompts.values().collect();
        prompts.sort_by_key(|p| p.id);
        prompts.into_iter().map(|p| p.info()).collect()
    }

    /// Renders a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`], [`RegistryError::InvalidArguments`]
    /// when `args` fail the prompt's schema, or
    /// [`RegistryError::InvocationFailed`] when the handler fails.
    pub async fn get_prompt(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> RegistryResult<GetPromptResult> {
        let prompt = self
            .shared
            .read()
            .prompts
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: ListKind::Prompts,
                name: name.to_owned(),
            })?;

        let args = Value::Object(args.unwrap_or_default());
        if let Some(schema) = &prompt.args {
            schema
                .validate(&args)
                .map_err(|err| RegistryError::InvalidArguments {
                    kind: ListKind::Prompts,
                    name: name.to_owned(),
                    reason: err.to_string(),
                })?;
        }

        prompt.handler.get(args).await.map_err(|err| {
            warn!(prompt = %name, error = %err, "prompt handler failed");
            RegistryError::InvocationFailed {
                kind: ListKind::Prompts,
                name: name.to_owned(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualScheduler;
    use context_primitives::PromptMessage;
    use serde_json::json;

    fn summarize() -> PromptDescriptor {
        PromptDescriptor::new("summarize", |args: Value| async move {
            let topic = args["topic"].as_str().unwrap_or("the page").to_owned();
            anyhow::Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage::user(format!("Summarize {topic}"))],
            })
        })
        .with_description("Summarize part of the page")
        .with_args_schema(json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string", "description": "What to summarize" },
                "style": { "type": "string" }
            },
            "required": ["topic"]
        }))
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::builder()
            .scheduler(Arc::new(ManualScheduler::new()))
            .build()
    }

    #[test]
    fn arguments_follow_schema_properties() {
        let registry = registry();
        registry.register_prompt(summarize()).unwrap();

        let info = &registry.list_prompts()[0];
        assert_eq!(info.name, "summarize");
        assert_eq!(
            info.arguments,
            vec![
                PromptArgument {
                    name: "style".into(),
                    description: None,
                    required: false,
                },
                PromptArgument {
                    name: "topic".into(),
                    description: Some("What to summarize".into()),
                    required: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn get_prompt_validates_and_renders() {
        let registry = registry();
        registry.register_prompt(summarize()).unwrap();

        let err = registry.get_prompt("summarize", None).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArguments { kind: ListKind::Prompts, .. }));

        let args = json!({ "topic": "reviews" }).as_object().cloned();
        let rendered = registry.get_prompt("summarize", args).await.unwrap();
        assert_eq!(rendered.messages[0].content.as_text(), Some("Summarize reviews"));

        let err = registry.get_prompt("missing", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn duplicate_and_unregister() {
        let registry = registry();
        let handle = registry.register_prompt(summarize()).unwrap();
        assert!(matches!(
            registry.register_prompt(summarize()),
            Err(RegistryError::Duplicate { .. })
        ));
        handle.unregister();
        assert!(registry.list_prompts().is_empty());
        assert!(!registry.unregister_prompt("summarize"));
    }
}
