//! Resources: readable content addressed by URI or URI template.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use context_primitives::{ReadResourceResult, ResourceContents};
use serde::Serialize;
use tracing::{debug, warn};

use crate::registry::{RegistrationHandle, stage};
use crate::{ListKind, RegistryError, RegistryResult, ToolRegistry};

/// Trait implemented by resource readers.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Reads the resource at `uri`. `params` holds the template variables the
    /// URI matched, and is empty for static resources.
    async fn read(
        &self,
        uri: String,
        params: HashMap<String, String>,
    ) -> anyhow::Result<Vec<ResourceContents>>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Send + Sync + Fn(String, HashMap<String, String>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<ResourceContents>>> + Send,
{
    async fn read(
        &self,
        uri: String,
        params: HashMap<String, String>,
    ) -> anyhow::Result<Vec<ResourceContents>> {
        (self)(uri, params).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A URI with `{name}` placeholders, such as `cart://items/{id}`.
///
/// Each placeholder matches one or more characters up to the next literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Returns `true` if `uri` contains a placeholder.
    #[must_use]
    pub fn is_template(uri: &str) -> bool {
        uri.contains('{')
    }

    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for unbalanced braces, empty or
    /// repeated variable names, and placeholders that are not separated by a
    /// literal.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                let literal = &rest[..open];
                if literal.contains('}') {
                    return Err(format!("unbalanced `}}` in `{raw}`"));
                }
                segments.push(Segment::Literal(literal.to_owned()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed `{{` in `{raw}`"))?;
            let name = &after[..close];
            if name.is_empty() || name.contains('{') {
                return Err(format!("invalid variable name in `{raw}`"));
            }
            if matches!(segments.last(), Some(Segment::Variable(_))) {
                return Err(format!("adjacent variables in `{raw}` are ambiguous"));
            }
            if segments
                .iter()
                .any(|s| matches!(s, Segment::Variable(existing) if existing == name))
            {
                return Err(format!("variable `{name}` appears twice in `{raw}`"));
            }
            segments.push(Segment::Variable(name.to_owned()));
            rest = &after[close + 1..];
        }

        if rest.contains('}') {
            return Err(format!("unbalanced `}}` in `{raw}`"));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// Returns the template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches `uri`, returning the captured variables.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut rest = uri;

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => rest = rest.strip_prefix(literal.as_str())?,
                Segment::Variable(name) => {
                    let end = match self.segments.get(idx + 1) {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    if end == 0 {
                        return None;
                    }
                    params.insert(name.clone(), rest[..end].to_owned());
                    rest = &rest[end..];
                }
            }
        }

        rest.is_empty().then_some(params)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Everything needed to register a resource.
#[derive(Clone)]
pub struct ResourceDescriptor {
    pub(crate) uri: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) mime_type: Option<String>,
    pub(crate) handler: Arc<dyn ResourceHandler>,
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl ResourceDescriptor {
    /// Creates a descriptor. A `uri` containing `{var}` registers a template.
    #[must_use]
    pub fn new<H>(uri: impl Into<String>, name: impl Into<String>, handler: H) -> Self
    where
        H: ResourceHandler + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            handler: Arc::new(handler),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type advertised in listings.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Returns the URI or URI template.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Listing entry for a static resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Description, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Listing entry for a templated resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateInfo {
    /// URI template.
    pub uri_template: String,
    /// Display name.
    pub name: String,
    /// Description, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

pub(crate) struct RegisteredResource {
    pub(crate) id: u64,
    pub(crate) base: bool,
    pub(crate) uri: String,
    template: Option<UriTemplate>,
    name: String,
    description: Option<String>,
    mime_type: Option<String>,
    handler: Arc<dyn ResourceHandler>,
}

impl ToolRegistry {
    pub(crate) fn prepare_resource(
        &self,
        descriptor: ResourceDescriptor,
        base: bool,
    ) -> RegistryResult<RegisteredResource> {
        let ResourceDescriptor {
            uri,
            name,
            description,
            mime_type,
            handler,
        } = descriptor;

        if uri.trim().is_empty() {
            return Err(RegistryError::invalid(ListKind::Resources, "resource uri cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(RegistryError::invalid(
                ListKind::Resources,
                format!("resource `{uri}` must have a name"),
            ));
        }
        let template = if UriTemplate::is_template(&uri) {
            Some(UriTemplate::parse(&uri).map_err(|reason| RegistryError::invalid(ListKind::Resources, reason))?)
        } else {
            None
        };

        Ok(RegisteredResource {
            id: self.shared.next_id(),
            base,
            uri,
            template,
            name,
            description,
            mime_type,
            handler,
        })
    }

    /// Registers a resource or resource template.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] for an empty URI or name or
    /// a malformed template, and [`RegistryError::Duplicate`] if the URI is
    /// already registered.
    pub fn register_resource(&self, descriptor: ResourceDescriptor) -> RegistryResult<RegistrationHandle> {
        let resource = self.prepare_resource(descriptor, false)?;
        let (uri, id) = (resource.uri.clone(), resource.id);
        {
            let mut state = self.shared.write();
            stage(&mut state.resources, ListKind::Resources, uri.clone(), resource)?;
        }
        self.shared.notifier.mark(ListKind::Resources);
        debug!(resource = %uri, "resource registered");
        Ok(RegistrationHandle::new(&self.shared, ListKind::Resources, uri, id))
    }

    /// Removes a resource by URI (or template text).
    pub fn unregister_resource(&self, uri: &str) -> bool {
        self.shared.remove_entry(ListKind::Resources, uri, None)
    }

    /// Lists static resources in registration order.
    #[must_use]
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.sorted_resources(false)
            .into_iter()
            .map(|r| ResourceInfo {
                uri: r.uri.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect()
    }

    /// Lists resource templates in registration order.
    #[must_use]
    pub fn list_resource_templates(&self) -> Vec<ResourceTemplateInfo> {
        self.sorted_resources(true)
            .into_iter()
            .map(|r| ResourceTemplateInfo {
                uri_template: r.uri.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect()
    }

    /// Reads a resource. An exact URI match wins over templates; templates are
    /// tried in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if nothing matches and
    /// [`RegistryError::InvocationFailed`] if the handler fails.
    pub async fn read_resource(&self, uri: &str) -> RegistryResult<ReadResourceResult> {
        let (resource, params) = self.resolve_resource(uri)?;

        let contents = resource
            .handler
            .read(uri.to_owned(), params)
            .await
            .map_err(|err| {
                warn!(resource = %resource.uri, error = %err, "resource handler failed");
                RegistryError::InvocationFailed {
                    kind: ListKind::Resources,
                    name: uri.to_owned(),
                }
            })?;
        Ok(ReadResourceResult { contents })
    }

    fn resolve_resource(
        &self,
        uri: &str,
    ) -> RegistryResult<(Arc<RegisteredResource>, HashMap<String, String>)> {
        {
            let state = self.shared.read();
            if let Some(resource) = state.resources.get(uri).filter(|r| r.template.is_none()) {
                return Ok((Arc::clone(resource), HashMap::new()));
            }
        }
        self.sorted_resources(true)
            .into_iter()
            .find_map(|r| {
                let params = r.template.as_ref()?.matches(uri)?;
                Some((r, params))
            })
            .ok_or_else(|| RegistryError::NotFound {
                kind: ListKind::Resources,
                name: uri.to_owned(),
            })
    }

    fn sorted_resources(&self, templates: bool) -> Vec<Arc<RegisteredResource>> {
        let state = self.shared.read();
        let mut resources: Vec<_> = state
            .resources
            .values()
            .filter(|r| r.template.is_some() == templates)
            .cloned()
            .collect();
        resources.sort_by_key(|r| r.id);
        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextBundle, ManualScheduler};

    fn registry() -> ToolRegistry {
        ToolRegistry::builder()
            .scheduler(Arc::new(ManualScheduler::new()))
            .build()
    }

    fn echo_uri(uri: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(uri, name, |uri: String, params: HashMap<String, String>| async move {
            let id = params.get("id").cloned().unwrap_or_default();
            anyhow::Ok(vec![ResourceContents::text(uri, format!("id={id}"))])
        })
    }

    #[test]
    fn template_matching_captures_variables() {
        let template = UriTemplate::parse("cart://users/{user}/items/{id}").unwrap();
        let params = template.matches("cart://users/ann/items/42").unwrap();
        assert_eq!(params["user"], "ann");
        assert_eq!(params["id"], "42");

        assert!(template.matches("cart://users//items/42").is_none());
        assert!(template.matches("cart://users/ann/items/").is_none());
        assert!(template.matches("cart://orders/ann/items/1").is_none());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for raw in ["a://{", "a://}x", "a://{}", "a://{a}{b}", "a://{a}/{a}"] {
            assert!(UriTemplate::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn listings_split_static_and_templates() {
        let registry = registry();
        registry.register_resource(echo_uri("page://title", "title")).unwrap();
        registry
            .register_resource(echo_uri("cart://items/{id}", "item").with_mime_type("text/plain"))
            .unwrap();

        let statics = registry.list_resources();
        assert_eq!(statics.len(), 1);
        assert_eq!(statics[0].uri, "page://title");

        let templates = registry.list_resource_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].uri_template, "cart://items/{id}");
        assert_eq!(templates[0].mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn duplicate_uri_is_rejected() {
        let registry = registry();
        registry.register_resource(echo_uri("page://title", "a")).unwrap();
        let err = registry
            .register_resource(echo_uri("page://title", "b"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { kind: ListKind::Resources, .. }));
    }

    #[tokio::test]
    async fn read_prefers_exact_match() {
        let registry = registry();
        registry
            .provide_context(
                ContextBundle::new()
                    .resource(echo_uri("cart://items/{id}", "item"))
                    .resource(ResourceDescriptor::new(
                        "cart://items/special",
                        "special",
                        |uri: String, _: HashMap<String, String>| async move {
                            anyhow::Ok(vec![ResourceContents::text(uri, "special")])
                        },
                    )),
            )
            .unwrap();

        let exact = registry.read_resource("cart://items/special").await.unwrap();
        assert_eq!(exact.contents[0].as_text(), Some("special"));

        let templated = registry.read_resource("cart://items/7").await.unwrap();
        assert_eq!(templated.contents[0].as_text(), Some("id=7"));
        assert_eq!(templated.contents[0].uri(), "cart://items/7");
    }

    #[tokio::test]
    async fn unknown_and_failing_resources() {
        let registry = registry();
        let err = registry.read_resource("page://nope").await.unwrap_err();
        assert!(err.is_not_found());

        registry
            .register_resource(ResourceDescriptor::new(
                "page://broken",
                "broken",
                |_: String, _: HashMap<String, String>| async {
                    Err::<Vec<ResourceContents>, anyhow::Error>(anyhow::anyhow!("disk on fire"))
                },
            ))
            .unwrap();
        let err = registry.read_resource("page://broken").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvocationFailed { .. }));
    }

    #[test]
    fn handle_unregisters_resource() {
        let registry = registry();
        let handle = registry
            .register_resource(echo_uri("page://title", "title"))
            .unwrap();
        handle.unregister();
        handle.unregister();
        assert!(registry.list_resources().is_empty());
    }
}
