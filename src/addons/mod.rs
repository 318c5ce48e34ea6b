//! The addon contract.
//!
//! An addon is a self-contained plugin declaring zero or more tools,
//! resources, and prompts. Capabilities are exposed through explicit
//! optional traits ([`HasTools`], [`HasResources`], [`HasPrompts`]);
//! the loader checks trait presence via the `as_*_source` accessors
//! instead of probing for methods.

pub mod builtin;
pub mod loader;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::EventLog;
use crate::store::{CapabilityStore, NewEvent};

pub use loader::{AddonFactory, AddonLoader, AddonManifestEntry, LoadedAddons};

/// Errors surfaced by addon lifecycle hooks and handlers.
#[derive(Debug, Error)]
pub enum AddonError {
    /// The addon's `init` hook failed; the addon is excluded from loading.
    #[error("Initialization failed: {0}")]
    Init(String),

    /// The caller supplied arguments the handler could not accept.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran and failed.
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl AddonError {
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// Result of one handler invocation.
pub type HandlerResult = Result<Value, AddonError>;

/// An invokable tool handler. Receives the caller-supplied arguments.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A readable resource handler. Takes no arguments.
pub type ResourceHandler = Arc<dyn Fn() -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A templated prompt handler. Receives the caller-supplied arguments.
pub type PromptHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A declared tool: named, schema-validated, invokable.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

/// A declared resource: URI-addressed, readable.
#[derive(Clone)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    pub handler: ResourceHandler,
}

/// One argument a prompt template accepts.
#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// A declared prompt: a templated interaction starter.
#[derive(Clone)]
pub struct PromptDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub handler: PromptHandler,
}

/// Capability trait for addons that declare tools.
pub trait HasTools {
    fn declared_tools(&self) -> Vec<ToolDef>;
}

/// Capability trait for addons that declare resources.
pub trait HasResources {
    fn declared_resources(&self) -> Vec<ResourceDef>;
}

/// Capability trait for addons that declare prompts.
pub trait HasPrompts {
    fn declared_prompts(&self) -> Vec<PromptDef>;
}

/// A loadable addon module.
///
/// `init` must succeed before the loader syncs the addon's declared
/// elements into the store. The `as_*_source` accessors default to
/// `None`; addons opt in per capability kind.
#[async_trait]
pub trait Addon: Send + Sync {
    /// The addon's unique name.
    fn name(&self) -> &str;

    /// Lifecycle hook, called once at load time.
    async fn init(&mut self) -> Result<(), AddonError>;

    fn as_tool_source(&self) -> Option<&dyn HasTools> {
        None
    }

    fn as_resource_source(&self) -> Option<&dyn HasResources> {
        None
    }

    fn as_prompt_source(&self) -> Option<&dyn HasPrompts> {
        None
    }
}

/// Event writer handed to an addon at construction, pre-bound to the
/// addon's name.
#[derive(Clone)]
pub struct AddonEventWriter {
    addon_name: String,
    events: Arc<EventLog>,
}

impl AddonEventWriter {
    pub fn new(addon_name: impl Into<String>, events: Arc<EventLog>) -> Self {
        Self {
            addon_name: addon_name.into(),
            events,
        }
    }

    /// Record an event under this addon's name. Fire-and-forget.
    pub async fn record(&self, mut event: NewEvent) {
        event.addon_name = self.addon_name.clone();
        self.events.append(event).await;
    }
}

/// Everything an addon receives at construction time.
pub struct AddonContext {
    /// Shared data access for addons that persist their own state.
    pub data: Arc<CapabilityStore>,

    /// Telemetry writer pre-bound to the addon's name.
    pub log: AddonEventWriter,
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Shared fixture addons for registry/coordinator/bridge tests.

    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    /// Fixture addon "alpha": tool `echo` (returns its arguments), tool
    /// `boom` (always fails), resource `alpha://greeting`, prompt `hello`.
    pub struct AlphaAddon;

    #[async_trait]
    impl Addon for AlphaAddon {
        fn name(&self) -> &str {
            "alpha"
        }

        async fn init(&mut self) -> Result<(), AddonError> {
            Ok(())
        }

        fn as_tool_source(&self) -> Option<&dyn HasTools> {
            Some(self)
        }

        fn as_resource_source(&self) -> Option<&dyn HasResources> {
            Some(self)
        }

        fn as_prompt_source(&self) -> Option<&dyn HasPrompts> {
            Some(self)
        }
    }

    impl HasTools for AlphaAddon {
        fn declared_tools(&self) -> Vec<ToolDef> {
            vec![
                ToolDef {
                    name: "echo".to_string(),
                    title: Some("Echo".to_string()),
                    description: Some("Returns its arguments unchanged".to_string()),
                    input_schema: json!({"type": "object"}),
                    handler: Arc::new(|args| async move { Ok(args) }.boxed()),
                },
                ToolDef {
                    name: "boom".to_string(),
                    title: None,
                    description: Some("Always fails".to_string()),
                    input_schema: json!({"type": "object"}),
                    handler: Arc::new(|_args| {
                        async move { Err(AddonError::execution("kaboom")) }.boxed()
                    }),
                },
            ]
        }
    }

    impl HasResources for AlphaAddon {
        fn declared_resources(&self) -> Vec<ResourceDef> {
            vec![ResourceDef {
                uri: "alpha://greeting".to_string(),
                name: "Greeting".to_string(),
                description: "A static greeting".to_string(),
                mime_type: "text/plain".to_string(),
                handler: Arc::new(|| {
                    async move {
                        Ok(json!({
                            "contents": [{
                                "uri": "alpha://greeting",
                                "mimeType": "text/plain",
                                "text": "hello from alpha"
                            }]
                        }))
                    }
                    .boxed()
                }),
            }]
        }
    }

    impl HasPrompts for AlphaAddon {
        fn declared_prompts(&self) -> Vec<PromptDef> {
            vec![PromptDef {
                name: "hello".to_string(),
                description: Some("Say hello".to_string()),
                arguments: vec![PromptArgument {
                    name: "subject".to_string(),
                    description: None,
                    required: false,
                }],
                handler: Arc::new(|_args| {
                    async move {
                        Ok(json!({
                            "description": "Say hello",
                            "messages": [{
                                "role": "user",
                                "content": {"type": "text", "text": "Say hello."}
                            }]
                        }))
                    }
                    .boxed()
                }),
            }]
        }
    }

    /// Fixture addon whose `init` always fails.
    pub struct BrokenAddon;

    #[async_trait]
    impl Addon for BrokenAddon {
        fn name(&self) -> &str {
            "broken"
        }

        async fn init(&mut self) -> Result<(), AddonError> {
            Err(AddonError::init("refused to start"))
        }
    }

    pub fn alpha_entry() -> AddonManifestEntry {
        AddonManifestEntry {
            name: "alpha",
            build: |_ctx| Box::new(AlphaAddon),
        }
    }

    pub fn broken_entry() -> AddonManifestEntry {
        AddonManifestEntry {
            name: "broken",
            build: |_ctx| Box::new(BrokenAddon),
        }
    }
}
