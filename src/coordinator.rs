//! Live server construction and atomic hot swap.
//!
//! The coordinator exclusively owns the live-server reference and the
//! single-slot rebuild lock. A rebuild reads enablement state fresh
//! (after acquiring the lock), constructs a brand-new [`LiveServer`]
//! registering a wrapped handler for every effectively-enabled element,
//! closes the outgoing instance best-effort, and atomically swaps the
//! reference. Requests already bound to the old instance drain against
//! it; only new requests observe the swap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::addons::{
    AddonError, LoadedAddons, PromptArgument, PromptDef, PromptHandler, ResourceDef,
    ResourceHandler, ToolDef, ToolHandler,
};
use crate::events::EventLog;
use crate::registry::Registry;
use crate::store::{ElementType, NewEvent, StoreError};

/// Errors from dispatching against the live server.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// The addon handler itself failed.
    #[error(transparent)]
    Invocation(#[from] AddonError),
}

/// A tool registered on a live server instance, handler already wrapped
/// with timing and telemetry.
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    handler: ToolHandler,
}

#[derive(Clone)]
pub struct RegisteredResource {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    handler: ResourceHandler,
}

#[derive(Clone)]
pub struct RegisteredPrompt {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    handler: PromptHandler,
}

/// One in-memory protocol-server instance.
///
/// Immutable once built; the coordinator swaps whole instances rather
/// than mutating a live one.
pub struct LiveServer {
    tools: HashMap<String, RegisteredTool>,
    resources: HashMap<String, RegisteredResource>,
    prompts: HashMap<String, RegisteredPrompt>,
    closed: AtomicBool,
}

impl LiveServer {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            resources: HashMap::new(),
            prompts: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The fixed capability descriptor every instance advertises.
    pub fn capabilities() -> Value {
        json!({
            "tools": {},
            "resources": {},
            "prompts": {},
            "sampling": {},
            "roots": {"listChanged": true}
        })
    }

    fn register_tool(&mut self, tool: RegisteredTool) {
        debug!(tool = %tool.name, "Registering tool");
        self.tools.insert(tool.name.clone(), tool);
    }

    fn register_resource(&mut self, resource: RegisteredResource) {
        debug!(uri = %resource.uri, "Registering resource");
        self.resources.insert(resource.uri.clone(), resource);
    }

    fn register_prompt(&mut self, prompt: RegisteredPrompt) {
        debug!(prompt = %prompt.name, "Registering prompt");
        self.prompts.insert(prompt.name.clone(), prompt);
    }

    /// Tool metadata in wire shape.
    pub fn list_tools(&self) -> Vec<Value> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "title": t.title,
                    "description": t.description,
                    "inputSchema": t.input_schema
                })
            })
            .collect()
    }

    pub fn list_resources(&self) -> Vec<Value> {
        let mut resources: Vec<_> = self.resources.values().collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
            .into_iter()
            .map(|r| {
                json!({
                    "uri": r.uri,
                    "name": r.name,
                    "description": r.description,
                    "mimeType": r.mime_type
                })
            })
            .collect()
    }

    pub fn list_prompts(&self) -> Vec<Value> {
        let mut prompts: Vec<_> = self.prompts.values().collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
            .into_iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "description": p.description,
                    "arguments": p.arguments
                })
            })
            .collect()
    }

    /// Sorted tool names, mainly for tests and diagnostics.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resource_uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.resources.keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn prompt_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.prompts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke a registered tool. The wrapped handler records telemetry
    /// and normalizes the result to a text content block.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, DispatchError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DispatchError::ToolNotFound(name.to_string()))?;
        Ok((tool.handler)(args).await?)
    }

    /// Read a registered resource by uri.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, DispatchError> {
        let resource = self
            .resources
            .get(uri)
            .ok_or_else(|| DispatchError::ResourceNotFound(uri.to_string()))?;
        Ok((resource.handler)().await?)
    }

    /// Render a registered prompt.
    pub async fn get_prompt(&self, name: &str, args: Value) -> Result<Value, DispatchError> {
        let prompt = self
            .prompts
            .get(name)
            .ok_or_else(|| DispatchError::PromptNotFound(name.to_string()))?;
        Ok((prompt.handler)(args).await?)
    }

    /// Graceful close of an outgoing instance. Transports are
    /// request-scoped, so this only marks the instance retired;
    /// requests already bound to it drain to completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Previous live server instance closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for LiveServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a tool handler result to a single text content block.
/// Strings pass through; everything else is pretty-printed JSON.
fn normalize_tool_result(result: Value) -> Value {
    let text = match result {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    };
    json!({"content": [{"type": "text", "text": text}]})
}

/// Owns the live-server reference and serializes rebuilds.
pub struct RebuildCoordinator {
    addons: LoadedAddons,
    registry: Arc<Registry>,
    events: Arc<EventLog>,
    live: tokio::sync::RwLock<Arc<LiveServer>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl RebuildCoordinator {
    /// Create a coordinator with an empty live server. Callers run the
    /// initial [`rebuild`](Self::rebuild) as part of startup.
    pub fn new(addons: LoadedAddons, registry: Arc<Registry>, events: Arc<EventLog>) -> Self {
        Self {
            addons,
            registry,
            events,
            live: tokio::sync::RwLock::new(Arc::new(LiveServer::new())),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The instance currently accepting new requests.
    pub async fn live(&self) -> Arc<LiveServer> {
        self.live.read().await.clone()
    }

    /// Names of the loaded addons, for the status endpoint.
    pub fn addon_names(&self) -> Vec<String> {
        self.addons.keys().cloned().collect()
    }

    /// Reconstruct the live server from current persisted state.
    ///
    /// Concurrent rebuilds queue on the rebuild lock, and enablement is
    /// read only after acquisition, so whichever rebuild completes last
    /// reflects the true current persisted state.
    pub async fn rebuild(&self) -> Result<(), StoreError> {
        let _guard = self.rebuild_lock.lock().await;

        let mut next = LiveServer::new();
        for (addon_name, addon) in self.addons.iter() {
            if !self.registry.is_addon_enabled(addon_name).await? {
                debug!(addon = %addon_name, "Addon disabled, skipping all elements");
                continue;
            }

            if let Some(source) = addon.as_tool_source() {
                for tool in source.declared_tools() {
                    if self
                        .registry
                        .is_element_enabled(addon_name, &tool.name, ElementType::Tool)
                        .await?
                    {
                        next.register_tool(self.wrap_tool(addon_name, tool));
                    }
                }
            }
            if let Some(source) = addon.as_resource_source() {
                for resource in source.declared_resources() {
                    if self
                        .registry
                        .is_element_enabled(addon_name, &resource.uri, ElementType::Resource)
                        .await?
                    {
                        next.register_resource(self.wrap_resource(addon_name, resource));
                    }
                }
            }
            if let Some(source) = addon.as_prompt_source() {
                for prompt in source.declared_prompts() {
                    if self
                        .registry
                        .is_element_enabled(addon_name, &prompt.name, ElementType::Prompt)
                        .await?
                    {
                        next.register_prompt(self.wrap_prompt(addon_name, prompt));
                    }
                }
            }
        }

        // Retire the outgoing instance before the swap. In-flight
        // requests bound to it drain to completion.
        let old = self.live.read().await.clone();
        old.close();

        info!(
            tools = next.tools.len(),
            resources = next.resources.len(),
            prompts = next.prompts.len(),
            "Live server rebuilt"
        );
        *self.live.write().await = Arc::new(next);
        Ok(())
    }

    /// Invoke a tool directly, bypassing the transport, if some loaded
    /// addon declares it and it is effectively enabled.
    ///
    /// Returns `None` when no enabled declaration matches. A success is
    /// recorded as a `test_call` event; handler failures propagate.
    pub async fn invoke_tool_direct(
        &self,
        tool_name: &str,
        args: Value,
    ) -> Result<Option<Value>, DispatchError> {
        for (addon_name, addon) in self.addons.iter() {
            let Some(source) = addon.as_tool_source() else {
                continue;
            };
            let Some(tool) = source
                .declared_tools()
                .into_iter()
                .find(|t| t.name == tool_name)
            else {
                continue;
            };
            let enabled = self
                .registry
                .is_element_enabled(addon_name, tool_name, ElementType::Tool)
                .await
                .map_err(|e| AddonError::execution(e.to_string()))?;
            if !enabled {
                continue;
            }

            let start = Instant::now();
            let result = (tool.handler)(args.clone()).await?;
            let elapsed = start.elapsed().as_millis() as i64;
            self.events
                .append(NewEvent::success(
                    "test_call",
                    tool_name,
                    ElementType::Tool,
                    addon_name,
                    args,
                    result.clone(),
                    elapsed,
                ))
                .await;
            return Ok(Some(result));
        }
        Ok(None)
    }

    /// Wrap a tool handler with timing, telemetry, and result
    /// normalization. A telemetry write failure never alters the
    /// invocation outcome (swallowed inside [`EventLog::append`]).
    fn wrap_tool(&self, addon_name: &str, def: ToolDef) -> RegisteredTool {
        let events = self.events.clone();
        let addon = addon_name.to_string();
        let element = def.name.clone();
        let inner = def.handler.clone();

        let handler: ToolHandler = Arc::new(move |args: Value| {
            let events = events.clone();
            let addon = addon.clone();
            let element = element.clone();
            let inner = inner.clone();
            async move {
                let start = Instant::now();
                match inner(args.clone()).await {
                    Ok(result) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        events
                            .append(NewEvent::success(
                                "tool_call",
                                &element,
                                ElementType::Tool,
                                &addon,
                                args,
                                result.clone(),
                                elapsed,
                            ))
                            .await;
                        Ok(normalize_tool_result(result))
                    }
                    Err(err) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        warn!(tool = %element, error = %err, "Tool handler failed");
                        events
                            .append(NewEvent::failure(
                                "tool_call",
                                &element,
                                ElementType::Tool,
                                &addon,
                                args,
                                err.to_string(),
                                elapsed,
                            ))
                            .await;
                        Err(err)
                    }
                }
            }
            .boxed()
        });

        RegisteredTool {
            name: def.name,
            title: def.title,
            description: def.description,
            input_schema: def.input_schema,
            handler,
        }
    }

    /// Wrap a resource handler. The handler result passes through
    /// unmodified on success.
    fn wrap_resource(&self, addon_name: &str, def: ResourceDef) -> RegisteredResource {
        let events = self.events.clone();
        let addon = addon_name.to_string();
        let element = def.uri.clone();
        let inner = def.handler.clone();

        let handler: ResourceHandler = Arc::new(move || {
            let events = events.clone();
            let addon = addon.clone();
            let element = element.clone();
            let inner = inner.clone();
            async move {
                let start = Instant::now();
                match inner().await {
                    Ok(result) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        events
                            .append(NewEvent::success(
                                "resource_read",
                                &element,
                                ElementType::Resource,
                                &addon,
                                json!({}),
                                result.clone(),
                                elapsed,
                            ))
                            .await;
                        Ok(result)
                    }
                    Err(err) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        warn!(resource = %element, error = %err, "Resource handler failed");
                        events
                            .append(NewEvent::failure(
                                "resource_read",
                                &element,
                                ElementType::Resource,
                                &addon,
                                json!({}),
                                err.to_string(),
                                elapsed,
                            ))
                            .await;
                        Err(err)
                    }
                }
            }
            .boxed()
        });

        RegisteredResource {
            uri: def.uri,
            name: def.name,
            description: def.description,
            mime_type: def.mime_type,
            handler,
        }
    }

    /// Wrap a prompt handler. The handler result passes through
    /// unmodified on success.
    fn wrap_prompt(&self, addon_name: &str, def: PromptDef) -> RegisteredPrompt {
        let events = self.events.clone();
        let addon = addon_name.to_string();
        let element = def.name.clone();
        let inner = def.handler.clone();

        let handler: PromptHandler = Arc::new(move |args: Value| {
            let events = events.clone();
            let addon = addon.clone();
            let element = element.clone();
            let inner = inner.clone();
            async move {
                let start = Instant::now();
                match inner(args.clone()).await {
                    Ok(result) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        events
                            .append(NewEvent::success(
                                "prompt_get",
                                &element,
                                ElementType::Prompt,
                                &addon,
                                args,
                                result.clone(),
                                elapsed,
                            ))
                            .await;
                        Ok(result)
                    }
                    Err(err) => {
                        let elapsed = start.elapsed().as_millis() as i64;
                        warn!(prompt = %element, error = %err, "Prompt handler failed");
                        events
                            .append(NewEvent::failure(
                                "prompt_get",
                                &element,
                                ElementType::Prompt,
                                &addon,
                                args,
                                err.to_string(),
                                elapsed,
                            ))
                            .await;
                        Err(err)
                    }
                }
            }
            .boxed()
        });

        RegisteredPrompt {
            name: def.name,
            description: def.description,
            arguments: def.arguments,
            handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::test_fixtures::alpha_entry;
    use crate::addons::AddonLoader;
    use crate::store::{CapabilityStore, EventQuery, EventStatus};

    struct Harness {
        store: Arc<CapabilityStore>,
        events: Arc<EventLog>,
        coordinator: RebuildCoordinator,
    }

    async fn harness() -> Harness {
        let store = Arc::new(CapabilityStore::open_in_memory().unwrap());
        let events = Arc::new(EventLog::new(store.clone()));
        let registry = Arc::new(Registry::new(store.clone()));
        let loader = AddonLoader::new(store.clone(), events.clone());
        let loaded = loader.load(&[alpha_entry()]).await;
        let coordinator = RebuildCoordinator::new(loaded, registry, events.clone());
        coordinator.rebuild().await.unwrap();
        Harness {
            store,
            events,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_rebuild_registers_enabled_elements() {
        let h = harness().await;
        let live = h.coordinator.live().await;
        assert_eq!(live.tool_names(), vec!["boom", "echo"]);
        assert_eq!(live.resource_uris(), vec!["alpha://greeting"]);
        assert_eq!(live.prompt_names(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_element_toggle_unregisters_after_rebuild() {
        let h = harness().await;
        let id = h
            .store
            .find_element_id("alpha", "echo", ElementType::Tool)
            .unwrap()
            .unwrap();
        h.store.toggle_element(id).unwrap();
        h.coordinator.rebuild().await.unwrap();

        let live = h.coordinator.live().await;
        assert_eq!(live.tool_names(), vec!["boom"]);
        // The toggle alone did not touch the old registrations: the swap
        // happened during rebuild, so the element is gone now.
        let err = live.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_addon_toggle_wins_over_element_flag() {
        let h = harness().await;
        h.store.toggle_addon("alpha").unwrap();
        h.coordinator.rebuild().await.unwrap();

        let live = h.coordinator.live().await;
        assert!(live.tool_names().is_empty());
        assert!(live.resource_uris().is_empty());
        assert!(live.prompt_names().is_empty());
    }

    #[tokio::test]
    async fn test_tool_call_records_success_event() {
        let h = harness().await;
        let live = h.coordinator.live().await;
        let result = live.call_tool("echo", json!({"a": 1})).await.unwrap();
        // Normalized to a single text content block.
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"a\": 1"));

        let rows = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "tool_call");
        assert_eq!(rows[0].element_name, "echo");
        assert_eq!(rows[0].status, EventStatus::Success);
        assert!(rows[0].response_data.is_some());
        assert!(rows[0].execution_time_ms >= 0);
    }

    #[tokio::test]
    async fn test_failed_tool_records_error_event_and_propagates() {
        let h = harness().await;
        let live = h.coordinator.live().await;
        let err = live.call_tool("boom", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::Invocation(_)));

        let rows = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, EventStatus::Error);
        assert!(rows[0].response_data.is_none());
        assert!(rows[0]
            .error_message
            .as_deref()
            .unwrap_or("")
            .contains("kaboom"));
    }

    #[tokio::test]
    async fn test_string_tool_results_pass_through_unquoted() {
        assert_eq!(
            normalize_tool_result(json!("plain"))["content"][0]["text"],
            json!("plain")
        );
    }

    #[tokio::test]
    async fn test_resource_read_records_event_and_passes_through() {
        let h = harness().await;
        let live = h.coordinator.live().await;
        let result = live.read_resource("alpha://greeting").await.unwrap();
        assert_eq!(result["contents"][0]["text"], json!("hello from alpha"));

        let rows = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows[0].event_type, "resource_read");
    }

    #[tokio::test]
    async fn test_prompt_get_records_event() {
        let h = harness().await;
        let live = h.coordinator.live().await;
        let result = live.get_prompt("hello", json!({})).await.unwrap();
        assert_eq!(result["messages"][0]["role"], json!("user"));

        let rows = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows[0].event_type, "prompt_get");
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let h = harness().await;
        let first = h.coordinator.live().await;
        h.coordinator.rebuild().await.unwrap();
        h.coordinator.rebuild().await.unwrap();
        let second = h.coordinator.live().await;

        assert_eq!(first.tool_names(), second.tool_names());
        assert_eq!(first.resource_uris(), second.resource_uris());
        assert_eq!(first.prompt_names(), second.prompt_names());
    }

    #[tokio::test]
    async fn test_swap_leaves_in_flight_instance_usable() {
        let h = harness().await;
        // A request binds the instance that was live at connect time.
        let bound = h.coordinator.live().await;
        h.store.toggle_addon("alpha").unwrap();
        h.coordinator.rebuild().await.unwrap();

        // The retired instance still serves the in-flight request.
        assert!(bound.is_closed());
        assert!(bound.call_tool("echo", json!({"x": 2})).await.is_ok());
        // New requests observe the swap.
        let fresh = h.coordinator.live().await;
        assert!(fresh.tool_names().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_end_with_fresh_state() {
        let h = Arc::new(harness().await);

        // Disable the addon, then race two rebuilds. Serialization on
        // the rebuild lock means both read post-toggle state, so the
        // result cannot resurrect the addon's elements.
        h.store.toggle_addon("alpha").unwrap();
        let (a, b) = (h.clone(), h.clone());
        let ra = tokio::spawn(async move { a.coordinator.rebuild().await });
        let rb = tokio::spawn(async move { b.coordinator.rebuild().await });
        ra.await.unwrap().unwrap();
        rb.await.unwrap().unwrap();

        assert!(h.coordinator.live().await.tool_names().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_tool_direct() {
        let h = harness().await;
        let result = h
            .coordinator
            .invoke_tool_direct("echo", json!({"a": 1}))
            .await
            .unwrap();
        // Direct invocation returns the raw handler result.
        assert_eq!(result, Some(json!({"a": 1})));

        let rows = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(rows[0].event_type, "test_call");
    }

    #[tokio::test]
    async fn test_invoke_tool_direct_disabled_or_unknown() {
        let h = harness().await;
        assert!(h
            .coordinator
            .invoke_tool_direct("nope", json!({}))
            .await
            .unwrap()
            .is_none());

        let id = h
            .store
            .find_element_id("alpha", "echo", ElementType::Tool)
            .unwrap()
            .unwrap();
        h.store.toggle_element(id).unwrap();
        assert!(h
            .coordinator
            .invoke_tool_direct("echo", json!({}))
            .await
            .unwrap()
            .is_none());
    }
}
