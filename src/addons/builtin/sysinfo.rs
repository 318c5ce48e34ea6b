//! System-info addon: bridge diagnostics as a tool, a resource, and a
//! prompt.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;

use crate::addons::{
    Addon, AddonContext, AddonError, HasPrompts, HasResources, HasTools, PromptArgument,
    PromptDef, ResourceDef, ToolDef,
};
use crate::store::CapabilityStore;

const OVERVIEW_URI: &str = "sysinfo://overview";

/// Exposes process and registry diagnostics.
pub struct SysinfoAddon {
    data: Arc<CapabilityStore>,
}

impl SysinfoAddon {
    pub fn new(ctx: AddonContext) -> Self {
        Self { data: ctx.data }
    }
}

#[async_trait]
impl Addon for SysinfoAddon {
    fn name(&self) -> &str {
        "sysinfo"
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

impl HasTools for SysinfoAddon {
    fn declared_tools(&self) -> Vec<ToolDef> {
        vec![ToolDef {
            name: "server_time".to_string(),
            title: Some("Server Time".to_string()),
            description: Some("Current server time in UTC".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
            handler: Arc::new(|_args| {
                async move {
                    let now = chrono::Utc::now();
                    Ok(json!({
                        "iso": now.to_rfc3339(),
                        "unix_ms": now.timestamp_millis()
                    }))
                }
                .boxed()
            }),
        }]
    }
}

impl HasResources for SysinfoAddon {
    fn declared_resources(&self) -> Vec<ResourceDef> {
        let data = self.data.clone();
        vec![ResourceDef {
            uri: OVERVIEW_URI.to_string(),
            name: "Bridge Overview".to_string(),
            description: "Process and registry overview".to_string(),
            mime_type: "application/json".to_string(),
            handler: Arc::new(move || {
                let data = data.clone();
                async move {
                    let addon_count = data
                        .list_addons()
                        .map_err(|e| AddonError::execution(e.to_string()))?
                        .len();
                    let element_count = data
                        .list_elements()
                        .map_err(|e| AddonError::execution(e.to_string()))?
                        .len();
                    let info = json!({
                        "platform": std::env::consts::OS,
                        "arch": std::env::consts::ARCH,
                        "pid": std::process::id(),
                        "registeredAddons": addon_count,
                        "registeredElements": element_count,
                    });
                    Ok(json!({
                        "contents": [{
                            "uri": OVERVIEW_URI,
                            "mimeType": "application/json",
                            "text": info.to_string()
                        }]
                    }))
                }
                .boxed()
            }),
        }]
    }
}

impl HasPrompts for SysinfoAddon {
    fn declared_prompts(&self) -> Vec<PromptDef> {
        vec![PromptDef {
            name: "diagnose".to_string(),
            description: Some("Diagnose bridge health from its telemetry".to_string()),
            arguments: vec![PromptArgument {
                name: "focus".to_string(),
                description: Some("Area to focus the diagnosis on".to_string()),
                required: false,
            }],
            handler: Arc::new(|args| {
                async move {
                    let focus = args
                        .get("focus")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("overall health");
                    Ok(json!({
                        "description": "Bridge diagnosis",
                        "messages": [{
                            "role": "user",
                            "content": {
                                "type": "text",
                                "text": format!(
                                    "Review the bridge's recent invocation logs and report on {focus}."
                                )
                            }
                        }]
                    }))
                }
                .boxed()
            }),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::AddonEventWriter;
    use crate::events::EventLog;

    fn sysinfo() -> SysinfoAddon {
        let store = Arc::new(CapabilityStore::open_in_memory().unwrap());
        let events = Arc::new(EventLog::new(store.clone()));
        SysinfoAddon::new(AddonContext {
            data: store,
            log: AddonEventWriter::new("sysinfo", events),
        })
    }

    #[tokio::test]
    async fn test_overview_resource_reports_counts() {
        let addon = sysinfo();
        addon.data.upsert_addon("calculator").unwrap();

        let resources = addon.declared_resources();
        let result = (resources[0].handler)().await.unwrap();
        let text = result["contents"][0]["text"].as_str().unwrap();
        let info: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(info["registeredAddons"], json!(1));
    }

    #[tokio::test]
    async fn test_server_time_tool() {
        let addon = sysinfo();
        let tools = addon.declared_tools();
        let result = (tools[0].handler)(json!({})).await.unwrap();
        assert!(result["unix_ms"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_diagnose_prompt_uses_focus() {
        let addon = sysinfo();
        let prompts = addon.declared_prompts();
        let result = (prompts[0].handler)(json!({"focus": "error rate"})).await.unwrap();
        let text = result["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("error rate"));
    }
}
