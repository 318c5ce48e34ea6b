//! Addon loading and element synchronization.
//!
//! The loader runs once at startup. For every manifest entry it
//! constructs the addon, awaits its `init` hook, and syncs the declared
//! elements into the store. A failure in any single addon is logged and
//! that addon is excluded; loading continues for all others.
//!
//! Rows may persist for addons no longer in the manifest; that is fine —
//! stale rows are simply never re-registered because the loaded set is
//! the sole source of "currently loadable".

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::{Addon, AddonContext, AddonError, AddonEventWriter};
use crate::events::EventLog;
use crate::store::{CapabilityStore, ElementType, StoreError};

/// Builds an addon instance from its construction context.
pub type AddonFactory = fn(AddonContext) -> Box<dyn Addon>;

/// One entry in the addon manifest.
///
/// The manifest replaces on-disk module discovery: builtins register
/// themselves here by name, the way dynamic addons registered by
/// filename.
pub struct AddonManifestEntry {
    pub name: &'static str,
    pub build: AddonFactory,
}

/// The set of successfully loaded addons, keyed by name.
///
/// Ordered so rebuilds iterate deterministically.
pub type LoadedAddons = Arc<BTreeMap<String, Arc<dyn Addon>>>;

/// Errors from loading a single addon.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Construction or the `init` hook failed.
    #[error("Addon init failed: {0}")]
    Init(#[from] AddonError),

    /// Persisting the addon's declared elements failed.
    #[error("Addon sync failed: {0}")]
    Sync(#[from] StoreError),
}

/// Discovers and instantiates addon modules.
pub struct AddonLoader {
    store: Arc<CapabilityStore>,
    events: Arc<EventLog>,
}

impl AddonLoader {
    pub fn new(store: Arc<CapabilityStore>, events: Arc<EventLog>) -> Self {
        Self { store, events }
    }

    /// Load every addon in the manifest. Failed addons are skipped.
    pub async fn load(&self, manifest: &[AddonManifestEntry]) -> LoadedAddons {
        let mut loaded: BTreeMap<String, Arc<dyn Addon>> = BTreeMap::new();
        for entry in manifest {
            match self.load_one(entry).await {
                Ok(addon) => {
                    info!(addon = entry.name, "Loaded addon");
                    loaded.insert(entry.name.to_string(), addon);
                }
                Err(e) => {
                    warn!(addon = entry.name, error = %e, "Skipping addon");
                }
            }
        }
        info!("Loaded {} addon(s)", loaded.len());
        Arc::new(loaded)
    }

    async fn load_one(&self, entry: &AddonManifestEntry) -> Result<Arc<dyn Addon>, LoaderError> {
        let ctx = AddonContext {
            data: self.store.clone(),
            log: AddonEventWriter::new(entry.name, self.events.clone()),
        };
        let mut addon = (entry.build)(ctx);
        addon.init().await?;
        let addon: Arc<dyn Addon> = Arc::from(addon);
        self.sync(entry.name, addon.as_ref())?;
        Ok(addon)
    }

    /// Upsert the addon row plus one element row per declared capability.
    ///
    /// Tools and prompts key on `name`, resources on `uri`. Upserts only
    /// refresh `updated_at` for existing rows; `enabled` survives.
    fn sync(&self, name: &str, addon: &dyn Addon) -> Result<(), StoreError> {
        self.store.upsert_addon(name)?;

        if let Some(source) = addon.as_tool_source() {
            for tool in source.declared_tools() {
                self.store
                    .upsert_element(name, &tool.name, ElementType::Tool)?;
            }
        }
        if let Some(source) = addon.as_resource_source() {
            for resource in source.declared_resources() {
                self.store
                    .upsert_element(name, &resource.uri, ElementType::Resource)?;
            }
        }
        if let Some(source) = addon.as_prompt_source() {
            for prompt in source.declared_prompts() {
                self.store
                    .upsert_element(name, &prompt.name, ElementType::Prompt)?;
            }
        }
        Ok(())
    }
}
