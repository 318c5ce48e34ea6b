//! Application assembly and lifecycle.
//!
//! `BridgeApp` wires the store, loader, registry, event log, and
//! coordinator together, runs the startup load plus the initial
//! rebuild, and hands out the HTTP router. Signal handling stays at
//! the binary entry point; the hosting process drives `start`/`stop`.

use std::sync::Arc;

use tracing::info;

use crate::addons::{AddonLoader, AddonManifestEntry};
use crate::bridge::{self, AppState};
use crate::coordinator::RebuildCoordinator;
use crate::core::{Config, Result};
use crate::events::EventLog;
use crate::registry::Registry;
use crate::store::CapabilityStore;

/// The assembled addon bridge.
pub struct BridgeApp {
    state: AppState,
}

impl BridgeApp {
    /// Build the bridge: open the store, load the manifest's addons,
    /// and bring up the first live server from persisted state.
    pub async fn start(config: Config, manifest: &[AddonManifestEntry]) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(CapabilityStore::open(&config.store.path)?);
        let events = Arc::new(EventLog::new(store.clone()));
        let registry = Arc::new(Registry::new(store.clone()));

        let loader = AddonLoader::new(store.clone(), events.clone());
        let loaded = loader.load(manifest).await;

        let coordinator = Arc::new(RebuildCoordinator::new(
            loaded,
            registry.clone(),
            events.clone(),
        ));
        coordinator.rebuild().await?;

        info!(
            addons = coordinator.addon_names().len(),
            "Bridge started"
        );

        Ok(Self {
            state: AppState {
                coordinator,
                registry,
                events,
                config,
            },
        })
    }

    /// The HTTP router serving the bridge and its management surface.
    pub fn router(&self) -> axum::Router {
        bridge::router(self.state.clone())
    }

    /// Shared state, for embedding the bridge in another process.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Retire the live server. In-flight requests drain against it.
    pub async fn stop(&self) {
        self.state.coordinator.live().await.close();
        info!("Bridge stopped");
    }
}
