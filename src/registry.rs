//! Effective-enablement queries and toggle operations.
//!
//! The registry is a pure state mutator plus query layer over the
//! capability store. Toggles have no side effect on the live server;
//! callers are responsible for triggering a rebuild afterward.

use std::sync::Arc;

use crate::store::{AddonRow, CapabilityStore, ElementRow, ElementType, StoreResult};

/// Query facade computing effective enablement.
pub struct Registry {
    store: Arc<CapabilityStore>,
}

impl Registry {
    pub fn new(store: Arc<CapabilityStore>) -> Self {
        Self { store }
    }

    /// True iff an addon row exists with that name and is enabled.
    pub async fn is_addon_enabled(&self, name: &str) -> StoreResult<bool> {
        self.store.addon_enabled(name)
    }

    /// True iff the addon AND the element are both enabled.
    ///
    /// Disabling the parent addon disables every element under it,
    /// regardless of element-level flags.
    pub async fn is_element_enabled(
        &self,
        addon_name: &str,
        element_name: &str,
        element_type: ElementType,
    ) -> StoreResult<bool> {
        self.store
            .element_enabled(addon_name, element_name, element_type)
    }

    /// Flip an addon's enabled flag. Unknown name yields 0 affected rows.
    pub async fn toggle_addon(&self, name: &str) -> StoreResult<usize> {
        self.store.toggle_addon(name)
    }

    /// Flip an element's enabled flag by row id. Unknown id yields 0.
    pub async fn toggle_element(&self, id: i64) -> StoreResult<usize> {
        self.store.toggle_element(id)
    }

    /// All addon rows, for the management surface.
    pub async fn list_addons(&self) -> StoreResult<Vec<AddonRow>> {
        self.store.list_addons()
    }

    /// All element rows, for the management surface.
    pub async fn list_elements(&self) -> StoreResult<Vec<ElementRow>> {
        self.store.list_elements()
    }
}
