//! Builtin addons bundled with the bridge.

mod calculator;
mod sysinfo;

use super::AddonManifestEntry;

pub use calculator::CalculatorAddon;
pub use sysinfo::SysinfoAddon;

/// The manifest of addons shipped with the binary.
pub fn builtin_addons() -> Vec<AddonManifestEntry> {
    vec![
        AddonManifestEntry {
            name: "calculator",
            build: |ctx| Box::new(CalculatorAddon::new(ctx)),
        },
        AddonManifestEntry {
            name: "sysinfo",
            build: |ctx| Box::new(SysinfoAddon::new(ctx)),
        },
    ]
}
