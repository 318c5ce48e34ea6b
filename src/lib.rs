//! Addon capability registry and MCP protocol bridge.
//!
//! This crate discovers pluggable addons - each declaring tools,
//! resources, and prompts - persists per-addon and per-element
//! enable/disable state, keeps exactly one live protocol-server
//! instance in sync with that state, and bridges it to HTTP clients
//! while recording telemetry for every invocation.
//!
//! # Architecture
//!
//! - **core**: configuration and unified error handling
//! - **store**: durable addon/element/event records (SQLite)
//! - **addons**: the addon contract, the loader, and builtin addons
//! - **registry**: effective-enablement queries and toggles
//! - **coordinator**: live server construction and atomic hot swap
//! - **events**: invocation telemetry log
//! - **bridge**: the JSON-RPC bridge endpoint and management HTTP API
//! - **app**: assembly and lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_addon_bridge::{addons::builtin::builtin_addons, BridgeApp, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let app = BridgeApp::start(config, &builtin_addons()).await?;
//!     let _router = app.router();
//!     // Serve the router...
//!     Ok(())
//! }
//! ```

pub mod addons;
pub mod app;
pub mod bridge;
pub mod coordinator;
pub mod core;
pub mod events;
pub mod registry;
pub mod store;

// Re-export commonly used types for convenience
pub use app::BridgeApp;
pub use core::{Config, Error, Result};
