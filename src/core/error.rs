//! Unified error type for the bridge.
//!
//! Domain modules define their own error enums (`StoreError`,
//! `AddonError`, `LoaderError`, `DispatchError`); this type collects
//! them for callers that cross domain boundaries, such as startup.

use thiserror::Error;

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the addon bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// Error from the capability store.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Error from an addon lifecycle hook or handler.
    #[error("Addon error: {0}")]
    Addon(#[from] crate::addons::AddonError),

    /// Error while loading an addon.
    #[error("Loader error: {0}")]
    Loader(#[from] crate::addons::loader::LoaderError),

    /// Error dispatching against the live server.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::coordinator::DispatchError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from file operations or network communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal errors that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
