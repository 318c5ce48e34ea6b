//! Core infrastructure: configuration and unified error handling.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
