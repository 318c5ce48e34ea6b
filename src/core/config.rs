//! Configuration for the addon bridge.
//!
//! Populated from environment variables (prefixed `MCP_`) with sane
//! defaults, the same way the server template does it.

use serde::{Deserialize, Serialize};

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// HTTP listener configuration.
    pub http: HttpConfig,

    /// Capability store configuration.
    pub store: StoreConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Telemetry aggregation configuration.
    pub stats: StatsConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host address to bind to.
    pub host: String,

    /// Port number to listen on.
    pub port: u16,

    /// Enable CORS for browser clients.
    pub enable_cors: bool,
}

/// Capability store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file. `:memory:` opens a private
    /// in-memory store.
    pub path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,
}

/// Telemetry aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Trailing window, in hours, for the status endpoint's aggregates.
    pub window_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "mcp-addon-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                enable_cors: true,
            },
            store: StoreConfig {
                path: "data/registry.db".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            stats: StatsConfig { window_hours: 24 },
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Recognized variables: `MCP_SERVER_NAME`, `MCP_LOG_LEVEL`,
    /// `MCP_HTTP_HOST`, `MCP_HTTP_PORT`, `MCP_HTTP_CORS`,
    /// `MCP_STORE_PATH`, `MCP_STATS_WINDOW_HOURS`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            config.server.name = name;
        }
        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(host) = std::env::var("MCP_HTTP_HOST") {
            config.http.host = host;
        }
        if let Ok(port) = std::env::var("MCP_HTTP_PORT") {
            if let Ok(port) = port.parse() {
                config.http.port = port;
            }
        }
        if let Ok(cors) = std::env::var("MCP_HTTP_CORS") {
            config.http.enable_cors = cors.parse().unwrap_or(true);
        }
        if let Ok(path) = std::env::var("MCP_STORE_PATH") {
            config.store.path = path;
        }
        if let Ok(hours) = std::env::var("MCP_STATS_WINDOW_HOURS") {
            if let Ok(hours) = hours.parse() {
                config.stats.window_hours = hours;
            }
        }

        config
    }

    /// The HTTP bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}
