// Configuration module entry point
// Manages application configuration and runtime state

mod state;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use state::AppState;
pub use types::{
    Config, HttpConfig, LoggingConfig, PerformanceConfig, ServerConfig, UpstreamConfig,
};

/// Default config file (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified file path (without extension)
    ///
    /// Sources, lowest priority first: built-in defaults, the optional file,
    /// `RELAY_*` environment variables (`__` separates sections), and `PORT`.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.show_headers", false)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 120)?
            .set_default("performance.write_timeout", 120)?
            .set_default("performance.shutdown_timeout", 30)?
            .set_default("http.server_name", "ocr-relay/0.1")?
            .set_default("http.enable_cors", true)?
            .set_default("http.max_body_size", 52_428_800)? // 50MB
            .set_default("http.static_dir", "public")?
            .set_default("http.index_file", "index.html")?
            .set_default("upstream.base_url", "https://chat.qwenlm.ai")?
            .set_default("upstream.model", "qwen-max-latest")?
            .set_default("upstream.user_agent", "ocr-relay/0.1")?
            .set_default("upstream.timeout_secs", 120)?
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
