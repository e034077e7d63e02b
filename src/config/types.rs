// Configuration types module
// Defines all configuration-related data structures

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    pub upstream: UpstreamConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    pub show_headers: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    /// Seconds to wait for in-flight connections after a shutdown signal
    pub shutdown_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub enable_cors: bool,
    pub max_body_size: u64,
    /// Directory served for `GET` requests (the bundled web page lives here)
    pub static_dir: String,
    /// File served for `/` and for directory paths
    pub index_file: String,
}

/// Third-party vision-chat service
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    /// Scheme and host of the chat service, without trailing slash
    pub base_url: String,
    pub model: String,
    pub user_agent: String,
    /// Whole-request timeout for every outbound call
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn files_url(&self) -> String {
        format!("{}/api/v1/files/", self.base_url.trim_end_matches('/'))
    }

    pub fn completions_url(&self) -> String {
        format!("{}/api/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
