//! Access log format module
//!
//! Supports multiple log formats:
//! - `combined` (Apache/Nginx combined format)
//! - `common` (Common Log Format - CLF)
//! - `json` (one JSON object per line)
//! - Custom patterns with `$variable` substitution

use chrono::Local;
use serde_json::json;

const CLF_TIME: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Access log entry for one relayed request
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    /// Client IP address
    pub remote_addr: String,
    pub time: chrono::DateTime<Local>,
    pub method: String,
    pub path: String,
    /// Query string (without leading ?)
    pub query: Option<String>,
    pub http_version: String,
    pub status: u16,
    pub body_bytes: usize,
    pub user_agent: Option<String>,
    /// Recognition type reported to the client (`text`/`captcha`), if any
    pub result_type: Option<String>,
    /// Request processing time in microseconds
    pub request_time_us: u64,
}

impl AccessLogEntry {
    /// Create a new access log entry with current timestamp
    pub fn new(remote_addr: String, method: String, path: String) -> Self {
        Self {
            remote_addr,
            time: Local::now(),
            method,
            path,
            query: None,
            http_version: "1.1".to_string(),
            status: 200,
            body_bytes: 0,
            user_agent: None,
            result_type: None,
            request_time_us: 0,
        }
    }

    /// Format the log entry according to the specified format
    pub fn format(&self, format: &str) -> String {
        match format {
            "combined" => format!(
                "{} \"{}\" \"{}\"",
                self.format_common(),
                self.result_type.as_deref().unwrap_or("-"),
                self.user_agent.as_deref().unwrap_or("-"),
            ),
            "common" => self.format_common(),
            "json" => self.format_json(),
            custom => self.format_custom(custom),
        }
    }

    fn request_uri(&self) -> String {
        self.query
            .as_ref()
            .map_or_else(|| self.path.clone(), |q| format!("{}?{q}", self.path))
    }

    fn request_line(&self) -> String {
        format!("{} {} HTTP/{}", self.method, self.request_uri(), self.http_version)
    }

    #[allow(clippy::cast_precision_loss)]
    fn request_time_secs(&self) -> f64 {
        self.request_time_us as f64 / 1_000_000.0
    }

    /// `$remote_addr - - [$time_local] "$request" $status $body_bytes_sent`
    fn format_common(&self) -> String {
        format!(
            "{} - - [{}] \"{}\" {} {}",
            self.remote_addr,
            self.time.format(CLF_TIME),
            self.request_line(),
            self.status,
            self.body_bytes,
        )
    }

    fn format_json(&self) -> String {
        json!({
            "remote_addr": self.remote_addr,
            "time": self.time.to_rfc3339(),
            "method": self.method,
            "path": self.path,
            "query": self.query,
            "http_version": self.http_version,
            "status": self.status,
            "body_bytes": self.body_bytes,
            "user_agent": self.user_agent,
            "result_type": self.result_type,
            "request_time_us": self.request_time_us,
        })
        .to_string()
    }

    /// Custom format with variable substitution
    ///
    /// Supported variables: `$remote_addr`, `$time_local`, `$time_iso8601`,
    /// `$request`, `$request_method`, `$request_uri`, `$status`,
    /// `$body_bytes_sent`, `$http_user_agent`, `$result_type`,
    /// `$request_time` (seconds, 3 decimal places).
    fn format_custom(&self, pattern: &str) -> String {
        // Longer variables first: $request_time and $request_uri before $request
        let substitutions = [
            ("$remote_addr", self.remote_addr.clone()),
            ("$time_local", self.time.format(CLF_TIME).to_string()),
            ("$time_iso8601", self.time.to_rfc3339()),
            ("$request_time", format!("{:.3}", self.request_time_secs())),
            ("$request_method", self.method.clone()),
            ("$request_uri", self.request_uri()),
            ("$request", self.request_line()),
            ("$status", self.status.to_string()),
            ("$body_bytes_sent", self.body_bytes.to_string()),
            ("$http_user_agent", self.user_agent.clone().unwrap_or_else(|| "-".to_string())),
            ("$result_type", self.result_type.clone().unwrap_or_else(|| "-".to_string())),
        ];

        substitutions
            .iter()
            .fold(pattern.to_string(), |acc, (var, value)| acc.replace(var, value))
    }
}
