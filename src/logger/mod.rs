//! Logger module
//!
//! Provides logging utilities for the relay including:
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Upstream call and request failure logging
//! - File-based logging support

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::Config;
use std::net::SocketAddr;

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &Config) -> std::io::Result<()> {
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
    )
}

/// Write to info/access log
fn write_info(message: &str) {
    if writer::is_initialized() {
        writer::get().write_info(message);
    } else {
        println!("{message}");
    }
}

/// Write to error log
fn write_error(message: &str) {
    if writer::is_initialized() {
        writer::get().write_error(message);
    } else {
        eprintln!("{message}");
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    write_info("======================================");
    write_info("OCR relay started successfully");
    write_info(&format!("Listening on: http://{addr}"));
    write_info(&format!("Log level: {}", config.logging.level));
    if let Some(workers) = config.server.workers {
        write_info(&format!("Worker threads: {workers}"));
    }
    write_info(&format!("Upstream: {}", config.upstream.base_url));
    write_info(&format!("Model: {}", config.upstream.model));
    write_info(&format!("Static directory: {}", config.http.static_dir));
    write_info(&format!("Max body size: {} bytes", config.http.max_body_size));
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("Error log: {path}"));
    }
    write_info("======================================\n");
}

pub fn log_server_stop(active_connections: usize) {
    write_info(&format!(
        "[Shutdown] Listener closed, {active_connections} connection(s) still finishing"
    ));
}

pub fn log_drain_complete(elapsed_ms: u128) {
    write_info(&format!("[Shutdown] All connections finished after {elapsed_ms}ms"));
}

pub fn log_drain_timeout(remaining: usize, timeout_secs: u64) {
    write_error(&format!(
        "[WARN] Shutdown deadline of {timeout_secs}s reached, abandoning {remaining} connection(s)"
    ));
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    write_info(&format!("[Connection] Accepted from: {peer_addr}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_headers_count(count: usize, show: bool) {
    if show {
        write_info(&format!("[Headers] Count: {count}"));
    }
}

/// Log a failed relay request; `handler` names the endpoint that failed
pub fn log_request_failed(handler: &str, status: u16, message: &str) {
    write_error(&format!("[ERROR] {handler} -> {status}: {message}"));
}

pub fn log_upstream_call(method: &str, url: &str, status: u16) {
    write_info(&format!("[Upstream] {method} {url} - {status}"));
}

pub fn log_recognition(kind: &str, chars: usize) {
    write_info(&format!("[Recognize] type={kind} result_chars={chars}"));
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    if writer::is_initialized() {
        writer::get().write_access(&entry.format(format));
    } else {
        println!("{}", entry.format(format));
    }
}
