// Application state module
// Holds the loaded configuration and the shared upstream client

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::types::Config;
use crate::error::Result;
use crate::upstream::QwenClient;

/// Application state shared by every connection
pub struct AppState {
    pub config: Config,
    pub upstream: QwenClient,

    // Cached config values for fast access without locks
    pub cached_access_log: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        let upstream = QwenClient::new(&config.upstream)?;
        Ok(Self {
            config: config.clone(),
            upstream,
            cached_access_log: Arc::new(AtomicBool::new(config.logging.access_log)),
        })
    }
}
