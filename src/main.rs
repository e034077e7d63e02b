use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use ocr_relay::config::{self, AppState, Config};
use ocr_relay::{logger, server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional first argument: config file path without extension
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = Config::load_from(&config_path)?;
    logger::init(&cfg)?;

    // Create Tokio runtime, worker count from config
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let listener = server::create_reusable_listener(addr)?;
    let state = Arc::new(AppState::new(&cfg)?);
    let active_connections = Arc::new(AtomicUsize::new(0));

    logger::log_server_start(&addr, &cfg);

    server::serve(listener, state, active_connections, server::shutdown_signal()).await;
    Ok(())
}
