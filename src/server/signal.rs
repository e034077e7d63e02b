// Signal handling module
//
// Supported signals:
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use crate::logger;

/// Resolve once the process is asked to stop (Unix)
///
/// | Signal  | Action        |
/// |---------|---------------|
/// | SIGTERM | Graceful stop |
/// | SIGINT  | Graceful stop |
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            logger::log_error(&format!("Failed to register signal handlers: {e}"));
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            logger::log_warning("SIGTERM received, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            logger::log_warning("SIGINT received (Ctrl+C), initiating graceful shutdown");
        }
    }
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => logger::log_warning("Ctrl+C received, initiating graceful shutdown"),
        Err(e) => {
            logger::log_error(&format!("Failed to listen for Ctrl+C: {e}"));
            std::future::pending::<()>().await;
        }
    }
}
