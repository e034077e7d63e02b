// Accept loop module
// Accepts connections until the shutdown future resolves, then drains

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

use super::connection::accept_connection;
use crate::config;
use crate::logger;

/// How often the drain re-checks the connection counter
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Serve connections from `listener` until `shutdown` completes
///
/// After the signal the listener is closed, open connections are asked to
/// finish their current request, and this returns once none are left or
/// `performance.shutdown_timeout` has passed.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<config::AppState>,
    active_connections: Arc<AtomicUsize>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let (draining_tx, draining_rx) = watch::channel(false);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(
                            stream,
                            peer_addr,
                            &state,
                            &active_connections,
                            draining_rx.clone(),
                        );
                    }
                    Err(e) => {
                        logger::log_error(&format!("Failed to accept connection: {e}"));
                    }
                }
            }

            () = &mut shutdown => {
                break;
            }
        }
    }

    drop(listener);
    logger::log_server_stop(active_connections.load(Ordering::SeqCst));

    draining_tx.send_replace(true);
    drain(&active_connections, state.config.performance.shutdown_timeout).await;
}

/// Wait for the connection counter to reach zero, bounded by `timeout_secs`
async fn drain(active_connections: &AtomicUsize, timeout_secs: u64) {
    let started = Instant::now();
    let deadline = started + Duration::from_secs(timeout_secs);

    loop {
        let remaining = active_connections.load(Ordering::SeqCst);
        if remaining == 0 {
            logger::log_drain_complete(started.elapsed().as_millis());
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
            () = tokio::time::sleep_until(deadline) => {
                logger::log_drain_timeout(
                    active_connections.load(Ordering::SeqCst),
                    timeout_secs,
                );
                return;
            }
        }
    }
}
