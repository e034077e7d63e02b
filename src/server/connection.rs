// Connection handling module
// Accepts a single TCP connection and serves it over HTTP/1.1

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config;
use crate::handler;
use crate::logger;

/// Accept and process a connection, checking limits and logging.
///
/// # Arguments
///
/// * `stream` - The TCP stream to handle
/// * `peer_addr` - The peer's socket address
/// * `state` - Shared application state
/// * `conn_counter` - Active connection counter
/// * `draining` - Flips to `true` once the server is shutting down
pub fn accept_connection(
    stream: tokio::net::TcpStream,
    peer_addr: std::net::SocketAddr,
    state: &Arc<config::AppState>,
    conn_counter: &Arc<AtomicUsize>,
    draining: watch::Receiver<bool>,
) {
    // Increment counter first, then check limit (prevents race condition)
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection rejected."
            ));
            drop(stream);
            return;
        }
    }

    if state.cached_access_log.load(Ordering::Relaxed) && state.config.logging.show_headers {
        logger::log_connection_accepted(&peer_addr);
    }

    handle_connection(
        stream,
        peer_addr,
        Arc::clone(state),
        Arc::clone(conn_counter),
        draining,
    );
}

/// Serve one connection in a spawned task.
///
/// The whole connection is bounded by `max(read_timeout, write_timeout)`.
/// When `draining` flips, the request in progress is completed and the
/// connection is closed instead of being kept alive.
fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: std::net::SocketAddr,
    state: Arc<config::AppState>,
    conn_counter: Arc<AtomicUsize>,
    mut draining: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);

        let keep_alive_timeout = state.config.performance.keep_alive_timeout;
        let timeout_duration = std::time::Duration::from_secs(std::cmp::max(
            state.config.performance.read_timeout,
            state.config.performance.write_timeout,
        ));

        let mut builder = http1::Builder::new();
        builder.keep_alive(keep_alive_timeout > 0);

        let conn = builder.serve_connection(
            io,
            service_fn(move |req| handler::handle_request(req, Arc::clone(&state), peer_addr)),
        );

        tokio::pin!(conn);

        let served = async {
            tokio::select! {
                result = conn.as_mut() => result,
                _ = draining.changed() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            }
        };

        match tokio::time::timeout(timeout_duration, served).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger::log_connection_error(&err),
            Err(_) => {
                logger::log_warning(&format!(
                    "Connection from {peer_addr} timed out after {} seconds",
                    timeout_duration.as_secs()
                ));
            }
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}
