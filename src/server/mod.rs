// Server module entry
// Listener setup, accept loop, per-connection serving and shutdown signals

pub mod connection;
pub mod listener;
pub mod signal;

// `loop` is a keyword, hence `accept_loop`
pub mod accept_loop;

// Re-export common entry points
pub use accept_loop::serve;
pub use listener::create_reusable_listener;
pub use signal::shutdown_signal;
