//! Request handler module
//!
//! Routing dispatch, the recognition endpoints and static file serving.

pub mod body;
pub mod recognize;
pub mod router;
pub mod static_files;

// Re-export main entry point
pub use router::handle_request;
