//! HTTP protocol layer module
//!
//! Response builders, cache validation and MIME detection, kept apart from
//! the relay handlers that use them.

pub mod cache;
pub mod mime;
pub mod response;

// Re-export commonly used builders
pub use response::{
    build_304_response, build_404_response, build_405_response, build_413_response,
    build_api_404_response, build_file_response, build_health_response, build_options_response,
    finalize_response, json_response,
};
