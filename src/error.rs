//! Relay error type
//!
//! Every failure inside a request handler ends up here and is turned into a
//! JSON error body by the handler that owns the request.

use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Request body too large (max: {max} bytes)")]
    PayloadTooLarge { max: u64 },

    #[error("{0}")]
    Upstream(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] multer::Error),

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to read request body: {0}")]
    Body(String),
}

impl RelayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// HTTP status returned to the caller for this error
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
