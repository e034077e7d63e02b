//! OCR relay
//!
//! Accepts an image by URL, base64 payload, multipart upload or a
//! pre-uploaded file id, forwards it to the Qwen vision-chat service with the
//! caller's session token, and returns the model's answer classified as
//! CAPTCHA or formatted text.

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod logger;
pub mod recognition;
pub mod server;
pub mod upstream;

pub use config::{AppState, Config};
pub use error::{RelayError, Result};
