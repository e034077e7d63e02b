//! Outbound calls to the vision-chat service

mod client;

pub use client::{ImagePayload, QwenClient, UploadResponse};
