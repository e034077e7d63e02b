//! Recognition logic
//!
//! Decides which instruction is sent to the vision model and turns the
//! model's free-text answer into the shape returned to clients.

pub mod normalize;
pub mod prompt;
pub mod token;

pub use normalize::{normalize, Recognition, RecognitionKind, FAILURE_TEXT};
pub use prompt::{decode_base64, select_prompt, RecognitionOptions, DEFAULT_PROMPT};
pub use token::{extract_token, Credentials};
