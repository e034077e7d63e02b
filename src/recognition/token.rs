//! Session token extraction from the cookie header

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{RelayError, Result};

/// Header carrying the caller's upstream session cookie
pub const COOKIE_HEADER: &str = "x-custom-cookie";

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"token=([^;]+)").expect("token pattern is valid"))
}

/// Extract the value of the first non-empty `token=` field in a cookie string
pub fn extract_token(cookie: &str) -> Option<String> {
    token_pattern()
        .captures(cookie)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Bearer token plus the raw cookie, both forwarded to the upstream service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub cookie: String,
}

impl Credentials {
    pub fn from_cookie(cookie: &str) -> Result<Self> {
        let token = extract_token(cookie)
            .ok_or_else(|| RelayError::bad_request("Invalid cookie format: missing token"))?;
        Ok(Self {
            token,
            cookie: cookie.to_string(),
        })
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}
