//! HTTP cache validation for static files
//!
//! `ETag` generation and `If-None-Match` handling.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Quoted `ETag` derived from the content hash, e.g. `"abc123def"`
pub fn generate_etag(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// True when the client's `If-None-Match` lists `etag` (or `*`), so a 304 is due
pub fn check_etag_match(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match.is_some_and(|client_etag| {
        client_etag
            .split(',')
            .any(|e| e.trim() == etag || e.trim() == "*")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_is_stable_and_quoted() {
        let a = generate_etag(b"<html></html>");
        assert_eq!(a, generate_etag(b"<html></html>"));
        assert_ne!(a, generate_etag(b"<html> </html>"));
        assert!(a.starts_with('"') && a.ends_with('"'));
    }

    #[test]
    fn test_etag_match() {
        let etag = generate_etag(b"x");
        assert!(check_etag_match(Some(&etag), &etag));
        assert!(check_etag_match(Some(&format!("\"other\", {etag}")), &etag));
        assert!(check_etag_match(Some("*"), &etag));
        assert!(!check_etag_match(Some("\"other\""), &etag));
        assert!(!check_etag_match(None, &etag));
    }
}
