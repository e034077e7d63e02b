//! Post-processing of the model's answer
//!
//! Short alphanumeric answers are treated as CAPTCHA solutions; anything
//! else is cleaned up as LaTeX-flavoured text.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Returned in place of an answer when the model gave none
pub const FAILURE_TEXT: &str = "识别失败";

/// Longest answer still considered a CAPTCHA
const CAPTCHA_MAX_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionKind {
    Text,
    Captcha,
}

impl RecognitionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Captcha => "captcha",
        }
    }
}

/// Normalized recognition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub result: String,
    pub kind: RecognitionKind,
}

struct Cleanup {
    pattern: Regex,
    replacement: &'static str,
}

fn cleanups() -> &'static [Cleanup] {
    static CLEANUPS: OnceLock<Vec<Cleanup>> = OnceLock::new();
    CLEANUPS.get_or_init(|| {
        [
            // Full-width parentheses after a backslash are broken inline-math delimiters
            (r"\\（", r"\("),
            (r"\\）", r"\)"),
            (r"\n{3,}", "\n\n"),
            (r"\$\s+", "$"),
            (r"\s+\$", "$"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Cleanup {
            pattern: Regex::new(pattern).expect("cleanup pattern is valid"),
            replacement,
        })
        .collect()
    })
}

fn is_captcha(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= CAPTCHA_MAX_CHARS
        && text.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Apply the text cleanups in order, then trim
pub fn clean_text(text: &str) -> String {
    let cleaned = cleanups().iter().fold(text.to_string(), |acc, cleanup| {
        cleanup
            .pattern
            .replace_all(&acc, regex::NoExpand(cleanup.replacement))
            .into_owned()
    });
    cleaned.trim().to_string()
}

/// Classify and clean a raw model answer
///
/// Advanced-mode answers and the failure placeholder pass through untouched.
pub fn normalize(raw: &str, advanced_mode: bool) -> Recognition {
    if advanced_mode || raw == FAILURE_TEXT {
        return Recognition {
            result: raw.to_string(),
            kind: RecognitionKind::Text,
        };
    }

    if is_captcha(raw) {
        return Recognition {
            result: raw.to_ascii_uppercase(),
            kind: RecognitionKind::Captcha,
        };
    }

    Recognition {
        result: clean_text(raw),
        kind: RecognitionKind::Text,
    }
}
