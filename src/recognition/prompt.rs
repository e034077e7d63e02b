//! Prompt selection
//!
//! Clients may switch on "advanced mode" and send their own instruction,
//! base64-encoded in a header. Otherwise the built-in instruction is used.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use hyper::HeaderMap;

use crate::logger;

pub const ADVANCED_MODE_HEADER: &str = "x-advanced-mode";
pub const CUSTOM_PROMPT_HEADER: &str = "x-custom-prompt";

/// Built-in instruction covering math/text pages and CAPTCHA images
pub const DEFAULT_PROMPT: &str = concat!(
    "不要输出任何额外的解释或说明,禁止输出例如：识别内容、以上内容已严格按照要求进行格式化和转换等相关无意义的文字！",
    "请识别图片中的内容，注意以下要求：\n",
    "对于数学公式和普通文本：\n",
    "1. 所有数学公式和数学符号都必须使用标准的LaTeX格式\n",
    "2. 行内公式使用单个$符号包裹，如：$x^2$\n",
    "3. 独立公式块使用两个$$符号包裹，如：$$\\sum_{i=1}^n i^2$$\n",
    "4. 普通文本保持原样，不要使用LaTeX格式\n",
    "5. 保持原文的段落格式和换行\n",
    "6. 明显的换行使用\\n表示\n",
    "7. 确保所有数学符号都被正确包裹在$或$$中\n\n",
    "对于验证码图片：\n",
    "1. 只输出验证码字符，不要加任何额外解释\n",
    "2. 忽略干扰线和噪点\n",
    "3. 注意区分相似字符，如0和O、1和l、2和Z等\n",
    "4. 验证码通常为4-6位字母数字组合\n\n",
);

// Decoding never rejects input a browser or Node client would accept:
// padding is optional and stray low bits in the last symbol are ignored.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 the forgiving way
///
/// URL-safe `-`/`_` are read as `+`/`/`, characters outside the alphabet are
/// skipped, decoding stops at the first `=`, and a dangling final symbol that
/// cannot form a byte is dropped.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let mut symbols: String = data
        .chars()
        .take_while(|&c| c != '=')
        .filter_map(|c| match c {
            '-' => Some('+'),
            '_' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
            _ => None,
        })
        .collect();
    if symbols.len() % 4 == 1 {
        symbols.pop();
    }
    LENIENT_BASE64.decode(symbols)
}

/// Per-request recognition switches read from the request headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub advanced_mode: bool,
    pub custom_prompt: Option<String>,
}

impl RecognitionOptions {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let advanced_mode = headers
            .get(ADVANCED_MODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "true");

        let custom_prompt = headers
            .get(CUSTOM_PROMPT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .and_then(|encoded| match decode_base64(encoded) {
                Ok(bytes) if bytes.is_empty() => None,
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    logger::log_warning(&format!(
                        "Failed to decode custom prompt, using default: {e}"
                    ));
                    None
                }
            });

        Self {
            advanced_mode,
            custom_prompt,
        }
    }
}

/// Pick the instruction sent alongside the image
pub fn select_prompt(options: &RecognitionOptions) -> &str {
    match options.custom_prompt.as_deref() {
        Some(prompt) if options.advanced_mode && !prompt.is_empty() => prompt,
        _ => DEFAULT_PROMPT,
    }
}
