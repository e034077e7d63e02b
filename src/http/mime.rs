//! MIME type detection module
//!
//! Returns the Content-Type for files served from the static directory.

/// Get MIME Content-Type based on file extension
///
/// # Examples
/// ```
/// use ocr_relay::http::mime::get_content_type;
/// assert_eq!(get_content_type(Some("html")), "text/html; charset=utf-8");
/// assert_eq!(get_content_type(Some("webp")), "image/webp");
/// assert_eq!(get_content_type(None), "application/octet-stream");
/// ```
pub fn get_content_type(extension: Option<&str>) -> &'static str {
    let lowered = extension.map(str::to_ascii_lowercase);
    match lowered.as_deref() {
        // Text
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("txt" | "md") => "text/plain; charset=utf-8",

        // Scripts and data
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("wasm") => "application/wasm",

        // Images
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",

        // Fonts (math rendering in the bundled page)
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",

        _ => "application/octet-stream",
    }
}
