//! Recognition endpoints
//!
//! Three endpoints take an image in different forms, make sure it is stored
//! on the chat service, and then share one recognition step. The fourth only
//! forwards an upload and hands the service's answer back.

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

use super::body::{extract_file, parse_form, read_body};
use crate::config::AppState;
use crate::error::{RelayError, Result};
use crate::http;
use crate::logger;
use crate::recognition::token::COOKIE_HEADER;
use crate::recognition::{
    decode_base64, normalize, select_prompt, Credentials, RecognitionOptions,
};
use crate::upstream::ImagePayload;

#[derive(Debug, Deserialize)]
struct UrlRequest {
    #[serde(rename = "imageUrl", default)]
    image_url: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Base64Request {
    #[serde(rename = "base64Image", default)]
    base64_image: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FileIdRequest {
    #[serde(rename = "imageId", default)]
    image_id: Option<Value>,
}

/// Text of a required body field, `None` when it is absent or falsy
///
/// Numbers and other JSON values are accepted and rendered as text, so an
/// `imageId` sent as `42` works like `"42"`.
fn field_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) => Some(text).filter(|t| !t.is_empty()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Everything the shared recognition step needs
struct PreparedImage {
    credentials: Credentials,
    image_id: String,
    options: RecognitionOptions,
}

/// `POST /api/recognize/url`
pub async fn handle_url<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match prepare_url(req, &state).await {
        Ok(prepared) => recognize(&state, prepared).await,
        Err(e) => error_response("recognize/url", &e),
    }
}

async fn prepare_url<B>(req: Request<B>, state: &AppState) -> Result<PreparedImage>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = read_body(body, state.config.http.max_body_size).await?;
    let request: UrlRequest = parse_form(content_type(&parts), &body)?;

    let cookie = cookie(&parts);
    let Some(image_url) =
        field_text(request.image_url).filter(|_| !cookie.is_empty())
    else {
        return Err(RelayError::bad_request("Missing cookie or imageUrl"));
    };
    let credentials = Credentials::from_cookie(cookie)?;

    let image = state.upstream.fetch_image(&image_url).await?;
    let image_id = state
        .upstream
        .upload_image(&credentials, ImagePayload::png(image))
        .await?;

    Ok(PreparedImage {
        credentials,
        image_id,
        options: RecognitionOptions::from_headers(&parts.headers),
    })
}

/// `POST /api/recognize/base64`
pub async fn handle_base64<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match prepare_base64(req, &state).await {
        Ok(prepared) => recognize(&state, prepared).await,
        Err(e) => error_response("recognize/base64", &e),
    }
}

async fn prepare_base64<B>(req: Request<B>, state: &AppState) -> Result<PreparedImage>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = read_body(body, state.config.http.max_body_size).await?;
    let request: Base64Request = parse_form(content_type(&parts), &body)?;

    let cookie = cookie(&parts);
    let Some(encoded) =
        field_text(request.base64_image).filter(|_| !cookie.is_empty())
    else {
        return Err(RelayError::bad_request("Missing cookie or base64Image"));
    };
    let credentials = Credentials::from_cookie(cookie)?;

    let (mime_type, data) = split_data_url(&encoded);
    let image = decode_base64(data)?;
    let image_id = state
        .upstream
        .upload_image(&credentials, ImagePayload::with_mime(image, mime_type))
        .await?;

    Ok(PreparedImage {
        credentials,
        image_id,
        options: RecognitionOptions::from_headers(&parts.headers),
    })
}

fn data_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:(image/.*?);base64,(.*)$").expect("data URL pattern is valid")
    })
}

/// Split an optional `data:` URL prefix off a base64 image
///
/// Returns the MIME type (`image/png` unless the prefix names an image
/// type) and the bare base64 text.
pub fn split_data_url(encoded: &str) -> (&str, &str) {
    const DEFAULT_MIME: &str = "image/png";

    if !encoded.starts_with("data:") {
        return (DEFAULT_MIME, encoded);
    }
    if let Some(caps) = data_url_pattern().captures(encoded) {
        if let (Some(mime), Some(data)) = (caps.get(1), caps.get(2)) {
            return (mime.as_str(), data.as_str());
        }
    }
    // Unrecognised data URL: keep whatever follows the first comma
    let data = encoded.find(',').map_or(encoded, |i| &encoded[i + 1..]);
    (DEFAULT_MIME, data)
}

/// `POST /recognize`: the image is already stored on the chat service
pub async fn handle_file_id<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match prepare_file_id(req, &state).await {
        Ok(prepared) => recognize(&state, prepared).await,
        Err(e) => error_response("recognize", &e),
    }
}

async fn prepare_file_id<B>(req: Request<B>, state: &AppState) -> Result<PreparedImage>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = read_body(body, state.config.http.max_body_size).await?;
    let request: FileIdRequest = parse_form(content_type(&parts), &body)?;

    let cookie = cookie(&parts);
    let Some(image_id) =
        field_text(request.image_id).filter(|_| !cookie.is_empty())
    else {
        return Err(RelayError::bad_request("Missing cookie or imageId"));
    };

    Ok(PreparedImage {
        credentials: Credentials::from_cookie(cookie)?,
        image_id,
        options: RecognitionOptions::from_headers(&parts.headers),
    })
}

/// `POST /proxy/upload`: forward a multipart upload and relay the answer verbatim
pub async fn handle_proxy_upload<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match proxy_upload(req, &state).await {
        Ok(resp) => resp,
        Err(e) => error_response("proxy/upload", &e),
    }
}

async fn proxy_upload<B>(req: Request<B>, state: &AppState) -> Result<Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let body = read_body(body, state.config.http.max_body_size).await?;

    let Some(file) = extract_file(content_type(&parts), body).await? else {
        return Err(RelayError::bad_request("No file uploaded"));
    };
    let credentials = Credentials::from_cookie(cookie(&parts))?;

    let upload = state
        .upstream
        .upload_file(&credentials, file, "Proxy upload")
        .await?;
    Ok(http::json_response(upload.status, &upload.body))
}

/// Shared step: ask the model about a stored image and normalize its answer
///
/// Failures here carry `"success": false`, unlike the preparation errors.
async fn recognize(state: &AppState, prepared: PreparedImage) -> Response<Full<Bytes>> {
    let PreparedImage {
        credentials,
        image_id,
        options,
    } = prepared;

    let prompt = select_prompt(&options);
    let raw = match state
        .upstream
        .chat_completion(&credentials, prompt, &image_id)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            logger::log_request_failed("recognizeImage", e.status().as_u16(), &e.to_string());
            return http::json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "success": false, "error": e.to_string() }),
            );
        }
    };

    let recognition = normalize(&raw, options.advanced_mode);
    logger::log_recognition(recognition.kind.as_str(), recognition.result.chars().count());

    let mut resp = http::json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "result": recognition.result,
            "type": recognition.kind,
        }),
    );
    resp.extensions_mut().insert(recognition.kind);
    resp
}

/// `{"error": message}` with the status the error maps to
fn error_response(handler: &str, err: &RelayError) -> Response<Full<Bytes>> {
    let status = err.status();
    logger::log_request_failed(handler, status.as_u16(), &err.to_string());
    http::json_response(status, &json!({ "error": err.to_string() }))
}

fn cookie(parts: &Parts) -> &str {
    parts
        .headers
        .get(COOKIE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn content_type(parts: &Parts) -> Option<&str> {
    parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_text_follows_truthiness() {
        assert_eq!(field_text(Some(json!("f-1"))).as_deref(), Some("f-1"));
        assert_eq!(field_text(Some(json!(42))).as_deref(), Some("42"));
        assert_eq!(field_text(Some(json!(true))).as_deref(), Some("true"));
        assert_eq!(field_text(Some(json!(""))), None);
        assert_eq!(field_text(Some(json!(0))), None);
        assert_eq!(field_text(Some(json!(false))), None);
        assert_eq!(field_text(Some(Value::Null)), None);
        assert_eq!(field_text(None), None);
    }

    #[test]
    fn test_split_plain_base64() {
        assert_eq!(split_data_url("iVBORw0KGgo="), ("image/png", "iVBORw0KGgo="));
    }

    #[test]
    fn test_split_image_data_url() {
        assert_eq!(
            split_data_url("data:image/jpeg;base64,/9j/4AAQ"),
            ("image/jpeg", "/9j/4AAQ")
        );
    }

    #[test]
    fn test_split_other_data_url_strips_prefix() {
        assert_eq!(
            split_data_url("data:application/octet-stream;base64,AAEC"),
            ("image/png", "AAEC")
        );
        assert_eq!(split_data_url("data:nocomma"), ("image/png", "data:nocomma"));
    }
}
