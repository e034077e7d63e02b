//! Request body decoding
//!
//! JSON and url-encoded bodies become typed requests; multipart bodies yield
//! the uploaded `file` field.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};
use crate::upstream::ImagePayload;

/// Multipart field carrying the uploaded image
pub const FILE_FIELD: &str = "file";

/// Collect a request body, failing once it grows past `max_body_size`
pub async fn read_body<B>(body: B, max_body_size: u64) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(RelayError::PayloadTooLarge {
            max: max_body_size,
        }),
        Err(e) => Err(RelayError::Body(e.to_string())),
    }
}

/// Decode a form-style body into `T`
///
/// `application/json` and `application/x-www-form-urlencoded` are parsed;
/// any other content type decodes as an empty object, so required fields
/// surface as missing rather than as a parse error.
pub fn parse_form<T: DeserializeOwned>(content_type: Option<&str>, body: &[u8]) -> Result<T> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    let value = match mime.as_deref() {
        Some("application/x-www-form-urlencoded") => {
            let fields: Map<String, Value> = url::form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            Value::Object(fields)
        }
        Some(json) if json == "application/json" || json.ends_with("+json") => {
            if body.iter().all(u8::is_ascii_whitespace) {
                Value::Object(Map::new())
            } else {
                serde_json::from_slice(body).map_err(|e| invalid_body(&e))?
            }
        }
        _ => Value::Object(Map::new()),
    };

    serde_json::from_value(value).map_err(|e| invalid_body(&e))
}

fn invalid_body(err: &serde_json::Error) -> RelayError {
    RelayError::bad_request(format!("Invalid request body: {err}"))
}

/// Pull the `file` field out of a multipart body
///
/// Returns `Ok(None)` when the body is not multipart or has no such field.
pub async fn extract_file(content_type: Option<&str>, body: Bytes) -> Result<Option<ImagePayload>> {
    let Some(boundary) = content_type.and_then(|ct| multer::parse_boundary(ct).ok()) else {
        return Ok(None);
    };

    let mut multipart = multer::Multipart::with_reader(std::io::Cursor::new(body), boundary);
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("blob").to_string();
        let mime_type = field
            .content_type()
            .map_or_else(|| "application/octet-stream".to_string(), ToString::to_string);
        let data = field.bytes().await?;
        return Ok(Some(ImagePayload {
            data,
            file_name,
            mime_type,
        }));
    }
    Ok(None)
}
