//! HTTP response building module
//!
//! Builders for the status codes the relay answers with.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, SERVER};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Methods the relay answers, reported in `Allow` and CORS preflights
pub const ALLOWED_METHODS: &str = "GET, HEAD, POST, OPTIONS";

/// Request headers browsers may send cross-origin
pub const CORS_ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, x-custom-cookie, x-advanced-mode, x-custom-prompt";

/// Build JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = match serde_json::to_vec(body) {
        Ok(j) => j,
        Err(e) => {
            log_build_error("JSON", &e);
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                r#"{"success":false,"error":"Internal Server Error"}"#,
            );
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

fn plain_response(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::from_static(body.as_bytes())))
        })
}

/// Build 304 Not Modified response
pub fn build_304_response(etag: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header("ETag", etag)
        .header("Cache-Control", "no-cache")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("304", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 404 Not Found response for static paths
pub fn build_404_response() -> Response<Full<Bytes>> {
    plain_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found")
}

/// Build 404 Not Found response for unknown API paths
pub fn build_api_404_response() -> Response<Full<Bytes>> {
    plain_response(
        StatusCode::NOT_FOUND,
        "application/json",
        r#"{"error":"Not Found","available_endpoints":["/api/recognize/url","/api/recognize/base64","/recognize","/proxy/upload"]}"#,
    )
}

/// Build 405 Method Not Allowed response
pub fn build_405_response() -> Response<Full<Bytes>> {
    let mut resp = plain_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "text/plain",
        "405 Method Not Allowed",
    );
    resp.headers_mut()
        .insert("Allow", HeaderValue::from_static(ALLOWED_METHODS));
    resp
}

/// Build 413 Payload Too Large response
pub fn build_413_response() -> Response<Full<Bytes>> {
    plain_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        "application/json",
        r#"{"error":"Payload Too Large"}"#,
    )
}

/// Build OPTIONS response (preflight request)
pub fn build_options_response(enable_cors: bool) -> Response<Full<Bytes>> {
    let mut builder = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Allow", ALLOWED_METHODS);

    if enable_cors {
        builder = builder
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", CORS_ALLOWED_HEADERS)
            .header("Access-Control-Max-Age", "86400");
    }

    builder.body(Full::new(Bytes::new())).unwrap_or_else(|e| {
        log_build_error("OPTIONS", &e);
        Response::new(Full::new(Bytes::new()))
    })
}

/// Build liveness response
pub fn build_health_response() -> Response<Full<Bytes>> {
    plain_response(StatusCode::OK, "text/plain", "ok")
}

/// Build 200 response for a static file with `ETag` revalidation
pub fn build_file_response(
    data: Bytes,
    content_type: &str,
    etag: &str,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let content_length = data.len();
    let body = if is_head { Bytes::new() } else { data };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .header("ETag", etag)
        .header("Cache-Control", "no-cache")
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("200", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Stamp headers every response carries: `Server` and, if enabled, the CORS origin
pub fn finalize_response(
    mut resp: Response<Full<Bytes>>,
    server_name: &str,
    enable_cors: bool,
) -> Response<Full<Bytes>> {
    let headers = resp.headers_mut();
    if let Ok(value) = HeaderValue::from_str(server_name) {
        headers.insert(SERVER, value);
    }
    if enable_cors {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    resp
}

/// Log response build error
fn log_build_error(status: &str, error: &impl std::fmt::Display) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
