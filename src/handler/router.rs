//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: method and body-size checks,
//! route dispatch, common response headers and access logging.

use crate::config::AppState;
use crate::handler::{recognize, static_files};
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::recognition::RecognitionKind;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::USER_AGENT;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Liveness check path
pub const HEALTH_PATH: &str = "/healthz";

/// Request context for static file serving
pub struct RequestContext<'a> {
    pub path: &'a str,
    pub is_head: bool,
    pub if_none_match: Option<String>,
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let access_log = state.cached_access_log.load(Ordering::Relaxed);
    let mut entry = access_log.then(|| access_entry(&req, peer_addr));

    logger::log_headers_count(req.headers().len(), state.config.logging.show_headers);

    let response = route_request(req, &state).await;
    let response = http::finalize_response(
        response,
        &state.config.http.server_name,
        state.config.http.enable_cors,
    );

    if let Some(entry) = entry.as_mut() {
        entry.status = response.status().as_u16();
        entry.body_bytes = usize::try_from(response.body().size_hint().lower()).unwrap_or(0);
        entry.result_type = response
            .extensions()
            .get::<RecognitionKind>()
            .map(|kind| kind.as_str().to_string());
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

fn access_entry<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = format!("{:?}", req.version())
        .trim_start_matches("HTTP/")
        .to_string();
    entry.user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    entry
}

/// Dispatch on method and path
async fn route_request<B>(req: Request<B>, state: &Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if let Some(resp) = check_body_size(&req, state.config.http.max_body_size) {
        return resp;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => http::build_options_response(state.config.http.enable_cors),
        (&Method::POST, "/api/recognize/url") => {
            recognize::handle_url(req, Arc::clone(state)).await
        }
        (&Method::POST, "/api/recognize/base64") => {
            recognize::handle_base64(req, Arc::clone(state)).await
        }
        (&Method::POST, "/recognize") => recognize::handle_file_id(req, Arc::clone(state)).await,
        (&Method::POST, "/proxy/upload") => {
            recognize::handle_proxy_upload(req, Arc::clone(state)).await
        }
        (&Method::POST, _) => http::build_api_404_response(),
        (&Method::GET | &Method::HEAD, HEALTH_PATH) => http::build_health_response(),
        (&Method::GET | &Method::HEAD, _) => {
            let ctx = RequestContext {
                path: &path,
                is_head: method == Method::HEAD,
                if_none_match: req
                    .headers()
                    .get("if-none-match")
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string),
            };
            static_files::serve(&ctx, &state.config.http).await
        }
        _ => {
            logger::log_warning(&format!("Method not allowed: {method}"));
            http::build_405_response()
        }
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size<B>(req: &Request<B>, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = req.headers().get("content-length")?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}
