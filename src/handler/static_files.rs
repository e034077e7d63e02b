//! Static file serving module
//!
//! Serves the bundled web page and its assets from the configured directory.

use crate::config::HttpConfig;
use crate::handler::router::RequestContext;
use crate::http::{self, cache, mime};
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Serve `ctx.path` from the static directory
pub async fn serve(ctx: &RequestContext<'_>, config: &HttpConfig) -> Response<Full<Bytes>> {
    match load_from_directory(&config.static_dir, ctx.path, &config.index_file).await {
        Some((content, content_type)) => build_static_file_response(
            Bytes::from(content),
            content_type,
            ctx.if_none_match.as_deref(),
            ctx.is_head,
        ),
        None => http::build_404_response(),
    }
}

/// Load static file from directory with index file support
pub async fn load_from_directory(
    static_dir: &str,
    path: &str,
    index_file: &str,
) -> Option<(Vec<u8>, &'static str)> {
    let relative_path = path.trim_start_matches('/');

    // Security: ensure file_path is within static_dir
    let static_dir_canonical = match Path::new(static_dir).canonicalize() {
        Ok(p) => p,
        Err(e) => {
            logger::log_warning(&format!(
                "Static directory not found or inaccessible '{static_dir}': {e}"
            ));
            return None;
        }
    };

    let mut file_path: PathBuf = static_dir_canonical.join(relative_path);
    if relative_path.is_empty() || relative_path.ends_with('/') || file_path.is_dir() {
        file_path = file_path.join(index_file);
    }

    // File not found is common (404), no need to log at warning level
    let Ok(file_path_canonical) = file_path.canonicalize() else {
        return None;
    };
    if !file_path_canonical.starts_with(&static_dir_canonical) {
        logger::log_warning(&format!(
            "Path traversal attempt blocked: {} -> {}",
            path,
            file_path_canonical.display()
        ));
        return None;
    }

    let content = match fs::read(&file_path_canonical).await {
        Ok(c) => c,
        Err(e) => {
            logger::log_error(&format!(
                "Failed to read file '{}': {}",
                file_path_canonical.display(),
                e
            ));
            return None;
        }
    };

    let content_type =
        mime::get_content_type(file_path_canonical.extension().and_then(|e| e.to_str()));
    Some((content, content_type))
}

/// Build static file response with `ETag` revalidation
fn build_static_file_response(
    data: Bytes,
    content_type: &str,
    if_none_match: Option<&str>,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let etag = cache::generate_etag(&data);

    if cache::check_etag_match(if_none_match, &etag) {
        return http::build_304_response(&etag);
    }

    http::build_file_response(data, content_type, &etag, is_head)
}
