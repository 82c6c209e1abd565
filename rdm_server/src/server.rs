//! Local Control Endpoint (component C10) — the loopback HTTP surface the
//! out-of-scope browser extension talks to.
//!
//! Built on an axum `router`/`AppState` shape (shared state via `State`,
//! CORS via `tower-http`), narrowed to exactly the GET/HEAD contract the
//! extension relies on instead of the richer XDM-style route set an earlier
//! generation of this server carried.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use rdm_core::enqueue::EnqueueRequest;
use rdm_core::Core;

/// Fixed whitelist of file extensions the endpoint will act on, per the
/// design — anything else must match a configured video-site host instead.
const EXTENSION_WHITELIST: &[&str] = &[
    "pdf", "mp4", "mp3", "avi", "mkv", "wav", "jpg", "jpeg", "png", "bmp", "gif", "webp", "zip",
    "rar", "7z", "tar", "gz", "exe", "msi", "apk", "iso", "bin", "doc", "docx", "xls", "xlsx",
    "ppt", "pptx", "txt", "csv", "json", "xml", "html",
];

/// Caller-supplied confirmation before a GET is turned into a download.
/// There is no GUI in this crate (out of scope per the core's design), so
/// the default always accepts.
#[async_trait]
pub trait ConfirmationHook: Send + Sync {
    async fn confirm(&self, url: &str) -> bool;
}

pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmationHook for AlwaysConfirm {
    async fn confirm(&self, _url: &str) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct AppState {
    core: Arc<Core>,
    confirmation: Arc<dyn ConfirmationHook>,
}

impl AppState {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            confirmation: Arc::new(AlwaysConfirm),
        }
    }

    pub fn with_confirmation(mut self, hook: Arc<dyn ConfirmationHook>) -> Self {
        self.confirmation = hook;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(any(handle))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::BAD_REQUEST, "unsupported method").into_response();
    }

    let url = match resolve_url(&uri, &headers) {
        Some(url) => url,
        None => return (StatusCode::BAD_REQUEST, "could not resolve target url").into_response(),
    };

    let is_video = is_video_host(&url, &state.core.config.video_site_hosts);
    if !is_video && !has_whitelisted_extension(&url) {
        return (StatusCode::BAD_REQUEST, "extension not in whitelist").into_response();
    }

    if method == Method::HEAD {
        return (StatusCode::OK, "HEAD request acknowledged").into_response();
    }

    if !state.confirmation.confirm(&url).await {
        return (StatusCode::OK, "Download cancelled").into_response();
    }

    let request = EnqueueRequest {
        url: url.clone(),
        dest_dir: None,
        category: None,
        filename: None,
        video_mode: is_video,
    };

    match state.core.enqueue.enqueue(request).await {
        Ok(Some(_id)) => (StatusCode::OK, "Download started").into_response(),
        Ok(None) => (StatusCode::OK, "Download cancelled").into_response(),
        Err(rdm_core::error::DownloadError::InvalidUrl(_)) => {
            (StatusCode::BAD_REQUEST, "invalid url").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Builds the absolute URL the caller wants downloaded, either from
/// `?url=<percent-encoded>` or from the `Host` header plus the request path.
fn resolve_url(uri: &OriginalUri, headers: &HeaderMap) -> Option<String> {
    let uri = &uri.0;
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            if let Some(encoded) = pair.strip_prefix("url=") {
                return Some(percent_decode(encoded));
            }
        }
    }

    let host = headers.get("host")?.to_str().ok()?;
    let path = uri.path();
    if path.is_empty() || path == "/" {
        return None;
    }
    Some(format!("http://{}{}", host, path))
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte as char);
                    i += 3;
                    continue;
                }
                out.push('%');
                i += 1;
            }
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

fn has_whitelisted_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next() {
        Some(ext) if ext != path => EXTENSION_WHITELIST.iter().any(|w| w.eq_ignore_ascii_case(ext)),
        _ => true, // no extension at all — the design's "empty" whitelist entry
    }
}

fn is_video_host(url: &str, video_site_hosts: &[String]) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|host| video_site_hosts.iter().any(|site| host == *site || host.ends_with(&format!(".{}", site))))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_whitelisted_extension() {
        assert!(has_whitelisted_extension("http://example.com/movie.mp4"));
        assert!(has_whitelisted_extension("http://example.com/a.zip?x=1"));
    }

    #[test]
    fn rejects_unlisted_extension() {
        assert!(!has_whitelisted_extension("http://example.com/a.exe1"));
    }

    #[test]
    fn empty_extension_is_accepted() {
        assert!(has_whitelisted_extension("http://example.com/download"));
    }

    #[test]
    fn detects_video_host_by_exact_or_suffix_match() {
        let hosts = vec!["youtube.com".to_string()];
        assert!(is_video_host("https://youtube.com/watch?v=1", &hosts));
        assert!(is_video_host("https://www.youtube.com/watch?v=1", &hosts));
        assert!(!is_video_host("https://example.com/a.mp4", &hosts));
    }

    #[test]
    fn decodes_percent_encoded_query_url() {
        assert_eq!(percent_decode("http%3A%2F%2Fx.com%2Fa.zip"), "http://x.com/a.zip");
    }
}
