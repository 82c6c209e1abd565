use thiserror::Error;

/// The error taxonomy threaded through every fallible core operation.
///
/// `Cancelled` is produced by a cooperative pause/stop and is never treated
/// as a download failure by [`crate::item::DownloadItem`] — callers that
/// match on this enum should special-case it rather than surfacing it to a
/// user as an error.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("cancelled")]
    Cancelled,
    #[error("helper process not installed: {0}")]
    HelperMissing(String),
    #[error("helper process failed: {0}")]
    HelperFailed(String),
    #[error("corrupt: {0}")]
    Corrupt(String),
}

impl DownloadError {
    /// True for the one error kind that a [`crate::item::DownloadItem`] must
    /// never surface as a failure (produced by its own pause/stop).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

/// Classifies a `reqwest::Error` into the tagged taxonomy the rest of the
/// crate matches on, per the `Dns`/`Connect`/`Timeout`/`Network` split —
/// `reqwest` itself only exposes these as predicates on the opaque error,
/// not as a variant, so this is the one place that inspects them.
impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownloadError::Timeout(e.to_string())
        } else if e.is_connect() {
            // reqwest folds DNS failures into the connect error; a source
            // chain mentioning resolution is the only signal available.
            let msg = e.to_string();
            if e.source().map(|s| s.to_string().contains("dns") || s.to_string().contains("resolve")).unwrap_or(false) {
                DownloadError::Dns(msg)
            } else {
                DownloadError::Connect(msg)
            }
        } else {
            DownloadError::Network(e.to_string())
        }
    }
}
