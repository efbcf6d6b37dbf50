//! Error taxonomy for the acquisition pipeline.

use thiserror::Error;

/// Errors surfaced by any stage of the episode acquisition pipeline.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network request failed after retries: {0}")]
    TransientNetwork(#[source] reqwest::Error),

    #[error("upstream returned a non-retryable HTTP status {status}: {url}")]
    PermanentHttp { status: u16, url: String },

    #[error("upstream returned retryable HTTP status {status}: {url}")]
    RetryableHttp { status: u16, url: String },

    #[error("no usable stream candidate: {0}")]
    NoStream(String),

    #[error("packer script evaluation failed: {0}")]
    ScriptEval(String),

    #[error("malformed media playlist: {0}")]
    MalformedPlaylist(String),

    #[error("encryption key invalid: expected 16 bytes, got {0}")]
    BadKey(usize),

    #[error("segment {url} failed: {source}")]
    SegmentFailed { url: String, source: Box<DownloadError> },

    #[error("{failed} of {total} segments failed")]
    PartialFailure { failed: usize, total: usize, failures: Vec<DownloadError> },

    #[error("muxer exited with status {status:?}")]
    MuxFailed { status: Option<i32> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::TransientNetwork(err)
    }
}

impl DownloadError {
    /// Whether this error class is worth retrying at the fetcher level.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::TransientNetwork(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_none_or(|s| {
                    s.as_u16() == 408 || s.as_u16() == 429 || s.is_server_error()
                })
            }
            DownloadError::RetryableHttp { .. } => true,
            _ => false,
        }
    }

    /// Whether this error should end the whole episode, vs. just one segment.
    pub fn is_fatal_for_episode(&self) -> bool {
        !matches!(self, DownloadError::SegmentFailed { .. })
    }

    pub fn permanent_http(status: reqwest::StatusCode, url: impl Into<String>) -> Self {
        DownloadError::PermanentHttp { status: status.as_u16(), url: url.into() }
    }
}
