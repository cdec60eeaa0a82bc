//! Error taxonomy for the verification pipeline

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        source_name: String,
        reason: String,
        transient: bool,
    },

    #[error("Probe timed out")]
    ProbeTimeout,

    #[error("Probe connection failed: {0}")]
    ProbeConnectionFailed(String),

    #[error("Geolocation unavailable: {0}")]
    GeoLookupUnavailable(String),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether a single retry could plausibly succeed.
    ///
    /// Only connection resets and timeouts qualify; HTTP status failures and
    /// malformed payloads are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::SourceUnavailable { transient, .. } => *transient,
            PipelineError::ProbeTimeout => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || is_reset(e),
            PipelineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Whether the connection was reset or aborted by the peer
pub(crate) fn is_reset(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
        source = inner.source();
    }
    false
}
