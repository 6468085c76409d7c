//! Error types shared across the ingestion pipeline.
//!
//! Extraction failures are split into two classes through [`Classify`]:
//! transient ones are worth another attempt, terminal ones are not.

use reqwest::StatusCode;
use thiserror::Error;

use crate::retry::RetryError;

/// Whether an error should stop the retry loop immediately.
pub trait Classify {
    fn is_terminal(&self) -> bool;
}

/// Failures raised by a page driver or a source adapter.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Http { status: StatusCode, url: String },

    #[error("invalid descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("invalid target {0}")]
    InvalidTarget(String),

    #[error("no page loaded")]
    NoPage,

    #[error("unsupported action: {0}")]
    Unsupported(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("unexpected payload: {0}")]
    Payload(String),

    #[cfg(feature = "browser")]
    #[error("browser error: {0}")]
    Browser(String),
}

impl Classify for ScrapeError {
    fn is_terminal(&self) -> bool {
        match self {
            ScrapeError::Timeout { .. } | ScrapeError::Network(_) | ScrapeError::Payload(_) => {
                false
            }
            #[cfg(feature = "browser")]
            ScrapeError::Browser(_) => false,
            ScrapeError::Http { status, .. } => {
                !(status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS)
            }
            ScrapeError::InvalidDescriptor { .. }
            | ScrapeError::InvalidTarget(_)
            | ScrapeError::NoPage
            | ScrapeError::Unsupported(_)
            | ScrapeError::Authentication(_) => true,
        }
    }
}

impl From<url::ParseError> for ScrapeError {
    fn from(e: url::ParseError) -> Self {
        ScrapeError::InvalidTarget(e.to_string())
    }
}

#[cfg(feature = "browser")]
impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

/// Failures raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Failures raised while submitting a video for analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analysis service answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response carried no analysis request id")]
    MissingJobId,
}

/// Failures raised while loading the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// The only failure that aborts a whole source run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed for {source_name}: {cause}")]
    Authentication {
        source_name: String,
        cause: RetryError<ScrapeError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        let timeout = ScrapeError::Timeout {
            what: "h1".to_string(),
            timeout_ms: 10,
        };
        assert!(!timeout.is_terminal());
        assert!(!ScrapeError::Payload("truncated".to_string()).is_terminal());

        let unavailable = ScrapeError::Http {
            status: StatusCode::SERVICE_UNAVAILABLE,
            url: "https://example.com".to_string(),
        };
        assert!(!unavailable.is_terminal());

        let throttled = ScrapeError::Http {
            status: StatusCode::TOO_MANY_REQUESTS,
            url: "https://example.com".to_string(),
        };
        assert!(!throttled.is_terminal());
    }

    #[test]
    fn test_terminal_classes() {
        let not_found = ScrapeError::Http {
            status: StatusCode::NOT_FOUND,
            url: "https://example.com/missing".to_string(),
        };
        assert!(not_found.is_terminal());
        assert!(
            ScrapeError::InvalidDescriptor {
                descriptor: "[[".to_string(),
                reason: "bad".to_string()
            }
            .is_terminal()
        );
        assert!(ScrapeError::InvalidTarget("nope".to_string()).is_terminal());
        assert!(ScrapeError::Authentication("bad password".to_string()).is_terminal());
    }

    #[cfg(feature = "browser")]
    #[test]
    fn test_browser_errors_are_transient() {
        assert!(!ScrapeError::Browser("target closed".to_string()).is_terminal());
    }

    #[test]
    fn test_url_parse_error_is_invalid_target() {
        let err: ScrapeError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, ScrapeError::InvalidTarget(_)));
    }
}
