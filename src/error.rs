//! Error kinds for the feed client, the geo store and the aggregator.

use std::time::Duration;

use thiserror::Error;

/// A field the extractor needed was missing or had the wrong shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected feed document: expected {expected} at '{field}' in: {context}")]
pub struct ExtractionError {
    pub field: String,
    pub expected: &'static str,
    pub context: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("feed body could not be parsed: {0}")]
    Format(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("feed reported an error: {message}")]
    Upstream { message: String, should_retry: bool },

    #[error("feed task did not complete: {0}")]
    Task(String),
}

impl FeedError {
    /// Network-level failures: connection errors, non-2xx responses and timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Status { .. } | Self::Timeout { .. }
        )
    }

    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
            || matches!(
                self,
                Self::Upstream {
                    should_retry: true,
                    ..
                }
            )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(ToString::to_string).unwrap_or_default();
        match err.status() {
            Some(status) => Self::Status {
                url,
                status: status.as_u16(),
            },
            None => Self::Transport {
                url,
                message: err.to_string(),
            },
        }
    }
}

impl From<quick_xml::Error> for FeedError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Format(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("geo index on stops has not been created")]
    IndexMissing,

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kinds() {
        let status = FeedError::Status {
            url: "http://feed".to_string(),
            status: 503,
        };
        assert!(status.is_transport());
        assert!(status.is_retryable());

        let format = FeedError::Format("eof".to_string());
        assert!(!format.is_transport());
        assert!(!format.is_retryable());
    }

    #[test]
    fn test_upstream_retry_flag() {
        let retry = FeedError::Upstream {
            message: "busy".to_string(),
            should_retry: true,
        };
        let fatal = FeedError::Upstream {
            message: "bad agency".to_string(),
            should_retry: false,
        };
        assert!(retry.is_retryable());
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_extraction_message_names_field() {
        let err = ExtractionError {
            field: "stopTitle".to_string(),
            expected: "string",
            context: "{}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected feed document: expected string at 'stopTitle' in: {}"
        );
    }

    #[test]
    fn test_crate_error_keeps_kind() {
        let err: Error = StoreError::IndexMissing.into();
        assert!(matches!(err, Error::Store(StoreError::IndexMissing)));
    }
}
