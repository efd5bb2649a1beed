#![forbid(unsafe_code)]

use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for aulos-net.
///
/// Variants split into two families the scheduler cares about:
/// recoverable transport faults (retried per policy, then surfaced) and
/// critical request faults (surfaced immediately, never retried).
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Timeout")]
    Timeout,
    #[error("HTTP {status} for URL: {url}")]
    BadHttpStatus {
        status: u16,
        url: String,
        body: Option<String>,
    },
    #[error("Request failed after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: Box<Self> },
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed data URI: {0}")]
    MalformedDataUri(String),
    #[error("unknown data URI encoding: {0}")]
    UnknownDataUriEncoding(String),
    #[error("Cancelled")]
    Cancelled,
}

impl NetError {
    /// Checks if this error is worth another attempt.
    ///
    /// Transport faults and throttling statuses are recoverable; scheme and
    /// data-URI faults are not, and neither is an already-exhausted retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::BadHttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            Self::RetryExhausted { .. }
            | Self::UnsupportedScheme(_)
            | Self::MalformedDataUri(_)
            | Self::UnknownDataUriEncoding(_)
            | Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting {:#} includes the full error chain
        // (e.g. "error sending request … : connection refused").
        Self::Http(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::transport(NetError::Http("connection reset".to_string()), true)]
    #[case::http_500(NetError::BadHttpStatus { status: 500, url: "http://a/seg".to_string(), body: None }, true)]
    #[case::http_429(NetError::BadHttpStatus { status: 429, url: "http://a/seg".to_string(), body: None }, true)]
    #[case::http_404(NetError::BadHttpStatus { status: 404, url: "http://a/seg".to_string(), body: None }, false)]
    #[case::scheme(NetError::UnsupportedScheme("ftp".to_string()), false)]
    #[case::data_uri(NetError::MalformedDataUri("data:no-comma".to_string()), false)]
    #[case::encoding(NetError::UnknownDataUriEncoding("utf-16".to_string()), false)]
    #[case::exhausted(
        NetError::RetryExhausted { attempts: 3, source: Box::new(NetError::Timeout) },
        false
    )]
    fn recoverable_classification(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_recoverable(), expected);
    }

    #[test]
    fn retry_exhausted_display_includes_source() {
        let error = NetError::RetryExhausted {
            attempts: 3,
            source: Box::new(NetError::Timeout),
        };
        assert!(error.to_string().contains("after 3 attempts: Timeout"));
    }
}
