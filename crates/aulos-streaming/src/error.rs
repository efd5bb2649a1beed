#![forbid(unsafe_code)]

use aulos_media::{ContentType, MediaError};
use aulos_net::NetError;
use aulos_text::TextError;
use thiserror::Error;

use crate::sink::SinkError;

pub type StreamingResult<T> = Result<T, StreamingError>;

/// Errors surfaced by the streaming engine.
#[derive(Debug, Error, Clone)]
pub enum StreamingError {
    #[error("network error on {content_type}: {source}")]
    Network {
        content_type: ContentType,
        source: NetError,
    },

    #[error("media sink operation failed: {0}")]
    MediaSourceOperationFailed(String),

    #[error("media sink quota exceeded on {0}")]
    QuotaExceeded(ContentType),

    #[error("text error: {0}")]
    Text(#[from] TextError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("engine destroyed")]
    Destroyed,
}

impl StreamingError {
    /// Recoverable errors leave the engine free to keep scheduling; the
    /// rest stop the affected content type until a seek or switch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { source, .. } => match source {
                NetError::RetryExhausted { source, .. } => source.is_recoverable(),
                other => other.is_recoverable(),
            },
            _ => false,
        }
    }
}

impl From<SinkError> for StreamingError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::QuotaExceeded(content_type) => Self::QuotaExceeded(content_type),
            SinkError::OperationFailed(message) => Self::MediaSourceOperationFailed(message),
        }
    }
}
