#![forbid(unsafe_code)]

use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors produced by the media model.
#[derive(Debug, Error, Clone)]
pub enum MediaError {
    #[error("failed to build segment index: {0}")]
    IndexCreation(String),

    #[error("malformed MP4 box structure: {0}")]
    Mp4Parse(String),
}
