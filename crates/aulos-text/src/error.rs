#![forbid(unsafe_code)]

use thiserror::Error;

pub type TextResult<T> = Result<T, TextError>;

/// Errors produced by the text pipeline. All are critical: a malformed text
/// segment never gets better on retry.
#[derive(Debug, Error, Clone)]
pub enum TextError {
    #[error("invalid WebVTT header")]
    InvalidTextHeader,

    #[error("invalid WebVTT cue: {0}")]
    InvalidTextCue(String),

    #[error("invalid MP4 VTT track: {0}")]
    InvalidMp4Vtt(String),

    #[error("invalid MP4 TTML track: {0}")]
    InvalidMp4Ttml(String),

    #[error("no text parser registered for mime type: {0}")]
    UnsupportedMime(String),

    #[error("text parser used before init segment")]
    ParserNotInitialized,
}
