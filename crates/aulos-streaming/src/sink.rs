#![forbid(unsafe_code)]

//! External seams: the media sink, the playhead, and the wall clock.

use std::collections::HashMap;

use async_trait::async_trait;
use aulos_media::ContentType;
use bytes::Bytes;
use thiserror::Error;

/// Media sink failures the engine reacts to.
///
/// Quota is special: it triggers tail eviction and a retry instead of
/// stopping the content type outright.
#[derive(Debug, Error, Clone)]
pub enum SinkError {
    #[error("quota exceeded on {0}")]
    QuotaExceeded(ContentType),
    #[error("sink operation failed: {0}")]
    OperationFailed(String),
}

/// The audio/video byte sink (the media-source engine, in browser terms).
///
/// Opaque to the engine: it accepts init and media buffers per content
/// type and reports buffered ranges in presentation time. Text bytes never
/// reach it; those go to the orchestrator-owned
/// [`TextEngine`](aulos_text::TextEngine).
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Open the sink with the chosen mime type per content type.
    async fn init(&self, mime_types: HashMap<ContentType, String>) -> Result<(), SinkError>;

    async fn set_duration(&self, duration: f64) -> Result<(), SinkError>;

    fn duration(&self) -> f64;

    /// Append a buffer. Init segments carry no times.
    async fn append_buffer(
        &self,
        content_type: ContentType,
        data: Bytes,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> Result<(), SinkError>;

    /// Remove `[start, end)` from the buffer for `content_type`.
    async fn remove(&self, content_type: ContentType, start: f64, end: f64)
        -> Result<(), SinkError>;

    /// Drop everything buffered for `content_type`.
    async fn clear(&self, content_type: ContentType) -> Result<(), SinkError>;

    /// Signal that no further buffers will be appended.
    async fn end_of_stream(&self) -> Result<(), SinkError>;

    fn buffer_start(&self, content_type: ContentType) -> Option<f64>;

    fn buffer_end(&self, content_type: ContentType) -> Option<f64>;

    fn is_buffered(&self, content_type: ContentType, time: f64) -> bool;
}

/// The external clock that says where playback currently is.
pub trait Playhead: Send + Sync {
    /// Current playback position in presentation time, seconds.
    fn time(&self) -> f64;
}

/// Wall-clock seam for live availability arithmetic.
///
/// `now()` is the presentation time at the live edge. Separated from the
/// playhead so tests (and clock-drift correction) can steer it.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// [`Clock`] over the tokio clock, so paused-time tests advance it with
/// virtual time.
#[derive(Clone, Debug)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    offset: f64,
}

impl TokioClock {
    /// A clock reading `now` at the moment of construction.
    #[must_use]
    pub fn starting_at(now: f64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            offset: now,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> f64 {
        self.offset + self.origin.elapsed().as_secs_f64()
    }
}
