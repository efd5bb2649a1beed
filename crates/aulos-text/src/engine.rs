#![forbid(unsafe_code)]

//! The cue store behind the text content type.
//!
//! `TextEngine` plays the role the media sink plays for audio/video: bytes
//! are appended, buffer ranges can be queried, ranges can be removed. Cues
//! are kept sorted by start time; the expected cardinality is thousands,
//! so a sorted vector with binary-search insertion is the entire store.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    cue::Cue,
    error::{TextError, TextResult},
    registry::{self, TextParser, TimeContext},
};

/// External cue display seam. The engine mirrors every insert/remove into
/// the track so a renderer sees the same cue list the store holds.
pub trait CueTrack: Send + Sync {
    fn add_cue(&self, cue: &Cue);
    fn remove_cue(&self, cue: &Cue);
}

struct Inner {
    parser: Option<Box<dyn TextParser>>,
    mime_type: Option<String>,
    cues: Vec<Cue>,
    timestamp_offset: f64,
    append_window_end: f64,
    track: Option<Arc<dyn CueTrack>>,
}

/// In-memory cue store driven by pluggable parsers.
///
/// All operations are safe to race with `destroy()`: an in-flight call
/// completes normally, and every call after destruction is a no-op.
pub struct TextEngine {
    inner: Mutex<Option<Inner>>,
}

impl TextEngine {
    #[must_use]
    pub fn new(track: Option<Arc<dyn CueTrack>>) -> Self {
        Self {
            inner: Mutex::new(Some(Inner {
                parser: None,
                mime_type: None,
                cues: Vec::new(),
                timestamp_offset: 0.0,
                append_window_end: f64::INFINITY,
                track,
            })),
        }
    }

    /// Whether any parser is registered for `mime`.
    #[must_use]
    pub fn is_type_supported(mime: &str) -> bool {
        registry::is_type_supported(mime)
    }

    /// Instantiate the registered parser for `mime`, replacing any current
    /// parser and its accumulated init state.
    pub fn init_parser(&self, mime: &str) -> TextResult<()> {
        let mut guard = self.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return Ok(());
        };
        let parser = registry::create_parser(mime)
            .ok_or_else(|| TextError::UnsupportedMime(mime.to_string()))?;
        inner.parser = Some(parser);
        inner.mime_type = Some(mime.to_string());
        Ok(())
    }

    /// The mime type the current parser was created for.
    #[must_use]
    pub fn mime_type(&self) -> Option<String> {
        self.inner.lock().as_ref().and_then(|i| i.mime_type.clone())
    }

    /// Parse a segment and fold the resulting cues into the store.
    ///
    /// With `segment_start`/`segment_end` unset the data is treated as an
    /// init segment and only feeds the parser.
    pub async fn append_buffer(
        &self,
        data: &[u8],
        segment_start: Option<f64>,
        segment_end: Option<f64>,
    ) -> TextResult<()> {
        let mut guard = self.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return Ok(());
        };
        let parser = inner
            .parser
            .as_mut()
            .ok_or(TextError::ParserNotInitialized)?;

        let (Some(start), Some(end)) = (segment_start, segment_end) else {
            return parser.parse_init(data);
        };

        let time = TimeContext {
            period_start: inner.timestamp_offset,
            segment_start: Some(start),
            segment_end: Some(end),
        };
        let cues = parser.parse_media(data, &time)?;

        let append_window_end = inner.append_window_end;
        for cue in cues {
            if cue.start_time >= append_window_end {
                debug!(
                    start_time = cue.start_time,
                    append_window_end, "aulos-text: dropping cue past append window"
                );
                continue;
            }
            let at = inner
                .cues
                .partition_point(|c| c.start_time <= cue.start_time);
            if let Some(track) = &inner.track {
                track.add_cue(&cue);
            }
            inner.cues.insert(at, cue);
        }
        Ok(())
    }

    /// Remove every cue whose interval overlaps `[start, end)`.
    pub async fn remove(&self, start: f64, end: f64) -> TextResult<()> {
        let mut guard = self.inner.lock();
        let Some(inner) = guard.as_mut() else {
            return Ok(());
        };
        let track = inner.track.clone();
        inner.cues.retain(|cue| {
            let keep = cue.end_time <= start || cue.start_time >= end;
            if !keep {
                if let Some(track) = &track {
                    track.remove_cue(cue);
                }
            }
            keep
        });
        Ok(())
    }

    /// Period start added to all subsequently parsed cue times.
    pub fn set_timestamp_offset(&self, period_start: f64) {
        if let Some(inner) = self.inner.lock().as_mut() {
            inner.timestamp_offset = period_start;
        }
    }

    /// Cues starting at or past this time are dropped on append, and
    /// `buffer_end()` is clamped to it.
    pub fn set_append_window_end(&self, append_window_end: f64) {
        if let Some(inner) = self.inner.lock().as_mut() {
            inner.append_window_end = append_window_end;
        }
    }

    #[must_use]
    pub fn buffer_start(&self) -> Option<f64> {
        let guard = self.inner.lock();
        let inner = guard.as_ref()?;
        inner.cues.first().map(|c| c.start_time)
    }

    #[must_use]
    pub fn buffer_end(&self) -> Option<f64> {
        let guard = self.inner.lock();
        let inner = guard.as_ref()?;
        inner
            .cues
            .iter()
            .map(|c| c.end_time)
            .fold(None, |acc: Option<f64>, end| {
                Some(acc.map_or(end, |a| a.max(end)))
            })
            .map(|end| end.min(inner.append_window_end))
    }

    /// Seconds buffered past `t`, treating the stored cues as one convex
    /// span; gaps between cues are intentional in text and do not count as
    /// missing buffer.
    #[must_use]
    pub fn buffered_ahead_of(&self, t: f64) -> f64 {
        let Some(start) = self.buffer_start() else {
            return 0.0;
        };
        if t < start {
            return 0.0;
        }
        self.buffer_end().map_or(0.0, |end| (end - t).max(0.0))
    }

    /// Tear down the store. Pending operations finish first (they hold the
    /// lock); anything after this is a no-op.
    pub async fn destroy(&self) {
        self.inner.lock().take();
    }
}
