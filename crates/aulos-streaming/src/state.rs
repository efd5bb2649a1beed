#![forbid(unsafe_code)]

//! Per-content-type bookkeeping.

use std::sync::Arc;

use aulos_media::{SegmentReference, Stream};

/// The mutable state behind one content type's scheduling loop.
///
/// At most one fetch+append is in flight per state; the loop task is the
/// only writer while an update runs, and the orchestrator communicates
/// through the deferred flags (`waiting_to_clear_buffer`) plus a wakeup.
#[derive(Debug)]
pub(crate) struct MediaState {
    /// The active stream, or `None` while the current period has nothing
    /// for this type (text-less periods idle the text loop).
    pub stream: Option<Arc<Stream>>,
    /// Which period `stream` belongs to.
    pub period_index: usize,
    /// The next fetch must deliver the init segment first.
    pub need_init_segment: bool,
    /// Stream id of the last appended segment's stream; a mismatch forces
    /// a fresh init segment even without an explicit switch.
    pub last_stream_id: Option<String>,
    /// Last media segment appended, if any since the last clear.
    pub last_segment_reference: Option<SegmentReference>,
    /// This type has exhausted the final period.
    pub end_of_stream: bool,
    /// A fetch+append is currently awaited.
    pub performing_update: bool,
    /// A clear was requested while an update was in flight; the loop
    /// applies it at the top of its next tick.
    pub waiting_to_clear_buffer: bool,
    /// A clear is currently awaited.
    pub clearing_buffer: bool,
    /// A quota-exceeded recovery round is in progress.
    pub recovering: bool,
    /// The type hit a critical error and stopped; a seek revives it.
    pub has_error: bool,
    /// The type was turned off for good (failed text with
    /// `ignore_text_stream_failures`). Never revived; does not block
    /// end-of-stream.
    pub disabled: bool,
    /// Fetch no earlier than this presentation time (set on period entry).
    pub resume_at: Option<f64>,
    /// The normal video stream while trick play is engaged.
    pub trick_play_restore: Option<Arc<Stream>>,
}

impl MediaState {
    pub(crate) fn new(stream: Option<Arc<Stream>>, period_index: usize) -> Self {
        Self {
            stream,
            period_index,
            need_init_segment: true,
            last_stream_id: None,
            last_segment_reference: None,
            end_of_stream: false,
            performing_update: false,
            waiting_to_clear_buffer: false,
            clearing_buffer: false,
            recovering: false,
            has_error: false,
            disabled: false,
            resume_at: None,
            trick_play_restore: None,
        }
    }

    /// Forget fetch progress so the next tick starts from scratch (after a
    /// clear or period change).
    pub(crate) fn reset_fetch_progress(&mut self) {
        self.need_init_segment = true;
        self.last_segment_reference = None;
        self.end_of_stream = false;
        self.recovering = false;
    }
}
