#![forbid(unsafe_code)]

//! The callback surface between the engine and its owner.

use std::sync::Arc;

use aulos_media::{EmsgBox, Period, Stream};
use bytes::Bytes;

use crate::error::StreamingError;

/// The player's answer to "which streams should play in this period".
#[derive(Clone, Debug, Default)]
pub struct ChosenStreams {
    pub audio: Option<Arc<Stream>>,
    pub video: Option<Arc<Stream>>,
    pub text: Option<Arc<Stream>>,
}

/// An application event carried by an `emsg` box, with times resolved onto
/// the presentation timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    pub scheme_id_uri: String,
    pub value: String,
    pub timescale: u32,
    pub presentation_time_delta: u32,
    pub event_duration: u32,
    pub id: u32,
    pub message_data: Bytes,
    pub start_time: f64,
    pub end_time: f64,
}

impl StreamEvent {
    pub(crate) fn from_emsg(emsg: &EmsgBox, segment_start: f64) -> Self {
        Self {
            scheme_id_uri: emsg.scheme_id_uri.clone(),
            value: emsg.value.clone(),
            timescale: emsg.timescale,
            presentation_time_delta: emsg.presentation_time_delta,
            event_duration: emsg.event_duration,
            id: emsg.id,
            message_data: emsg.message_data.clone(),
            start_time: emsg.start_time(segment_start),
            end_time: emsg.end_time(segment_start),
        }
    }
}

/// One method per engine callback. The engine never holds a reference to
/// its owner; this trait is the whole surface through which it reports
/// back and asks for decisions.
pub trait EngineHandlers: Send + Sync {
    /// Pick the streams for a period that is becoming active. Called once
    /// per period entry (and again if the playhead moved periods during
    /// startup).
    fn on_choose_streams(&self, period_index: usize, period: &Period) -> ChosenStreams;

    /// All streams in the period are indexed; switching within it is safe.
    fn on_can_switch(&self, period_index: usize) {
        let _ = period_index;
    }

    /// Initial media states exist; nothing has been fetched yet.
    fn on_initial_streams_setup(&self) {}

    /// Every active content type has appended at least one media segment.
    fn on_startup_complete(&self) {}

    fn on_error(&self, error: &StreamingError) {
        let _ = error;
    }

    /// An `emsg` event with an application scheme.
    fn on_event(&self, event: StreamEvent) {
        let _ = event;
    }

    /// An `emsg` with the DASH manifest-update scheme arrived.
    fn on_manifest_update(&self) {}

    /// A media segment landed in a sink.
    fn on_segment_appended(&self) {}
}
