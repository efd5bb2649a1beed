#![forbid(unsafe_code)]

//! In-segment event message (`emsg`) extraction.

use bytes::Bytes;
use tracing::debug;

use crate::mp4;

/// Scheme that signals "the manifest is stale, refetch it" rather than an
/// application event.
pub const MANIFEST_UPDATE_SCHEME: &str = "urn:mpeg:dash:event:2012";

/// One decoded `emsg` box (version 0 layout).
#[derive(Clone, Debug, PartialEq)]
pub struct EmsgBox {
    pub scheme_id_uri: String,
    pub value: String,
    pub timescale: u32,
    pub presentation_time_delta: u32,
    pub event_duration: u32,
    pub id: u32,
    pub message_data: Bytes,
}

impl EmsgBox {
    #[must_use]
    pub fn is_manifest_update(&self) -> bool {
        self.scheme_id_uri == MANIFEST_UPDATE_SCHEME
    }

    /// Event start on the presentation timeline, given the segment's start.
    #[must_use]
    pub fn start_time(&self, segment_start: f64) -> f64 {
        segment_start + f64::from(self.presentation_time_delta) / f64::from(self.timescale)
    }

    #[must_use]
    pub fn end_time(&self, segment_start: f64) -> f64 {
        self.start_time(segment_start) + f64::from(self.event_duration) / f64::from(self.timescale)
    }
}

/// Scan the top level of a media segment for `emsg` boxes.
///
/// Unparseable or non-v0 boxes are skipped; a segment without any events
/// yields an empty vec.
#[must_use]
pub fn parse_emsg_boxes(data: &[u8]) -> Vec<EmsgBox> {
    mp4::boxes(data)
        .filter(|b| b.is(b"emsg"))
        .filter_map(|b| parse_one(b.payload))
        .collect()
}

fn parse_one(payload: &[u8]) -> Option<EmsgBox> {
    let full = mp4::full_box(payload)?;
    if full.version != 0 {
        debug!(version = full.version, "aulos-media: skipping non-v0 emsg box");
        return None;
    }

    let mut cursor = mp4::Cursor::new(full.payload);
    let scheme_id_uri = cursor.read_cstring()?;
    let value = cursor.read_cstring()?;
    let timescale = cursor.read_u32()?;
    if timescale == 0 {
        debug!("aulos-media: skipping emsg box with zero timescale");
        return None;
    }

    Some(EmsgBox {
        scheme_id_uri,
        value,
        timescale,
        presentation_time_delta: cursor.read_u32()?,
        event_duration: cursor.read_u32()?,
        id: cursor.read_u32()?,
        message_data: Bytes::copy_from_slice(cursor.remaining()),
    })
}
