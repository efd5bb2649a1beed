#![forbid(unsafe_code)]

//! Shared media model for the aulos streaming core.
//!
//! Everything here is passive data plus lookup logic: the presentation
//! timeline (including the live availability window), the period/variant/
//! stream hierarchy handed over by a manifest parser, segment references
//! with their lazy indexes, and a small MP4 box walker used for embedded
//! `emsg` events and text samples.

pub mod emsg;
pub mod error;
pub mod manifest;
pub mod mp4;
pub mod segment;
pub mod timeline;

pub use emsg::{parse_emsg_boxes, EmsgBox, MANIFEST_UPDATE_SCHEME};
pub use error::{MediaError, MediaResult};
pub use manifest::{ContentType, Manifest, Period, Stream, Variant};
pub use segment::{InitSegmentReference, ListSegmentIndex, SegmentIndex, SegmentReference};
pub use timeline::PresentationTimeline;
