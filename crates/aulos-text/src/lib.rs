#![forbid(unsafe_code)]

//! Timed-text support for the aulos streaming core.
//!
//! Segment bytes come in, typed [`Cue`] records come out. Parsers are
//! looked up by mime type in a process-wide registry, so a player can bolt
//! on formats the core does not ship. [`TextEngine`] holds the parsed cues
//! in a time-sorted store and answers the buffer-range queries the
//! streaming engine needs.

pub mod cue;
pub mod engine;
pub mod error;
pub mod mp4ttml;
pub mod mp4vtt;
pub mod registry;
pub mod vtt;

#[cfg(test)]
pub(crate) mod test_boxes;

pub use cue::{Cue, CueSettings, Line, LineAlign, PositionAlign, TextAlign, VttPosition, WritingDirection};
pub use engine::{CueTrack, TextEngine};
pub use error::{TextError, TextResult};
pub use registry::{
    create_parser, is_type_supported, register_default_parsers, register_parser,
    register_stateless_parser, StatelessParserFn, TextParser, TimeContext,
};
pub use vtt::VttParser;
pub use mp4ttml::Mp4TtmlParser;
pub use mp4vtt::Mp4VttParser;
