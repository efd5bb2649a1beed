#![forbid(unsafe_code)]

//! Mime-type → parser-factory registry.
//!
//! Registration is process-wide and lifecycle-bounded: whoever registers
//! last for a mime type wins, which is how a player overrides a built-in
//! parser. Parsers come in two shapes: stateful (`parse_init` feeds later
//! `parse_media` calls) and stateless (a bare function); the registry wraps
//! stateless ones in an adapter with a no-op `parse_init`.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;

use crate::{
    cue::Cue,
    error::TextResult,
    mp4ttml::Mp4TtmlParser,
    mp4vtt::Mp4VttParser,
    vtt::VttParser,
};

/// Times handed to `parse_media`: the period's presentation start plus the
/// segment's extent within the period, when known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeContext {
    pub period_start: f64,
    pub segment_start: Option<f64>,
    pub segment_end: Option<f64>,
}

/// The two-method capability every text parser provides.
pub trait TextParser: Send {
    /// Feed an init segment. A no-op for self-contained formats.
    fn parse_init(&mut self, data: &[u8]) -> TextResult<()>;

    /// Translate one media segment into cues with presentation times.
    fn parse_media(&mut self, data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>>;
}

/// A stateless parser: everything it needs arrives with each segment.
pub type StatelessParserFn =
    fn(data: &[u8], period_start: f64, segment_start: Option<f64>, segment_end: Option<f64>) -> TextResult<Vec<Cue>>;

type ParserFactory = Arc<dyn Fn() -> Box<dyn TextParser> + Send + Sync>;

static REGISTRY: LazyLock<Mutex<HashMap<String, ParserFactory>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a factory for `mime`, superseding any prior registration.
pub fn register_parser(
    mime: &str,
    factory: impl Fn() -> Box<dyn TextParser> + Send + Sync + 'static,
) {
    REGISTRY
        .lock()
        .insert(mime.to_string(), Arc::new(factory));
}

/// Register a stateless parser function for `mime`.
pub fn register_stateless_parser(mime: &str, parser: StatelessParserFn) {
    register_parser(mime, move || Box::new(StatelessAdapter { parser }));
}

#[must_use]
pub fn is_type_supported(mime: &str) -> bool {
    REGISTRY.lock().contains_key(mime)
}

/// Instantiate the parser registered for `mime`, if any.
#[must_use]
pub fn create_parser(mime: &str) -> Option<Box<dyn TextParser>> {
    let factory = REGISTRY.lock().get(mime).cloned()?;
    Some(factory())
}

/// Register the parsers this crate ships, under the mime types manifests
/// actually use.
pub fn register_default_parsers() {
    register_parser("text/vtt", || Box::new(VttParser::new()));
    register_parser("text/webvtt", || Box::new(VttParser::new()));
    register_parser("application/mp4; codecs=\"wvtt\"", || {
        Box::new(Mp4VttParser::new())
    });
    register_parser("application/mp4; codecs=\"stpp\"", || {
        Box::new(Mp4TtmlParser::new())
    });
}

struct StatelessAdapter {
    parser: StatelessParserFn,
}

impl TextParser for StatelessAdapter {
    fn parse_init(&mut self, _data: &[u8]) -> TextResult<()> {
        Ok(())
    }

    fn parse_media(&mut self, data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>> {
        (self.parser)(data, time.period_start, time.segment_start, time.segment_end)
    }
}
