#![forbid(unsafe_code)]

//! WebVTT parsing.
//!
//! Handles standalone `.vtt` segments, including the HLS `X-TIMESTAMP-MAP`
//! header that maps cue-local times onto the MPEG-TS clock. Cue display
//! settings follow the WebVTT grammar; unknown settings are logged and
//! dropped rather than failing the segment.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::{
    cue::{Cue, CueSettings, Line, LineAlign, PositionAlign, TextAlign, VttPosition, WritingDirection},
    error::{TextError, TextResult},
    registry::{TextParser, TimeContext},
};

const MPEG_TIMESCALE: f64 = 90_000.0;

static BLOCK_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").expect("static regex"));
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^WEBVTT($|[ \t\n])").expect("static regex"));
static LOCAL_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"LOCAL:((?:\d+:)?\d{2}:\d{2}\.\d{3})").expect("static regex"));
static MPEGTS_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"MPEGTS:(\d+)").expect("static regex"));
static TIMING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:\d+:)?\d{2}:\d{2}\.\d{3})[ \t]+-->[ \t]+((?:\d+:)?\d{2}:\d{2}\.\d{3})(.*)$")
        .expect("static regex")
});
static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+):)?(\d{2}):(\d{2})\.(\d{3})$").expect("static regex"));
static NOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^NOTE($|[ \t])").expect("static regex"));

static ALIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^align:(start|middle|center|end|left|right)$").expect("static regex"));
static VERTICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^vertical:(lr|rl)$").expect("static regex"));
static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^size:(\d{1,2}|100)%$").expect("static regex"));
static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^position:(\d{1,2}|100)%(?:,(line-left|line-right|center|start|end))?$")
        .expect("static regex")
});
static LINE_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^line:(\d{1,2}|100)%(?:,(start|end|center))?$").expect("static regex")
});
static LINE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^line:(-?\d+)(?:,(start|end|center))?$").expect("static regex"));

/// Stateless WebVTT parser. Implements the stateful interface with a no-op
/// init so it can live in the same registry as the MP4 parsers.
#[derive(Debug, Default)]
pub struct VttParser;

impl VttParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TextParser for VttParser {
    fn parse_init(&mut self, _data: &[u8]) -> TextResult<()> {
        Ok(())
    }

    fn parse_media(&mut self, data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>> {
        parse_vtt(data, time)
    }
}

/// Parse a full WebVTT document into presentation-timed cues.
pub fn parse_vtt(data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>> {
    let text = std::str::from_utf8(data).map_err(|_| TextError::InvalidTextHeader)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let blocks: Vec<&str> = BLOCK_SPLIT.split(normalized.trim_end()).collect();
    let header = blocks.first().copied().unwrap_or_default();
    if !HEADER.is_match(header) {
        return Err(TextError::InvalidTextHeader);
    }

    let offset = cue_offset(header, time)?;

    let mut cues = Vec::new();
    for block in &blocks[1..] {
        if let Some(cue) = parse_cue_block(block, offset)? {
            cues.push(cue);
        }
    }
    Ok(cues)
}

/// The value added to every parsed cue time.
///
/// Without `X-TIMESTAMP-MAP` cue times are segment-local, so the offset is
/// the segment's presentation start. With it, cue times are document-local
/// and the map anchors them onto the MPEG-TS clock.
fn cue_offset(header: &str, time: &TimeContext) -> TextResult<f64> {
    if !header.contains("X-TIMESTAMP-MAP") {
        return Ok(time.period_start + time.segment_start.unwrap_or(0.0));
    }

    let local = LOCAL_TIME
        .captures(header)
        .and_then(|c| parse_timestamp(c.get(1).map_or("", |m| m.as_str())));
    let mpegts = MPEGTS_TIME
        .captures(header)
        .and_then(|c| c.get(1)?.as_str().parse::<u64>().ok());

    match (local, mpegts) {
        (Some(cue_time), Some(mpeg_time)) => {
            #[expect(clippy::cast_precision_loss)] // 90 kHz ticks, sub-ms precision is moot
            let mpeg_seconds = mpeg_time as f64 / MPEG_TIMESCALE;
            Ok(time.period_start + mpeg_seconds - cue_time)
        }
        _ => Err(TextError::InvalidTextHeader),
    }
}

fn parse_cue_block(block: &str, offset: f64) -> TextResult<Option<Cue>> {
    let mut lines: Vec<&str> = block.split('\n').collect();

    if lines.len() == 1 && lines[0].trim().is_empty() {
        return Ok(None);
    }
    if NOTE.is_match(lines[0]) || lines[0] == "STYLE" {
        return Ok(None);
    }

    let id = if lines[0].contains("-->") {
        None
    } else {
        let id = lines.remove(0);
        Some(id.to_string())
    };

    let timing = lines
        .first()
        .ok_or_else(|| TextError::InvalidTextCue(block.to_string()))?;
    let captures = TIMING_LINE
        .captures(timing.trim())
        .ok_or_else(|| TextError::InvalidTextCue((*timing).to_string()))?;

    let start = parse_timestamp(&captures[1])
        .ok_or_else(|| TextError::InvalidTextCue((*timing).to_string()))?;
    let end = parse_timestamp(&captures[2])
        .ok_or_else(|| TextError::InvalidTextCue((*timing).to_string()))?;

    let mut settings = CueSettings::default();
    for token in captures[3].split_whitespace() {
        parse_setting(token, &mut settings);
    }

    let payload = lines[1..].join("\n").trim().to_string();

    Ok(Some(Cue {
        start_time: start + offset,
        end_time: end + offset,
        payload,
        id,
        settings,
    }))
}

/// `[hh:]mm:ss.mmm` with minutes and seconds under 60.
fn parse_timestamp(s: &str) -> Option<f64> {
    let captures = TIMESTAMP.captures(s)?;
    let hours: u64 = captures
        .get(1)
        .map_or(Ok(0), |m| m.as_str().parse())
        .ok()?;
    let minutes: u64 = captures[2].parse().ok()?;
    let seconds: u64 = captures[3].parse().ok()?;
    let millis: u64 = captures[4].parse().ok()?;

    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    #[expect(clippy::cast_precision_loss)] // wall-clock magnitudes
    let seconds = (hours * 3600 + minutes * 60 + seconds) as f64 + millis as f64 / 1000.0;
    Some(seconds)
}

pub(crate) fn parse_setting(token: &str, settings: &mut CueSettings) {
    if let Some(captures) = ALIGN.captures(token) {
        match &captures[1] {
            "start" => settings.align = Some(TextAlign::Start),
            "middle" => settings.align = Some(TextAlign::Middle),
            "end" => settings.align = Some(TextAlign::End),
            "left" => settings.align = Some(TextAlign::Left),
            "right" => settings.align = Some(TextAlign::Right),
            // Renderer workaround: centered cues misplace unless the
            // position is left automatic and alignment falls back to middle.
            "center" => {
                settings.position = Some(VttPosition::Auto);
                settings.align = Some(TextAlign::Middle);
            }
            _ => unreachable!("constrained by regex"),
        }
    } else if let Some(captures) = VERTICAL.captures(token) {
        settings.vertical = Some(match &captures[1] {
            "lr" => WritingDirection::LeftToRight,
            _ => WritingDirection::RightToLeft,
        });
    } else if let Some(captures) = SIZE.captures(token) {
        settings.size = captures[1].parse().ok();
    } else if let Some(captures) = POSITION.captures(token) {
        settings.position = captures[1].parse().ok().map(VttPosition::Percent);
        settings.position_align = captures.get(2).map(|m| match m.as_str() {
            "line-left" => PositionAlign::LineLeft,
            "line-right" => PositionAlign::LineRight,
            "center" => PositionAlign::Center,
            "start" => PositionAlign::Start,
            _ => PositionAlign::End,
        });
    } else if let Some(captures) = LINE_PERCENT.captures(token) {
        settings.snap_to_lines = false;
        settings.line = captures[1].parse().ok().map(Line::Percent);
        settings.line_align = captures.get(2).map(|m| parse_line_align(m.as_str()));
    } else if let Some(captures) = LINE_NUMBER.captures(token) {
        settings.snap_to_lines = true;
        settings.line = captures[1].parse().ok().map(Line::Number);
        settings.line_align = captures.get(2).map(|m| parse_line_align(m.as_str()));
    } else {
        warn!(setting = token, "aulos-text: ignoring unknown VTT cue setting");
    }
}

fn parse_line_align(s: &str) -> LineAlign {
    match s {
        "start" => LineAlign::Start,
        "center" => LineAlign::Center,
        _ => LineAlign::End,
    }
}
