#![forbid(unsafe_code)]

//! Typed cue records and their WebVTT display settings.

/// Horizontal text alignment within the cue box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextAlign {
    Start,
    Middle,
    Center,
    End,
    Left,
    Right,
}

/// Vertical writing direction (`vertical:` setting).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritingDirection {
    LeftToRight,
    RightToLeft,
}

/// Cue box position: an explicit percentage, or automatic placement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VttPosition {
    Auto,
    Percent(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionAlign {
    LineLeft,
    LineRight,
    Center,
    Start,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineAlign {
    Start,
    Center,
    End,
}

/// The `line:` setting: a percentage of the video height, or a line number
/// (negative counts from the bottom).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Line {
    Percent(u32),
    Number(i32),
}

/// Display settings attached to a cue. Everything is optional; renderers
/// apply their own defaults for unset fields.
#[derive(Clone, Debug, PartialEq)]
pub struct CueSettings {
    pub align: Option<TextAlign>,
    pub vertical: Option<WritingDirection>,
    pub size: Option<u32>,
    pub position: Option<VttPosition>,
    pub position_align: Option<PositionAlign>,
    pub line: Option<Line>,
    pub line_align: Option<LineAlign>,
    pub snap_to_lines: bool,
}

impl Default for CueSettings {
    fn default() -> Self {
        Self {
            align: None,
            vertical: None,
            size: None,
            position: None,
            position_align: None,
            line: None,
            line_align: None,
            snap_to_lines: true,
        }
    }
}

/// One timed text entry: `[start_time, end_time)` on the presentation
/// timeline, a payload (plain text for VTT, raw XML for TTML), and display
/// settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Cue {
    pub start_time: f64,
    pub end_time: f64,
    pub payload: String,
    pub id: Option<String>,
    pub settings: CueSettings,
}

impl Cue {
    #[must_use]
    pub fn new(start_time: f64, end_time: f64, payload: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            payload: payload.into(),
            id: None,
            settings: CueSettings::default(),
        }
    }
}
