#![forbid(unsafe_code)]

//! WebVTT embedded in fragmented MP4 (`wvtt` tracks).
//!
//! The init segment supplies the track timescale and proves the track
//! really is `wvtt`; media segments are `moof`+`mdat` pairs whose samples
//! contain `vttc` cue boxes (or `vtte` for gaps). Cue times come from the
//! `tfdt` decode time plus accumulated sample durations.

use aulos_media::mp4;
use tracing::trace;

use crate::{
    cue::{Cue, CueSettings},
    error::{TextError, TextResult},
    registry::{TextParser, TimeContext},
    vtt,
};

/// Stateful parser for `wvtt` tracks. `parse_init` must see the init
/// segment before any media segment is parsed.
#[derive(Debug, Default)]
pub struct Mp4VttParser {
    timescale: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
struct TrackDefaults {
    sample_duration: Option<u32>,
    sample_size: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
struct SampleEntry {
    duration: Option<u32>,
    size: Option<u32>,
}

impl Mp4VttParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextParser for Mp4VttParser {
    fn parse_init(&mut self, data: &[u8]) -> TextResult<()> {
        let moov = mp4::find(data, b"moov")
            .ok_or_else(|| TextError::InvalidMp4Vtt("moov box not found".to_string()))?;

        for trak in mp4::boxes(moov).filter(|b| b.is(b"trak")) {
            let Some(mdia) = mp4::find(trak.payload, b"mdia") else {
                continue;
            };
            if !stsd_has_sample_entry(mdia, b"wvtt") {
                continue;
            }
            let timescale = mdhd_timescale(mdia)
                .ok_or_else(|| TextError::InvalidMp4Vtt("mdhd box not found".to_string()))?;
            self.timescale = Some(timescale);
            return Ok(());
        }

        Err(TextError::InvalidMp4Vtt(
            "wvtt sample entry not found".to_string(),
        ))
    }

    fn parse_media(&mut self, data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>> {
        let timescale = self.timescale.ok_or_else(|| {
            TextError::InvalidMp4Vtt("media segment before init segment".to_string())
        })?;

        let mut cues = Vec::new();
        let mut pending: Option<Fragment> = None;

        for top in mp4::boxes(data) {
            if top.is(b"moof") {
                pending = Some(Fragment::parse(top.payload)?);
            } else if top.is(b"mdat") {
                let fragment = pending.take().ok_or_else(|| {
                    TextError::InvalidMp4Vtt("mdat box without preceding moof".to_string())
                })?;
                fragment.emit_cues(top.payload, timescale, time, &mut cues)?;
            }
        }

        Ok(cues)
    }
}

/// Sample timing pulled out of one `moof`.
#[derive(Debug)]
struct Fragment {
    base_time: u64,
    defaults: TrackDefaults,
    samples: Vec<SampleEntry>,
}

impl Fragment {
    fn parse(moof: &[u8]) -> TextResult<Self> {
        let traf = mp4::find(moof, b"traf")
            .ok_or_else(|| TextError::InvalidMp4Vtt("traf box not found".to_string()))?;

        let defaults = mp4::find(traf, b"tfhd")
            .and_then(parse_tfhd)
            .unwrap_or_default();

        let base_time = mp4::find(traf, b"tfdt").and_then(parse_tfdt).ok_or_else(|| {
            TextError::InvalidMp4Vtt("tfdt box not found in fragment".to_string())
        })?;

        let mut samples = Vec::new();
        for trun in mp4::boxes(traf).filter(|b| b.is(b"trun")) {
            parse_trun(trun.payload, &mut samples)
                .ok_or_else(|| TextError::InvalidMp4Vtt("malformed trun box".to_string()))?;
        }

        Ok(Self {
            base_time,
            defaults,
            samples,
        })
    }

    fn emit_cues(
        &self,
        mdat: &[u8],
        timescale: u32,
        time: &TimeContext,
        cues: &mut Vec<Cue>,
    ) -> TextResult<()> {
        let mut offset = 0usize;
        let mut current_ticks = self.base_time;

        for sample in &self.samples {
            let duration = sample
                .duration
                .or(self.defaults.sample_duration)
                .ok_or_else(|| TextError::InvalidMp4Vtt("missing sample duration".to_string()))?;
            let size = sample
                .size
                .or(self.defaults.sample_size)
                .ok_or_else(|| TextError::InvalidMp4Vtt("missing sample size".to_string()))?;

            let end_offset = offset + size as usize;
            let payload = mdat.get(offset..end_offset).ok_or_else(|| {
                TextError::InvalidMp4Vtt("sample extends past mdat".to_string())
            })?;
            offset = end_offset;

            let start_time = time.period_start + to_seconds(current_ticks, timescale);
            current_ticks += u64::from(duration);
            let end_time = time.period_start + to_seconds(current_ticks, timescale);

            for cue_box in mp4::boxes(payload) {
                if cue_box.is(b"vttc") {
                    if let Some(cue) = parse_vttc(cue_box.payload, start_time, end_time) {
                        cues.push(cue);
                    }
                } else if cue_box.is(b"vtte") {
                    trace!("aulos-text: empty wvtt sample");
                }
            }
        }

        Ok(())
    }
}

fn to_seconds(ticks: u64, timescale: u32) -> f64 {
    #[expect(clippy::cast_precision_loss)] // media timestamps fit in f64 exactly enough
    let seconds = ticks as f64 / f64::from(timescale);
    seconds
}

fn mdhd_timescale(mdia: &[u8]) -> Option<u32> {
    let full = mp4::full_box(mp4::find(mdia, b"mdhd")?)?;
    let mut cursor = mp4::Cursor::new(full.payload);
    if full.version == 1 {
        cursor.skip(16)?; // 64-bit creation + modification
    } else {
        cursor.skip(8)?;
    }
    cursor.read_u32()
}

fn stsd_has_sample_entry(mdia: &[u8], fourcc: &[u8; 4]) -> bool {
    let Some(stsd) = mp4::find_path(mdia, &[b"minf", b"stbl", b"stsd"]) else {
        return false;
    };
    let Some(full) = mp4::full_box(stsd) else {
        return false;
    };
    // Entry count precedes the sample-entry boxes.
    let Some(entries) = full.payload.get(4..) else {
        return false;
    };
    mp4::boxes(entries).any(|b| b.is(fourcc))
}

pub(crate) fn init_has_sample_entry(data: &[u8], fourcc: &[u8; 4]) -> bool {
    let Some(moov) = mp4::find(data, b"moov") else {
        return false;
    };
    mp4::boxes(moov)
        .filter(|b| b.is(b"trak"))
        .filter_map(|trak| mp4::find(trak.payload, b"mdia"))
        .any(|mdia| stsd_has_sample_entry(mdia, fourcc))
}

fn parse_tfhd(payload: &[u8]) -> Option<TrackDefaults> {
    let full = mp4::full_box(payload)?;
    let mut cursor = mp4::Cursor::new(full.payload);
    cursor.skip(4)?; // track_ID
    if full.flags & 0x01 != 0 {
        cursor.skip(8)?; // base_data_offset
    }
    if full.flags & 0x02 != 0 {
        cursor.skip(4)?; // sample_description_index
    }
    let mut defaults = TrackDefaults::default();
    if full.flags & 0x08 != 0 {
        defaults.sample_duration = cursor.read_u32();
    }
    if full.flags & 0x10 != 0 {
        defaults.sample_size = cursor.read_u32();
    }
    Some(defaults)
}

fn parse_tfdt(payload: &[u8]) -> Option<u64> {
    let full = mp4::full_box(payload)?;
    let mut cursor = mp4::Cursor::new(full.payload);
    if full.version == 1 {
        cursor.read_u64()
    } else {
        cursor.read_u32().map(u64::from)
    }
}

fn parse_trun(payload: &[u8], samples: &mut Vec<SampleEntry>) -> Option<()> {
    let full = mp4::full_box(payload)?;
    let mut cursor = mp4::Cursor::new(full.payload);
    let count = cursor.read_u32()?;
    if full.flags & 0x01 != 0 {
        cursor.skip(4)?; // data_offset
    }
    if full.flags & 0x04 != 0 {
        cursor.skip(4)?; // first_sample_flags
    }

    for _ in 0..count {
        let mut sample = SampleEntry::default();
        if full.flags & 0x100 != 0 {
            sample.duration = Some(cursor.read_u32()?);
        }
        if full.flags & 0x200 != 0 {
            sample.size = Some(cursor.read_u32()?);
        }
        if full.flags & 0x400 != 0 {
            cursor.skip(4)?; // sample_flags
        }
        if full.flags & 0x800 != 0 {
            cursor.skip(4)?; // composition offset
        }
        samples.push(sample);
    }
    Some(())
}

fn parse_vttc(payload: &[u8], start_time: f64, end_time: f64) -> Option<Cue> {
    let mut text = None;
    let mut settings = CueSettings::default();

    for inner in mp4::boxes(payload) {
        if inner.is(b"payl") {
            text = Some(String::from_utf8_lossy(inner.payload).into_owned());
        } else if inner.is(b"sttg") {
            for token in String::from_utf8_lossy(inner.payload).split_whitespace() {
                vtt::parse_setting(token, &mut settings);
            }
        }
    }

    let payload = text?;
    let mut cue = Cue::new(start_time, end_time, payload);
    cue.settings = settings;
    Some(cue)
}
