#![forbid(unsafe_code)]

//! TTML embedded in fragmented MP4 (`stpp` tracks).
//!
//! Each fragment's `mdat` holds a complete TTML document. Cue timing lives
//! inside the XML, which is the renderer's business; the parser emits one
//! cue per fragment spanning the segment window with the raw document as
//! payload.

use aulos_media::mp4;

use crate::{
    cue::Cue,
    error::{TextError, TextResult},
    mp4vtt::init_has_sample_entry,
    registry::{TextParser, TimeContext},
};

#[derive(Debug, Default)]
pub struct Mp4TtmlParser {
    initialized: bool,
}

impl Mp4TtmlParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextParser for Mp4TtmlParser {
    fn parse_init(&mut self, data: &[u8]) -> TextResult<()> {
        if !init_has_sample_entry(data, b"stpp") {
            return Err(TextError::InvalidMp4Ttml(
                "stpp sample entry not found".to_string(),
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn parse_media(&mut self, data: &[u8], time: &TimeContext) -> TextResult<Vec<Cue>> {
        if !self.initialized {
            return Err(TextError::InvalidMp4Ttml(
                "media segment before init segment".to_string(),
            ));
        }

        let start_time = time.period_start + time.segment_start.unwrap_or(0.0);
        let end_time = time.period_start + time.segment_end.unwrap_or(0.0);

        Ok(mp4::boxes(data)
            .filter(|b| b.is(b"mdat") && !b.payload.is_empty())
            .map(|b| {
                Cue::new(
                    start_time,
                    end_time,
                    String::from_utf8_lossy(b.payload).into_owned(),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_boxes::{make_box, make_init_segment};

    const TTML_DOC: &str = r#"<tt xmlns="http://www.w3.org/ns/ttml"><body><p begin="0s" end="2s">Hi</p></body></tt>"#;

    fn time() -> TimeContext {
        TimeContext {
            period_start: 20.0,
            segment_start: Some(4.0),
            segment_end: Some(8.0),
        }
    }

    #[test]
    fn init_requires_stpp() {
        let mut parser = Mp4TtmlParser::new();
        assert!(matches!(
            parser.parse_init(&make_init_segment(90000, b"wvtt")),
            Err(TextError::InvalidMp4Ttml(_))
        ));
        parser.parse_init(&make_init_segment(90000, b"stpp")).unwrap();
    }

    #[test]
    fn media_before_init_fails() {
        let mut parser = Mp4TtmlParser::new();
        let segment = make_box(b"mdat", TTML_DOC.as_bytes());
        assert!(matches!(
            parser.parse_media(&segment, &time()),
            Err(TextError::InvalidMp4Ttml(_))
        ));
    }

    #[test]
    fn emits_raw_xml_cue_spanning_segment() {
        let mut parser = Mp4TtmlParser::new();
        parser.parse_init(&make_init_segment(90000, b"stpp")).unwrap();

        let mut segment = make_box(b"moof", b"");
        segment.extend_from_slice(&make_box(b"mdat", TTML_DOC.as_bytes()));

        let cues = parser.parse_media(&segment, &time()).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_time, 24.0);
        assert_eq!(cues[0].end_time, 28.0);
        assert_eq!(cues[0].payload, TTML_DOC);
    }

    #[test]
    fn empty_mdat_produces_no_cue() {
        let mut parser = Mp4TtmlParser::new();
        parser.parse_init(&make_init_segment(90000, b"stpp")).unwrap();
        let segment = make_box(b"mdat", b"");
        assert!(parser.parse_media(&segment, &time()).unwrap().is_empty());
    }
}
