#![forbid(unsafe_code)]

//! The period / variant / stream hierarchy handed over by a manifest parser.

use std::sync::Arc;

use crate::{segment::SharedSegmentIndex, timeline::PresentationTimeline, InitSegmentReference};

/// Content type of a stream. Trick-play video is a stream substitution, not
/// a separate type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    Audio,
    Video,
    Text,
}

impl ContentType {
    pub const ALL: [Self; 3] = [Self::Audio, Self::Video, Self::Text];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One representation of one content type within one period.
#[derive(Clone)]
pub struct Stream {
    pub id: String,
    pub content_type: ContentType,
    pub mime_type: String,
    pub codecs: Option<String>,
    pub init_segment: Option<InitSegmentReference>,
    pub index: SharedSegmentIndex,
    pub contains_emsg_boxes: bool,
    /// Trick-mode counterpart substituted during trick play.
    pub trick_mode_video: Option<Arc<Stream>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("mime_type", &self.mime_type)
            .field("codecs", &self.codecs)
            .field("contains_emsg_boxes", &self.contains_emsg_boxes)
            .finish_non_exhaustive()
    }
}

/// An audio+video pairing within a period. Either side may be absent
/// (audio-only or video-only content).
#[derive(Clone, Debug)]
pub struct Variant {
    pub audio: Option<Arc<Stream>>,
    pub video: Option<Arc<Stream>>,
}

/// A contiguous slice of the presentation timeline with its own streams.
#[derive(Clone, Debug)]
pub struct Period {
    /// Start on the presentation timeline, seconds.
    pub start_time: f64,
    pub variants: Vec<Variant>,
    pub text_streams: Vec<Arc<Stream>>,
}

impl Period {
    /// All streams in this period, across variants and text.
    pub fn all_streams(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.variants
            .iter()
            .flat_map(|v| v.audio.iter().chain(v.video.iter()))
            .chain(self.text_streams.iter())
    }
}

/// A parsed presentation: ordered, contiguous, non-overlapping periods.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub timeline: PresentationTimeline,
    pub periods: Vec<Period>,
    pub min_buffer_time: f64,
}

impl Manifest {
    /// Index of the period containing `time`.
    ///
    /// Times before the first period map to period 0; times at or past the
    /// last period's start map to the last period. Unique and monotonic in
    /// `time` by construction (periods are sorted and non-overlapping).
    #[must_use]
    pub fn period_index_containing(&self, time: f64) -> usize {
        debug_assert!(!self.periods.is_empty());
        self.periods
            .partition_point(|p| p.start_time <= time)
            .saturating_sub(1)
    }

    /// The presentation time at which `period_index` ends: the next period's
    /// start, or the presentation duration for the last period.
    #[must_use]
    pub fn period_end_time(&self, period_index: usize) -> f64 {
        self.periods
            .get(period_index + 1)
            .map_or(self.timeline.duration(), |p| p.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::ListSegmentIndex;

    fn empty_stream(id: &str, content_type: ContentType) -> Arc<Stream> {
        Arc::new(Stream {
            id: id.to_string(),
            content_type,
            mime_type: "video/mp4".to_string(),
            codecs: None,
            init_segment: None,
            index: Arc::new(ListSegmentIndex::default()),
            contains_emsg_boxes: false,
            trick_mode_video: None,
        })
    }

    fn manifest() -> Manifest {
        let period = |start_time| Period {
            start_time,
            variants: vec![Variant {
                audio: Some(empty_stream("a", ContentType::Audio)),
                video: Some(empty_stream("v", ContentType::Video)),
            }],
            text_streams: vec![],
        };
        Manifest {
            timeline: PresentationTimeline::vod(40.0),
            periods: vec![period(0.0), period(20.0)],
            min_buffer_time: 2.0,
        }
    }

    #[test]
    fn period_lookup_is_monotonic() {
        let manifest = manifest();
        assert_eq!(manifest.period_index_containing(0.0), 0);
        assert_eq!(manifest.period_index_containing(19.9), 0);
        assert_eq!(manifest.period_index_containing(20.0), 1);
        assert_eq!(manifest.period_index_containing(1000.0), 1);
        assert_eq!(manifest.period_index_containing(-5.0), 0);
    }

    #[test]
    fn period_end_times() {
        let manifest = manifest();
        assert_eq!(manifest.period_end_time(0), 20.0);
        assert_eq!(manifest.period_end_time(1), 40.0);
    }

    #[test]
    fn all_streams_walks_variants_and_text() {
        let mut manifest = manifest();
        manifest.periods[0]
            .text_streams
            .push(empty_stream("t", ContentType::Text));
        assert_eq!(manifest.periods[0].all_streams().count(), 3);
        assert_eq!(manifest.periods[1].all_streams().count(), 2);
    }
}
