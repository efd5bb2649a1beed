//! Shared fixture for the streaming scenarios: a recording media sink, a
//! scriptable network, a settable playhead, and a manifest builder.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use aulos_media::{
    ContentType, InitSegmentReference, ListSegmentIndex, Manifest, Period, PresentationTimeline,
    SegmentReference, Stream, Variant,
};
use aulos_net::{Net, NetError, NetResult, Request, RequestKind, Response};
use aulos_streaming::{
    ChosenStreams, EngineHandlers, MediaSink, Playhead, SinkError, StreamEvent, StreamingError,
};
use aulos_text::Cue;
use bytes::Bytes;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Media sink

#[derive(Default)]
struct SinkState {
    mime_types: Option<HashMap<ContentType, String>>,
    duration: f64,
    ranges: HashMap<ContentType, Vec<(f64, f64)>>,
    init_appends: HashMap<ContentType, usize>,
    end_of_stream_calls: usize,
    /// Fail the next N media appends per type with QuotaExceeded.
    quota_failures: HashMap<ContentType, usize>,
}

#[derive(Default)]
pub struct MockSink {
    state: Mutex<SinkState>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with_quota(&self, content_type: ContentType, times: usize) {
        self.state.lock().quota_failures.insert(content_type, times);
    }

    pub fn ranges(&self, content_type: ContentType) -> Vec<(f64, f64)> {
        self.state
            .lock()
            .ranges
            .get(&content_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn init_append_count(&self, content_type: ContentType) -> usize {
        self.state
            .lock()
            .init_appends
            .get(&content_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn end_of_stream_calls(&self) -> usize {
        self.state.lock().end_of_stream_calls
    }

    pub fn inited_mime_types(&self) -> Option<HashMap<ContentType, String>> {
        self.state.lock().mime_types.clone()
    }

    pub fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn merge(ranges: &mut Vec<(f64, f64)>, start: f64, end: f64) {
        ranges.push((start, end));
        ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
        for &(s, e) in ranges.iter() {
            match merged.last_mut() {
                Some(last) if s <= last.1 + 1e-6 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        *ranges = merged;
    }

    fn subtract(ranges: &mut Vec<(f64, f64)>, start: f64, end: f64) {
        let mut out = Vec::with_capacity(ranges.len());
        for &(s, e) in ranges.iter() {
            if e <= start || s >= end {
                out.push((s, e));
                continue;
            }
            if s < start {
                out.push((s, start));
            }
            if e > end {
                out.push((end, e));
            }
        }
        *ranges = out;
    }
}

#[async_trait]
impl MediaSink for MockSink {
    async fn init(&self, mime_types: HashMap<ContentType, String>) -> Result<(), SinkError> {
        self.state.lock().mime_types = Some(mime_types);
        Ok(())
    }

    async fn set_duration(&self, duration: f64) -> Result<(), SinkError> {
        self.state.lock().duration = duration;
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    async fn append_buffer(
        &self,
        content_type: ContentType,
        _data: Bytes,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        let (Some(start), Some(end)) = (start_time, end_time) else {
            *state.init_appends.entry(content_type).or_default() += 1;
            return Ok(());
        };
        if let Some(failures) = state.quota_failures.get_mut(&content_type) {
            if *failures > 0 {
                *failures -= 1;
                return Err(SinkError::QuotaExceeded(content_type));
            }
        }
        Self::merge(state.ranges.entry(content_type).or_default(), start, end);
        Ok(())
    }

    async fn remove(
        &self,
        content_type: ContentType,
        start: f64,
        end: f64,
    ) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if let Some(ranges) = state.ranges.get_mut(&content_type) {
            Self::subtract(ranges, start, end);
        }
        Ok(())
    }

    async fn clear(&self, content_type: ContentType) -> Result<(), SinkError> {
        self.state.lock().ranges.remove(&content_type);
        Ok(())
    }

    async fn end_of_stream(&self) -> Result<(), SinkError> {
        self.state.lock().end_of_stream_calls += 1;
        Ok(())
    }

    fn buffer_start(&self, content_type: ContentType) -> Option<f64> {
        self.state
            .lock()
            .ranges
            .get(&content_type)
            .and_then(|r| r.first())
            .map(|r| r.0)
    }

    fn buffer_end(&self, content_type: ContentType) -> Option<f64> {
        self.state
            .lock()
            .ranges
            .get(&content_type)
            .and_then(|r| r.last())
            .map(|r| r.1)
    }

    fn is_buffered(&self, content_type: ContentType, time: f64) -> bool {
        self.state
            .lock()
            .ranges
            .get(&content_type)
            .is_some_and(|ranges| ranges.iter().any(|&(s, e)| s <= time && time < e))
    }
}

// ---------------------------------------------------------------------------
// Network

#[derive(Default)]
struct NetState {
    responses: HashMap<String, Bytes>,
    failures: HashMap<String, Vec<NetError>>,
    log: Vec<String>,
}

#[derive(Default)]
pub struct MockNet {
    state: Mutex<NetState>,
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `data` for `uri` instead of the default uri-as-bytes payload.
    pub fn stub_response(&self, uri: &str, data: Bytes) {
        self.state.lock().responses.insert(uri.to_string(), data);
    }

    /// Fail the next request for `uri` once per queued error.
    pub fn fail_once(&self, uri: &str, error: NetError) {
        self.state
            .lock()
            .failures
            .entry(uri.to_string())
            .or_default()
            .push(error);
    }

    pub fn requested(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self, uri: &str) -> usize {
        self.state.lock().log.iter().filter(|u| *u == uri).count()
    }
}

#[async_trait]
impl Net for MockNet {
    async fn request(&self, _kind: RequestKind, request: Request) -> NetResult<Response> {
        let uri = request
            .uris
            .first()
            .cloned()
            .unwrap_or_else(|| "missing".to_string());
        let mut state = self.state.lock();
        state.log.push(uri.clone());
        if let Some(queue) = state.failures.get_mut(&uri) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        let data = state
            .responses
            .get(&uri)
            .cloned()
            .unwrap_or_else(|| Bytes::from(uri.clone()));
        Ok(Response {
            data,
            uri,
            headers: aulos_net::Headers::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Playhead

#[derive(Default)]
pub struct MockPlayhead {
    time: Mutex<f64>,
}

impl MockPlayhead {
    pub fn at(time: f64) -> Arc<Self> {
        Arc::new(Self {
            time: Mutex::new(time),
        })
    }

    pub fn set(&self, time: f64) {
        *self.time.lock() = time;
    }
}

impl Playhead for MockPlayhead {
    fn time(&self) -> f64 {
        *self.time.lock()
    }
}

// ---------------------------------------------------------------------------
// Handlers

/// Chooses the first variant (and first text stream) of each period and
/// records every callback.
#[derive(Default)]
pub struct RecordingHandlers {
    pub chooses: Mutex<Vec<usize>>,
    pub can_switch: Mutex<Vec<usize>>,
    pub errors: Mutex<Vec<StreamingError>>,
    pub events: Mutex<Vec<StreamEvent>>,
    pub initial_setup_calls: AtomicUsize,
    pub startup_complete_calls: AtomicUsize,
    pub manifest_updates: AtomicUsize,
    pub segments_appended: AtomicUsize,
}

impl RecordingHandlers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn startup_complete(&self) -> usize {
        self.startup_complete_calls.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

impl EngineHandlers for RecordingHandlers {
    fn on_choose_streams(&self, period_index: usize, period: &Period) -> ChosenStreams {
        self.chooses.lock().push(period_index);
        let variant = period.variants.first();
        ChosenStreams {
            audio: variant.and_then(|v| v.audio.clone()),
            video: variant.and_then(|v| v.video.clone()),
            text: period.text_streams.first().cloned(),
        }
    }

    fn on_can_switch(&self, period_index: usize) {
        self.can_switch.lock().push(period_index);
    }

    fn on_initial_streams_setup(&self) {
        self.initial_setup_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_startup_complete(&self) {
        self.startup_complete_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &StreamingError) {
        self.errors.lock().push(error.clone());
    }

    fn on_event(&self, event: StreamEvent) {
        self.events.lock().push(event);
    }

    fn on_manifest_update(&self) {
        self.manifest_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_segment_appended(&self) {
        self.segments_appended.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Manifest builder

pub const TEST_TEXT_MIME: &str = "text/x-fixture-cues";

/// One cue spanning each appended segment, independent of payload bytes.
fn segment_span_parser(
    _data: &[u8],
    period_start: f64,
    segment_start: Option<f64>,
    segment_end: Option<f64>,
) -> Result<Vec<Cue>, aulos_text::TextError> {
    let start = period_start + segment_start.unwrap_or(0.0);
    let end = period_start + segment_end.unwrap_or(0.0);
    Ok(vec![Cue::new(start, end, "fixture cue")])
}

pub fn register_test_text_parser() {
    aulos_text::register_stateless_parser(TEST_TEXT_MIME, segment_span_parser);
}

pub struct ManifestSpec {
    pub period_starts: Vec<f64>,
    pub segments_per_period: Vec<usize>,
    pub segment_duration: f64,
    pub duration: f64,
    /// `Some(window)` makes the timeline live with that availability window.
    pub live_window: Option<f64>,
    pub with_text: bool,
    pub text_mime: String,
    pub video_emsg: bool,
    pub with_trick_video: bool,
}

impl ManifestSpec {
    pub fn vod_two_periods() -> Self {
        Self {
            period_starts: vec![0.0, 20.0],
            segments_per_period: vec![2, 2],
            segment_duration: 10.0,
            duration: 40.0,
            live_window: None,
            with_text: true,
            text_mime: TEST_TEXT_MIME.to_string(),
            video_emsg: false,
            with_trick_video: false,
        }
    }

    pub fn live_two_periods() -> Self {
        Self {
            period_starts: vec![0.0, 120.0],
            segments_per_period: vec![12, 2],
            segment_duration: 10.0,
            duration: 140.0,
            live_window: Some(20.0),
            with_text: true,
            text_mime: TEST_TEXT_MIME.to_string(),
            video_emsg: false,
            with_trick_video: false,
        }
    }
}

/// Media segment URI: `{period_number}_{type}_{segment_number}` with both
/// numbers 1-based, e.g. `2_audio_1`. Init segments use `_init`.
pub fn segment_uri(period_number: usize, content_type: ContentType, segment_number: usize) -> String {
    format!("{period_number}_{content_type}_{segment_number}")
}

fn make_stream(
    period_number: usize,
    content_type: ContentType,
    spec: &ManifestSpec,
    segment_count: usize,
    trick: bool,
) -> Arc<Stream> {
    let label = if trick {
        "trick".to_string()
    } else {
        content_type.to_string()
    };
    let references = (0..segment_count)
        .map(|i| {
            let start = i as f64 * spec.segment_duration;
            SegmentReference {
                position: i as u64,
                start_time: start,
                end_time: start + spec.segment_duration,
                uris: vec![format!("{period_number}_{label}_{}", i + 1)],
                byte_range: None,
            }
        })
        .collect();

    let mime_type = match content_type {
        ContentType::Audio => "audio/mp4".to_string(),
        ContentType::Video => "video/mp4".to_string(),
        ContentType::Text => spec.text_mime.clone(),
    };

    let trick_mode_video = if spec.with_trick_video && content_type == ContentType::Video && !trick
    {
        Some(make_stream(
            period_number,
            ContentType::Video,
            spec,
            segment_count,
            true,
        ))
    } else {
        None
    };

    Arc::new(Stream {
        id: format!("{period_number}_{label}"),
        content_type,
        mime_type,
        codecs: match content_type {
            ContentType::Audio => Some("mp4a.40.2".to_string()),
            ContentType::Video => Some("avc1.42c01e".to_string()),
            ContentType::Text => None,
        },
        init_segment: (content_type != ContentType::Text).then(|| InitSegmentReference {
            uris: vec![format!("{period_number}_{label}_init")],
            byte_range: None,
        }),
        index: Arc::new(ListSegmentIndex::new(references)),
        contains_emsg_boxes: content_type == ContentType::Video && spec.video_emsg,
        trick_mode_video,
    })
}

pub fn build_manifest(spec: &ManifestSpec) -> Manifest {
    register_test_text_parser();

    let timeline = match spec.live_window {
        Some(window) => PresentationTimeline::live(spec.duration, window),
        None => PresentationTimeline::vod(spec.duration),
    };

    let periods = spec
        .period_starts
        .iter()
        .enumerate()
        .map(|(index, &start_time)| {
            let period_number = index + 1;
            let segment_count = spec.segments_per_period[index];
            Period {
                start_time,
                variants: vec![Variant {
                    audio: Some(make_stream(
                        period_number,
                        ContentType::Audio,
                        spec,
                        segment_count,
                        false,
                    )),
                    video: Some(make_stream(
                        period_number,
                        ContentType::Video,
                        spec,
                        segment_count,
                        false,
                    )),
                }],
                text_streams: if spec.with_text {
                    vec![make_stream(
                        period_number,
                        ContentType::Text,
                        spec,
                        segment_count,
                        false,
                    )]
                } else {
                    vec![]
                },
            }
        })
        .collect();

    Manifest {
        timeline,
        periods,
        min_buffer_time: 2.0,
    }
}

/// A second audio rendition for switch tests, with its own URI space.
pub fn alternate_audio(period_number: usize, spec: &ManifestSpec, segment_count: usize) -> Arc<Stream> {
    let references = (0..segment_count)
        .map(|i| {
            let start = i as f64 * spec.segment_duration;
            SegmentReference {
                position: i as u64,
                start_time: start,
                end_time: start + spec.segment_duration,
                uris: vec![format!("{period_number}_audio2_{}", i + 1)],
                byte_range: None,
            }
        })
        .collect();
    Arc::new(Stream {
        id: format!("{period_number}_audio2"),
        content_type: ContentType::Audio,
        mime_type: "audio/mp4".to_string(),
        codecs: Some("mp4a.40.2".to_string()),
        init_segment: Some(InitSegmentReference {
            uris: vec![format!("{period_number}_audio2_init")],
            byte_range: None,
        }),
        index: Arc::new(ListSegmentIndex::new(references)),
        contains_emsg_boxes: false,
        trick_mode_video: None,
    })
}

// ---------------------------------------------------------------------------
// emsg fixtures

fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&u32::try_from(8 + payload.len()).unwrap().to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}

/// A media segment containing a single v0 `emsg` box followed by an `mdat`.
pub fn make_emsg_segment(
    scheme: &str,
    value: &str,
    timescale: u32,
    presentation_time_delta: u32,
    event_duration: u32,
    id: u32,
    message: &[u8],
) -> Bytes {
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(scheme.as_bytes());
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    body.push(0);
    for field in [timescale, presentation_time_delta, event_duration, id] {
        body.extend_from_slice(&field.to_be_bytes());
    }
    body.extend_from_slice(message);

    let mut segment = make_box(b"emsg", &body);
    segment.extend_from_slice(&make_box(b"mdat", b"samples"));
    Bytes::from(segment)
}

// ---------------------------------------------------------------------------
// Polling helper

/// Poll `condition` until it holds or `virtual_seconds` of tokio time have
/// elapsed. Meant for `start_paused` tests, where the sleeps auto-advance.
pub async fn wait_until(virtual_seconds: u64, mut condition: impl FnMut() -> bool) -> bool {
    let steps = virtual_seconds * 20;
    for _ in 0..steps {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    condition()
}
