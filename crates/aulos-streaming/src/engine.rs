#![forbid(unsafe_code)]

//! The orchestrator and the per-content-type update loops.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use aulos_media::{
    parse_emsg_boxes, ContentType, Manifest, PresentationTimeline, SegmentReference, Stream,
};
use aulos_net::{Net, RangeSpec, Request, RequestKind};
use aulos_text::{CueTrack, TextEngine};
use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::StreamingConfig,
    error::{StreamingError, StreamingResult},
    handlers::{ChosenStreams, EngineHandlers, StreamEvent},
    sink::{Clock, MediaSink, Playhead},
    state::MediaState,
};

/// Poll cadence while waiting at the live edge for new segments.
const LIVE_EDGE_POLL: Duration = Duration::from_secs(1);
/// Backoff between rescheduled attempts after a recoverable live failure.
const LIVE_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Poll cadence while a content type has no stream in the current period.
const IDLE_POLL: Duration = Duration::from_millis(500);
/// Slack added when rescheduling a satisfied buffer.
const UPDATE_SLACK: f64 = 0.1;

/// Everything the engine talks to but does not own.
#[derive(Clone)]
pub struct Externals {
    pub sink: Arc<dyn MediaSink>,
    pub net: Arc<dyn Net>,
    pub playhead: Arc<dyn Playhead>,
    pub handlers: Arc<dyn EngineHandlers>,
    pub clock: Arc<dyn Clock>,
    pub cue_track: Option<Arc<dyn CueTrack>>,
}

/// What a loop should do after a tick.
enum Next {
    /// Run another tick immediately.
    Now,
    /// Sleep, unless woken earlier.
    After(Duration),
    /// Wait for an explicit wakeup (seek, switch, destroy).
    Park,
}

struct TypeCell {
    state: Mutex<MediaState>,
    notify: Notify,
}

struct Inner {
    manifest: Manifest,
    timeline: Mutex<PresentationTimeline>,
    config: Mutex<StreamingConfig>,
    sink: Arc<dyn MediaSink>,
    text: Arc<TextEngine>,
    net: Arc<dyn Net>,
    playhead: Arc<dyn Playhead>,
    clock: Arc<dyn Clock>,
    handlers: Arc<dyn EngineHandlers>,
    cancel: CancellationToken,
    cells: HashMap<ContentType, Arc<TypeCell>>,
    current_period: AtomicUsize,
    /// Streams chosen per period, so every type entering a period reuses
    /// one `on_choose_streams` answer.
    chosen: Mutex<HashMap<usize, ChosenStreams>>,
    started_types: Mutex<Vec<ContentType>>,
    startup_fired: AtomicBool,
    ended: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The per-presentation scheduling engine.
///
/// One instance drives one manifest from `init()` to `destroy()`.
pub struct StreamingEngine {
    inner: Arc<Inner>,
}

impl StreamingEngine {
    #[must_use]
    pub fn new(manifest: Manifest, externals: Externals, config: StreamingConfig) -> Self {
        aulos_text::register_default_parsers();

        let timeline = manifest.timeline.clone();
        let cells = ContentType::ALL
            .into_iter()
            .map(|ct| {
                (
                    ct,
                    Arc::new(TypeCell {
                        state: Mutex::new(MediaState::new(None, 0)),
                        notify: Notify::new(),
                    }),
                )
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                manifest,
                timeline: Mutex::new(timeline),
                config: Mutex::new(config),
                sink: externals.sink,
                text: Arc::new(TextEngine::new(externals.cue_track)),
                net: externals.net,
                playhead: externals.playhead,
                clock: externals.clock,
                handlers: externals.handlers,
                cancel: CancellationToken::new(),
                cells,
                current_period: AtomicUsize::new(0),
                chosen: Mutex::new(HashMap::new()),
                started_types: Mutex::new(Vec::new()),
                startup_fired: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The text sink this engine owns.
    #[must_use]
    pub fn text_engine(&self) -> &TextEngine {
        &self.inner.text
    }

    /// The furthest period any content type has entered (reset by seeks).
    #[must_use]
    pub fn current_period_index(&self) -> usize {
        self.inner.current_period.load(Ordering::SeqCst)
    }

    /// Where playback should start for a requested `time`: the containing
    /// segment's start when `start_at_segment_boundary` is configured.
    #[must_use]
    pub fn start_time_for(&self, time: f64) -> f64 {
        let inner = &self.inner;
        if !inner.config.lock().start_at_segment_boundary {
            return time;
        }
        let index = inner.manifest.period_index_containing(time);
        let period = &inner.manifest.periods[index];
        let stream = period
            .variants
            .first()
            .and_then(|v| v.video.clone().or_else(|| v.audio.clone()));
        let Some(stream) = stream else { return time };
        stream
            .index
            .find(time - period.start_time)
            .and_then(|position| stream.index.get(position))
            .map_or(time, |reference| period.start_time + reference.start_time)
    }

    /// Set up the initial media states and start the loops.
    ///
    /// Completes once every chosen stream is indexed and the loops are
    /// running; fails if the sink or any segment index refuses.
    pub async fn init(&self) -> StreamingResult<()> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(StreamingError::Destroyed);
        }

        let mut period_index = inner
            .manifest
            .period_index_containing(inner.playhead.time());
        let (mut chosen, _) = inner.ensure_period_chosen(period_index);

        // The playhead may have moved while the chooser ran. Discard the
        // stale answer and ask again for the right period.
        let settled_index = inner
            .manifest
            .period_index_containing(inner.playhead.time());
        if settled_index != period_index {
            debug!(
                chosen_for = period_index,
                playhead_in = settled_index,
                "aulos-streaming: playhead moved periods during startup, re-choosing"
            );
            inner.chosen.lock().remove(&period_index);
            period_index = settled_index;
            chosen = inner.ensure_period_chosen(period_index).0;
        }
        inner.current_period.store(period_index, Ordering::SeqCst);

        let mut mime_types = HashMap::new();
        if let Some(audio) = &chosen.audio {
            mime_types.insert(ContentType::Audio, full_mime_type(audio));
        }
        if let Some(video) = &chosen.video {
            mime_types.insert(ContentType::Video, full_mime_type(video));
        }
        inner.sink.init(mime_types).await?;
        let duration = inner.timeline.lock().duration();
        inner.sink.set_duration(duration).await?;

        let mut text_dropped = false;
        if let Some(text) = chosen.text.clone() {
            let ignore_failures = inner.config.lock().ignore_text_stream_failures;
            match inner.text.init_parser(&text.mime_type) {
                Ok(()) => inner.configure_text_for_period(period_index),
                Err(error) if ignore_failures => {
                    warn!(
                        mime = %text.mime_type,
                        error = %error,
                        "aulos-streaming: dropping text stream with unsupported mime"
                    );
                    chosen.text = None;
                    text_dropped = true;
                    inner.chosen.lock().insert(period_index, chosen.clone());
                }
                Err(error) => return Err(error.into()),
            }
        }

        for stream in [&chosen.audio, &chosen.video, &chosen.text]
            .into_iter()
            .flatten()
        {
            stream.index.create().await?;
        }
        inner.handlers.on_initial_streams_setup();

        for content_type in ContentType::ALL {
            let stream = chosen.for_type(content_type);
            let cell = &inner.cells[&content_type];
            let mut state = MediaState::new(stream, period_index);
            if content_type == ContentType::Text && text_dropped {
                state.disabled = true;
            }
            *cell.state.lock() = state;
        }

        let mut tasks = inner.tasks.lock();
        for content_type in ContentType::ALL {
            let inner = Arc::clone(inner);
            tasks.push(tokio::spawn(drive(inner, content_type)));
        }
        drop(tasks);

        // Index the rest of the period in the background so switching
        // becomes possible without stalling startup.
        inner.spawn_period_setup(period_index);
        Ok(())
    }

    /// The playhead moved by an external seek. Re-synchronize every type.
    pub fn seeked(&self) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        let time = inner.playhead.time();
        let new_period = inner.manifest.period_index_containing(time);
        inner.current_period.store(new_period, Ordering::SeqCst);
        let (_, newly_chosen) = inner.ensure_period_chosen(new_period);
        if newly_chosen {
            inner.spawn_period_setup(new_period);
        }

        for (content_type, cell) in &inner.cells {
            let buffered = inner.is_buffered(*content_type, time);
            {
                let mut state = cell.state.lock();
                if buffered {
                    // Buffered at the new position: keep everything and let
                    // the loop continue from its buffer end.
                    state.end_of_stream = false;
                } else {
                    debug!(
                        content_type = %content_type,
                        time,
                        "aulos-streaming: seek outside buffered range, clearing"
                    );
                    state.waiting_to_clear_buffer = true;
                    state.has_error = false;
                    state.end_of_stream = false;
                }
            }
            cell.notify.notify_one();
        }
    }

    /// Substitute the active stream for one content type.
    ///
    /// A no-op when the stream is already active. With `clear_buffer` the
    /// buffered data is dropped and refilled from the playhead; without it
    /// the new stream takes over at the buffer end.
    pub async fn switch(
        &self,
        content_type: ContentType,
        stream: Arc<Stream>,
        clear_buffer: bool,
    ) -> StreamingResult<()> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(StreamingError::Destroyed);
        }
        stream.index.create().await?;

        let cell = &inner.cells[&content_type];
        {
            let mut state = cell.state.lock();
            if state
                .stream
                .as_ref()
                .is_some_and(|current| current.id == stream.id)
            {
                return Ok(());
            }
            debug!(
                content_type = %content_type,
                stream = %stream.id,
                clear_buffer,
                "aulos-streaming: switching stream"
            );
            state.stream = Some(Arc::clone(&stream));
            state.need_init_segment = true;
            state.last_segment_reference = None;
            state.has_error = false;
            if clear_buffer {
                state.waiting_to_clear_buffer = true;
            }
        }
        if content_type == ContentType::Text
            && inner.text.mime_type().as_deref() != Some(stream.mime_type.as_str())
        {
            inner.text.init_parser(&stream.mime_type)?;
        }
        cell.notify.notify_one();
        Ok(())
    }

    /// Engage or disengage trick play on the video type.
    ///
    /// Engaging substitutes the stream's trick-mode counterpart and clears
    /// the video buffer; disengaging restores the normal stream the same
    /// way. No-ops when there is no counterpart.
    pub fn set_trick_play(&self, enabled: bool) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        let cell = &inner.cells[&ContentType::Video];
        {
            let mut state = cell.state.lock();
            if enabled {
                let Some(current) = state.stream.clone() else {
                    return;
                };
                let Some(trick) = current.trick_mode_video.clone() else {
                    debug!("aulos-streaming: no trick-mode stream, ignoring");
                    return;
                };
                if state.trick_play_restore.is_none() {
                    state.trick_play_restore = Some(current);
                }
                state.stream = Some(trick);
            } else {
                let Some(original) = state.trick_play_restore.take() else {
                    return;
                };
                state.stream = Some(original);
            }
            state.need_init_segment = true;
            state.last_segment_reference = None;
            state.waiting_to_clear_buffer = true;
        }
        cell.notify.notify_one();
    }

    /// Hot-swap the configuration.
    pub fn configure(&self, config: StreamingConfig) {
        *self.inner.config.lock() = config;
        for cell in self.inner.cells.values() {
            cell.notify.notify_one();
        }
    }

    /// Cancel all pending work. Resolves when every loop has exited.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        inner.text.destroy().await;
        debug!("aulos-streaming: engine destroyed");
    }
}

async fn drive(inner: Arc<Inner>, content_type: ContentType) {
    trace!(content_type = %content_type, "aulos-streaming: loop started");
    let cell = Arc::clone(&inner.cells[&content_type]);
    let mut next = Next::Now;
    loop {
        match next {
            Next::Now => {}
            Next::After(delay) => {
                tokio::select! {
                    () = inner.cancel.cancelled() => break,
                    () = cell.notify.notified() => {}
                    () = sleep(delay) => {}
                }
            }
            Next::Park => {
                tokio::select! {
                    () = inner.cancel.cancelled() => break,
                    () = cell.notify.notified() => {}
                }
            }
        }
        if inner.cancel.is_cancelled() {
            break;
        }
        next = inner.update_tick(content_type).await;
    }
    trace!(content_type = %content_type, "aulos-streaming: loop stopped");
}

impl Inner {
    /// One scheduling round for one content type.
    async fn update_tick(self: &Arc<Self>, content_type: ContentType) -> Next {
        let cell = Arc::clone(&self.cells[&content_type]);

        // A requested clear always runs first; everything below assumes a
        // coherent buffer.
        let clear_requested = {
            let mut state = cell.state.lock();
            if state.waiting_to_clear_buffer {
                state.waiting_to_clear_buffer = false;
                state.clearing_buffer = true;
                true
            } else {
                false
            }
        };
        if clear_requested {
            let result = self.clear_buffer_now(content_type).await;
            {
                let mut state = cell.state.lock();
                state.clearing_buffer = false;
                state.reset_fetch_progress();
                state.resume_at = None;
            }
            if let Err(error) = result {
                return self.handle_error(content_type, error).await;
            }
            return Next::Now;
        }

        let (stream, period_index, resume_at, parked) = {
            let state = cell.state.lock();
            (
                state.stream.clone(),
                state.period_index,
                state.resume_at,
                state.end_of_stream || state.has_error || state.disabled,
            )
        };
        if parked {
            return Next::Park;
        }

        let playhead_time = self.playhead.time();
        let buffer_end = self.buffer_end(content_type);
        let buffered_ahead = buffer_end.map_or(0.0, |end| (end - playhead_time).max(0.0));

        let mut target = buffer_end.unwrap_or(playhead_time);
        if let Some(resume_at) = resume_at {
            target = target.max(resume_at);
        }

        let target_period = self.manifest.period_index_containing(target);
        if target_period != period_index {
            return self.adopt_period(content_type, target_period).await;
        }

        let Some(stream) = stream else {
            return self.tick_without_stream(content_type, period_index, playhead_time).await;
        };

        // A stream that arrived outside adopt_period (trick play, direct
        // switch) may not be indexed yet; creating twice is cheap.
        let fresh_stream = {
            let state = cell.state.lock();
            state.last_stream_id.as_deref() != Some(stream.id.as_str())
        };
        if fresh_stream {
            if let Err(error) = stream.index.create().await {
                return self.handle_error(content_type, error.into()).await;
            }
        }

        let goal = self.config.lock().effective_buffering_goal();
        if buffer_end.is_some() && buffered_ahead >= goal {
            trace!(
                content_type = %content_type,
                buffered_ahead,
                goal,
                "aulos-streaming: buffer satisfied"
            );
            return Next::After(Duration::from_secs_f64(
                (buffered_ahead - goal).max(0.0) + UPDATE_SLACK,
            ));
        }

        let period_start = self.manifest.periods[period_index].start_time;
        let reference = {
            let state = cell.state.lock();
            self.next_reference(&state, &stream, target - period_start)
        };

        let Some(reference) = reference else {
            return self.tick_out_of_segments(content_type, period_index, target).await;
        };

        // Live content: only the availability window may be requested.
        {
            let timeline = self.timeline.lock().clone();
            if timeline.is_live() {
                let now = self.clock.now();
                let (avail_start, avail_end) = timeline.availability_window(now);
                let segment_start = period_start + reference.start_time;
                let segment_end = period_start + reference.end_time;
                if segment_start >= avail_end {
                    let wait = (segment_start - avail_end).max(0.25);
                    trace!(
                        content_type = %content_type,
                        segment_start,
                        avail_end,
                        "aulos-streaming: segment not yet available"
                    );
                    return Next::After(Duration::from_secs_f64(wait.min(LIVE_EDGE_POLL.as_secs_f64())));
                }
                if segment_end <= avail_start {
                    debug!(
                        content_type = %content_type,
                        segment_end,
                        avail_start,
                        "aulos-streaming: segment fell out of the live window, jumping forward"
                    );
                    let mut state = cell.state.lock();
                    state.last_segment_reference = None;
                    state.resume_at = Some(avail_start);
                    return Next::Now;
                }
            }
        }

        cell.state.lock().performing_update = true;
        let result = self
            .fetch_and_append(content_type, &stream, period_index, &reference)
            .await;
        let clear_pending = {
            let mut state = cell.state.lock();
            state.performing_update = false;
            state.waiting_to_clear_buffer
        };

        match result {
            Ok(()) => {
                {
                    let mut state = cell.state.lock();
                    state.last_segment_reference = Some(reference.clone());
                    state.last_stream_id = Some(stream.id.clone());
                    state.recovering = false;
                }
                self.handlers.on_segment_appended();
                self.mark_started(content_type);
                if !clear_pending {
                    if let Err(error) = self.evict(content_type, self.playhead.time()).await {
                        return self.handle_error(content_type, error).await;
                    }
                }
                Next::Now
            }
            Err(_) if clear_pending => {
                // The result belongs to a buffer that is about to vanish.
                Next::Now
            }
            Err(error) => self.handle_error(content_type, error).await,
        }
    }

    /// The current period has no stream for this type: idle and advance
    /// periods as the presentation does, following either the playhead or
    /// the other types' progress.
    async fn tick_without_stream(
        self: &Arc<Self>,
        content_type: ContentType,
        period_index: usize,
        playhead_time: f64,
    ) -> Next {
        let last_period = period_index + 1 >= self.manifest.periods.len();
        if last_period {
            {
                self.cells[&content_type].state.lock().end_of_stream = true;
            }
            self.maybe_end_of_stream().await;
            return Next::Park;
        }

        let mut any_active = false;
        let mut others_moved_on = true;
        for (other_type, other_cell) in &self.cells {
            if *other_type == content_type {
                continue;
            }
            let state = other_cell.state.lock();
            if state.stream.is_some() {
                any_active = true;
                if state.period_index <= period_index {
                    others_moved_on = false;
                }
            }
        }

        let next_start = self.manifest.period_end_time(period_index);
        if playhead_time >= next_start || (any_active && others_moved_on) {
            return self.adopt_period(content_type, period_index + 1).await;
        }
        Next::After(IDLE_POLL)
    }

    /// The index has nothing at the target: live edge, end of period, or
    /// end of presentation.
    async fn tick_out_of_segments(
        self: &Arc<Self>,
        content_type: ContentType,
        period_index: usize,
        target: f64,
    ) -> Next {
        let last_period = period_index + 1 >= self.manifest.periods.len();
        if !last_period {
            return self.adopt_period(content_type, period_index + 1).await;
        }

        let (is_live, duration) = {
            let timeline = self.timeline.lock();
            (timeline.is_live(), timeline.duration())
        };
        if is_live && (duration.is_infinite() || target < duration - 1e-3) {
            // The packager has not produced the next segment yet.
            return Next::After(LIVE_EDGE_POLL);
        }

        debug!(content_type = %content_type, "aulos-streaming: content type exhausted");
        {
            self.cells[&content_type].state.lock().end_of_stream = true;
        }
        self.maybe_end_of_stream().await;
        Next::Park
    }

    /// The segment the loop needs next: the one after the last append, or
    /// a lookup at the target time after a clear/switch.
    fn next_reference(
        &self,
        state: &MediaState,
        stream: &Arc<Stream>,
        rel_target: f64,
    ) -> Option<SegmentReference> {
        if let (Some(last), Some(last_id)) =
            (&state.last_segment_reference, &state.last_stream_id)
        {
            if *last_id == stream.id {
                return stream.index.get(last.position + 1);
            }
        }

        let (small_gap_limit, jump_large_gaps) = {
            let config = self.config.lock();
            (config.small_gap_limit, config.jump_large_gaps)
        };

        let mut position = stream.index.find(rel_target);
        if position.is_none() {
            position = stream.index.find(rel_target + small_gap_limit);
        }
        if position.is_none() && jump_large_gaps {
            let period_length = self.manifest.period_end_time(state.period_index)
                - self.manifest.periods[state.period_index].start_time;
            let mut probe = rel_target + 1.0;
            while probe < period_length {
                if let Some(found) = stream.index.find(probe) {
                    position = Some(found);
                    break;
                }
                probe += 1.0;
            }
        }
        position.and_then(|p| stream.index.get(p))
    }

    /// Move one content type into `period_index`, choosing streams for the
    /// period if this is the first type to arrive.
    async fn adopt_period(self: &Arc<Self>, content_type: ContentType, period_index: usize) -> Next {
        let (chosen, newly_chosen) = self.ensure_period_chosen(period_index);
        if newly_chosen {
            self.spawn_period_setup(period_index);
        }
        self.current_period.fetch_max(period_index, Ordering::SeqCst);

        let stream = chosen.for_type(content_type);
        if let Some(stream) = &stream {
            if let Err(error) = stream.index.create().await {
                return self.handle_error(content_type, error.into()).await;
            }
        }

        let period_start = self.manifest.periods[period_index].start_time;
        debug!(
            content_type = %content_type,
            period_index,
            period_start,
            stream = stream.as_ref().map_or("none", |s| s.id.as_str()),
            "aulos-streaming: entering period"
        );
        {
            let mut state = self.cells[&content_type].state.lock();
            let mut adopted = stream.clone();
            // Engaged trick play rides across periods: substitute the new
            // period's trick counterpart, or drop back to normal video when
            // the period has none.
            if content_type == ContentType::Video && state.trick_play_restore.is_some() {
                match adopted.clone().and_then(|normal| {
                    normal.trick_mode_video.clone().map(|trick| (normal, trick))
                }) {
                    Some((normal, trick)) => {
                        state.trick_play_restore = Some(normal);
                        adopted = Some(trick);
                    }
                    None => state.trick_play_restore = None,
                }
            }
            state.stream = adopted;
            state.period_index = period_index;
            state.last_stream_id = None;
            state.reset_fetch_progress();
            state.resume_at = Some(period_start);
        }

        if content_type == ContentType::Text {
            if let Some(stream) = &stream {
                // Re-init the parser when the period changes the text mime.
                if self.text.mime_type().as_deref() != Some(stream.mime_type.as_str()) {
                    if let Err(error) = self.text.init_parser(&stream.mime_type) {
                        return self.handle_error(content_type, error.into()).await;
                    }
                }
                self.configure_text_for_period(period_index);
            }
        }
        Next::Now
    }

    /// The chosen streams for a period, asking the chooser exactly once.
    /// The `bool` is true when this call made the choice, in which case
    /// the caller owns kicking off `spawn_period_setup`.
    fn ensure_period_chosen(self: &Arc<Self>, period_index: usize) -> (ChosenStreams, bool) {
        let mut cache = self.chosen.lock();
        if let Some(chosen) = cache.get(&period_index) {
            return (chosen.clone(), false);
        }
        let chosen = self
            .handlers
            .on_choose_streams(period_index, &self.manifest.periods[period_index]);
        cache.insert(period_index, chosen.clone());
        (chosen, true)
    }

    /// Index every stream in the period, then announce switchability.
    fn spawn_period_setup(self: &Arc<Self>, period_index: usize) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let streams: Vec<Arc<Stream>> = inner.manifest.periods[period_index]
                .all_streams()
                .cloned()
                .collect();
            for stream in streams {
                if inner.cancel.is_cancelled() {
                    return;
                }
                if let Err(error) = stream.index.create().await {
                    warn!(
                        period_index,
                        stream = %stream.id,
                        error = %error,
                        "aulos-streaming: failed to index stream"
                    );
                    inner.handlers.on_error(&error.into());
                    return;
                }
            }
            if !inner.cancel.is_cancelled() {
                inner.handlers.on_can_switch(period_index);
            }
        });
        self.tasks.lock().push(task);
    }

    async fn fetch_and_append(
        self: &Arc<Self>,
        content_type: ContentType,
        stream: &Arc<Stream>,
        period_index: usize,
        reference: &SegmentReference,
    ) -> StreamingResult<()> {
        let period_start = self.manifest.periods[period_index].start_time;
        let retry = self.config.lock().retry.clone();

        let need_init = self.cells[&content_type].state.lock().need_init_segment;
        if need_init {
            if let Some(init) = &stream.init_segment {
                trace!(
                    content_type = %content_type,
                    stream = %stream.id,
                    "aulos-streaming: fetching init segment"
                );
                let request = make_request(&init.uris, init.byte_range, retry.clone());
                let response = self
                    .net
                    .request(RequestKind::Segment, request)
                    .await
                    .map_err(|source| StreamingError::Network {
                        content_type,
                        source,
                    })?;
                if self.cancel.is_cancelled() {
                    return Err(StreamingError::Destroyed);
                }
                match content_type {
                    ContentType::Text => {
                        self.text.append_buffer(&response.data, None, None).await?;
                    }
                    _ => {
                        self.sink
                            .append_buffer(content_type, response.data, None, None)
                            .await?;
                    }
                }
            }
            self.cells[&content_type].state.lock().need_init_segment = false;
        }

        let request = make_request(&reference.uris, reference.byte_range, retry);
        let response = self
            .net
            .request(RequestKind::Segment, request)
            .await
            .map_err(|source| StreamingError::Network {
                content_type,
                source,
            })?;
        if self.cancel.is_cancelled() {
            return Err(StreamingError::Destroyed);
        }

        let start_time = period_start + reference.start_time;
        let end_time = period_start + reference.end_time;

        if stream.contains_emsg_boxes {
            for emsg in parse_emsg_boxes(&response.data) {
                if emsg.is_manifest_update() {
                    debug!("aulos-streaming: emsg requested a manifest update");
                    self.handlers.on_manifest_update();
                } else {
                    self.handlers
                        .on_event(StreamEvent::from_emsg(&emsg, start_time));
                }
            }
        }

        trace!(
            content_type = %content_type,
            position = reference.position,
            start_time,
            end_time,
            bytes = response.data.len(),
            "aulos-streaming: appending segment"
        );
        match content_type {
            ContentType::Text => {
                self.text
                    .append_buffer(
                        &response.data,
                        Some(reference.start_time),
                        Some(reference.end_time),
                    )
                    .await?;
            }
            _ => {
                self.sink
                    .append_buffer(content_type, response.data, Some(start_time), Some(end_time))
                    .await?;
            }
        }
        Ok(())
    }

    /// Trim the buffer behind the playhead down to `buffer_behind`.
    async fn evict(
        self: &Arc<Self>,
        content_type: ContentType,
        playhead_time: f64,
    ) -> StreamingResult<()> {
        let behind = self.config.lock().buffer_behind;
        let evict_end = playhead_time - behind;
        if evict_end <= 0.0 {
            return Ok(());
        }
        let keep = self
            .buffer_start(content_type)
            .is_none_or(|start| start >= evict_end);
        if keep {
            return Ok(());
        }
        debug!(
            content_type = %content_type,
            evict_end,
            "aulos-streaming: evicting buffered data behind the playhead"
        );
        match content_type {
            ContentType::Text => self.text.remove(0.0, evict_end).await?,
            _ => self.sink.remove(content_type, 0.0, evict_end).await?,
        }
        Ok(())
    }

    async fn clear_buffer_now(self: &Arc<Self>, content_type: ContentType) -> StreamingResult<()> {
        debug!(content_type = %content_type, "aulos-streaming: clearing buffer");
        match content_type {
            ContentType::Text => {
                self.text.remove(f64::NEG_INFINITY, f64::INFINITY).await?;
            }
            _ => self.sink.clear(content_type).await?,
        }
        Ok(())
    }

    async fn handle_error(
        self: &Arc<Self>,
        content_type: ContentType,
        error: StreamingError,
    ) -> Next {
        if matches!(error, StreamingError::Destroyed) || self.cancel.is_cancelled() {
            return Next::Park;
        }
        let cell = &self.cells[&content_type];

        if matches!(error, StreamingError::QuotaExceeded(_)) {
            let already_recovering = {
                let mut state = cell.state.lock();
                let already = state.recovering;
                state.recovering = true;
                already
            };
            if !already_recovering {
                warn!(
                    content_type = %content_type,
                    "aulos-streaming: sink quota exceeded, evicting tail and retrying"
                );
                let playhead_time = self.playhead.time();
                let behind = self.config.lock().buffer_behind;
                let evict_end = playhead_time - behind / 2.0;
                if evict_end > 0.0 {
                    let evicted: StreamingResult<()> = match content_type {
                        ContentType::Text => {
                            self.text.remove(0.0, evict_end).await.map_err(Into::into)
                        }
                        _ => self
                            .sink
                            .remove(content_type, 0.0, evict_end)
                            .await
                            .map_err(Into::into),
                    };
                    if let Err(evict_error) = evicted {
                        warn!(
                            error = %evict_error,
                            "aulos-streaming: quota recovery eviction failed"
                        );
                    }
                }
                return Next::After(Duration::from_secs(1));
            }
            // Second strike without progress: this type is stuck. Fatal
            // only when every active type is.
            cell.state.lock().has_error = true;
            let all_stuck = self.cells.values().all(|c| {
                let state = c.state.lock();
                state.stream.is_none() || state.has_error
            });
            if all_stuck {
                self.handlers.on_error(&error);
            }
            return Next::Park;
        }

        let (ignore_text, infinite_live) = {
            let config = self.config.lock();
            (
                config.ignore_text_stream_failures,
                config.infinite_retries_for_live_streams,
            )
        };

        if content_type == ContentType::Text && ignore_text {
            warn!(
                error = %error,
                "aulos-streaming: text stream failed, disabling text"
            );
            {
                let mut state = cell.state.lock();
                state.stream = None;
                state.has_error = false;
                state.disabled = true;
            }
            // A disabled type no longer gates end-of-stream; the others
            // may already be done.
            self.maybe_end_of_stream().await;
            return Next::Park;
        }

        if let StreamingError::Network { .. } = &error {
            let callback = self.config.lock().failure_callback.clone();
            if let Some(callback) = callback {
                callback(&error);
            }
        }

        if error.is_recoverable() {
            let is_live = self.timeline.lock().is_live();
            self.handlers.on_error(&error);
            if is_live && infinite_live {
                warn!(
                    content_type = %content_type,
                    error = %error,
                    "aulos-streaming: recoverable live failure, will retry"
                );
                return Next::After(LIVE_RETRY_DELAY);
            }
            cell.state.lock().has_error = true;
            return Next::Park;
        }

        warn!(content_type = %content_type, error = %error, "aulos-streaming: critical failure");
        self.handlers.on_error(&error);
        cell.state.lock().has_error = true;
        Next::Park
    }

    /// Call the sink's end-of-stream exactly once, after every type has
    /// exhausted the final period.
    async fn maybe_end_of_stream(self: &Arc<Self>) {
        let all_ended = self.cells.values().all(|c| {
            let state = c.state.lock();
            state.end_of_stream || state.disabled
        });
        if !all_ended {
            return;
        }
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("aulos-streaming: all content types exhausted, ending stream");
        if let Err(error) = self.sink.end_of_stream().await {
            self.handlers.on_error(&error.into());
        }
    }

    /// Track first media appends until every active type has one, then
    /// declare startup complete.
    fn mark_started(&self, content_type: ContentType) {
        if self.startup_fired.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut started = self.started_types.lock();
            if !started.contains(&content_type) {
                started.push(content_type);
            }
            for (ct, cell) in &self.cells {
                if !started.contains(ct) && cell.state.lock().stream.is_some() {
                    return;
                }
            }
        }
        if !self.startup_fired.swap(true, Ordering::SeqCst) {
            debug!("aulos-streaming: startup complete");
            self.handlers.on_startup_complete();
        }
    }

    fn configure_text_for_period(&self, period_index: usize) {
        let period_start = self.manifest.periods[period_index].start_time;
        self.text.set_timestamp_offset(period_start);
        self.text
            .set_append_window_end(self.manifest.period_end_time(period_index));
    }

    fn buffer_start(&self, content_type: ContentType) -> Option<f64> {
        match content_type {
            ContentType::Text => self.text.buffer_start(),
            _ => self.sink.buffer_start(content_type),
        }
    }

    fn buffer_end(&self, content_type: ContentType) -> Option<f64> {
        match content_type {
            ContentType::Text => self.text.buffer_end(),
            _ => self.sink.buffer_end(content_type),
        }
    }

    fn is_buffered(&self, content_type: ContentType, time: f64) -> bool {
        match content_type {
            ContentType::Text => self.text.buffered_ahead_of(time) > 0.0,
            _ => self.sink.is_buffered(content_type, time),
        }
    }
}

impl ChosenStreams {
    pub(crate) fn for_type(&self, content_type: ContentType) -> Option<Arc<Stream>> {
        match content_type {
            ContentType::Audio => self.audio.clone(),
            ContentType::Video => self.video.clone(),
            ContentType::Text => self.text.clone(),
        }
    }
}

fn full_mime_type(stream: &Stream) -> String {
    match &stream.codecs {
        Some(codecs) => format!("{}; codecs=\"{}\"", stream.mime_type, codecs),
        None => stream.mime_type.clone(),
    }
}

fn make_request(uris: &[String], byte_range: Option<(u64, Option<u64>)>, retry: aulos_net::RetryPolicy) -> Request {
    let mut request = Request::new(uris.to_vec()).with_retry(retry);
    if let Some((start, end)) = byte_range {
        request = request.with_byte_range(RangeSpec::new(start, end));
    }
    request
}
