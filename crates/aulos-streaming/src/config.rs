#![forbid(unsafe_code)]

use std::sync::Arc;

use aulos_net::RetryPolicy;

use crate::error::StreamingError;

/// Hook consulted before a network error is surfaced, so a player can
/// react (e.g. rotate CDNs) without subscribing to the full error stream.
pub type FailureCallback = Arc<dyn Fn(&StreamingError) + Send + Sync>;

/// Streaming engine tuning. Hot-swappable via
/// [`StreamingEngine::configure`](crate::StreamingEngine::configure).
#[derive(Clone)]
pub struct StreamingConfig {
    /// Target seconds of buffer ahead of the playhead, per content type.
    pub buffering_goal: f64,
    /// Minimum seconds of buffer before startup counts as complete; also a
    /// floor under `buffering_goal`.
    pub rebuffering_goal: f64,
    /// Maximum seconds of buffer retained behind the playhead.
    pub buffer_behind: f64,
    /// Retry policy handed to the network engine with every request.
    pub retry: RetryPolicy,
    /// Keep rescheduling recoverable network errors forever on live
    /// content instead of stopping the content type.
    pub infinite_retries_for_live_streams: bool,
    /// Log-and-disable text failures instead of surfacing them.
    pub ignore_text_stream_failures: bool,
    /// Snap the startup position to the containing segment's start.
    pub start_at_segment_boundary: bool,
    /// Gaps up to this long between a lookup time and the next segment are
    /// stepped over silently.
    pub small_gap_limit: f64,
    /// Whether gaps longer than `small_gap_limit` are stepped over too.
    pub jump_large_gaps: bool,
    pub failure_callback: Option<FailureCallback>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffering_goal: 10.0,
            rebuffering_goal: 2.0,
            buffer_behind: 30.0,
            retry: RetryPolicy::default(),
            infinite_retries_for_live_streams: false,
            ignore_text_stream_failures: false,
            start_at_segment_boundary: false,
            small_gap_limit: 0.5,
            jump_large_gaps: false,
            failure_callback: None,
        }
    }
}

impl std::fmt::Debug for StreamingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingConfig")
            .field("buffering_goal", &self.buffering_goal)
            .field("rebuffering_goal", &self.rebuffering_goal)
            .field("buffer_behind", &self.buffer_behind)
            .field(
                "infinite_retries_for_live_streams",
                &self.infinite_retries_for_live_streams,
            )
            .field("ignore_text_stream_failures", &self.ignore_text_stream_failures)
            .field("start_at_segment_boundary", &self.start_at_segment_boundary)
            .field("small_gap_limit", &self.small_gap_limit)
            .field("jump_large_gaps", &self.jump_large_gaps)
            .field("failure_callback", &self.failure_callback.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamingConfig {
    /// The buffer level each loop actually aims for.
    #[must_use]
    pub(crate) fn effective_buffering_goal(&self) -> f64 {
        self.buffering_goal.max(self.rebuffering_goal)
    }
}
