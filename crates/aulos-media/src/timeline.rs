#![forbid(unsafe_code)]

//! Presentation timeline and live availability window.

/// The presentation's time extent and, for live content, the sliding
/// availability window.
///
/// All times are seconds on the presentation timeline. For live content the
/// caller supplies `now` (the presentation time at the live edge), so the
/// window can be evaluated against either a wall clock or a simulated one.
#[derive(Clone, Debug)]
pub struct PresentationTimeline {
    duration: f64,
    is_live: bool,
    /// Window length behind the live edge; `f64::INFINITY` means segments
    /// never expire (event-style live).
    availability_duration: f64,
    /// Largest segment duration seen; the live edge is pulled back by this
    /// much so only fully-produced segments are requested.
    max_segment_duration: f64,
}

impl PresentationTimeline {
    /// Static on-demand timeline: everything in `[0, duration]` is available.
    #[must_use]
    pub fn vod(duration: f64) -> Self {
        Self {
            duration,
            is_live: false,
            availability_duration: f64::INFINITY,
            max_segment_duration: 0.0,
        }
    }

    /// Live timeline with a sliding window of `availability_duration`
    /// seconds. `duration` may be `f64::INFINITY` while the broadcast is
    /// open-ended.
    #[must_use]
    pub fn live(duration: f64, availability_duration: f64) -> Self {
        Self {
            duration,
            is_live: true,
            availability_duration,
            max_segment_duration: 0.0,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_live
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Manifest updates may extend or finalize the duration.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }

    pub fn set_availability_duration(&mut self, availability_duration: f64) {
        self.availability_duration = availability_duration;
    }

    pub fn notify_max_segment_duration(&mut self, duration: f64) {
        if duration > self.max_segment_duration {
            self.max_segment_duration = duration;
        }
    }

    #[must_use]
    pub fn max_segment_duration(&self) -> f64 {
        self.max_segment_duration
    }

    /// Earliest presentation time that may still be requested at `now`.
    #[must_use]
    pub fn availability_start(&self, now: f64) -> f64 {
        if !self.is_live {
            return 0.0;
        }
        let end = self.availability_end(now);
        if self.availability_duration.is_infinite() {
            0.0
        } else {
            (end - self.availability_duration).max(0.0)
        }
    }

    /// Latest presentation time that may be requested at `now`.
    ///
    /// The live edge is pulled back by the largest known segment duration so
    /// we never ask for a segment the packager is still writing.
    #[must_use]
    pub fn availability_end(&self, now: f64) -> f64 {
        if !self.is_live {
            return self.duration;
        }
        (now - self.max_segment_duration).clamp(0.0, self.duration)
    }

    /// The `[start, end]` window at `now`.
    #[must_use]
    pub fn availability_window(&self, now: f64) -> (f64, f64) {
        (self.availability_start(now), self.availability_end(now))
    }
}
