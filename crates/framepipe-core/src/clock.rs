//! Playback clock.
//!
//! Maps decoded PTS values onto wall-clock display decisions. The render
//! thread calls [`PlaybackClock::advance`] once per tick with the next pending
//! frame; the clock says whether that frame is due and which position to
//! report. Positions stay continuous across seeks: after a seek the clock is
//! re-anchored so the first frame reports the seek target rather than jumping
//! back to the pre-seek position or to zero.

use std::time::{Duration, Instant};

/// Slack allowed when deciding whether a frame is due.
const DISPLAY_TOLERANCE: Duration = Duration::from_millis(1);

/// Deltas below this are treated as missing.
const MIN_FRAME_DELTA: f64 = 1e-6;

/// Minimum frame rate used for the default cadence.
const MIN_CADENCE_FPS: f64 = 30.0;

/// Result of [`PlaybackClock::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockDecision {
    /// Position to report, in seconds
    pub display_seconds: f64,
    /// The frame passed to `advance` should be shown now
    pub should_display: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    base_pts_seconds: f64,
    last_frame_pts_seconds: f64,
    last_displayed_seconds: f64,
    last_frame_render_time: Option<Instant>,
    initialized: bool,
    frame_rate: f64,
}

impl PlaybackClock {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            base_pts_seconds: 0.0,
            last_frame_pts_seconds: 0.0,
            last_displayed_seconds: 0.0,
            last_frame_render_time: None,
            initialized: false,
            frame_rate,
        }
    }

    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        self.frame_rate = frame_rate;
    }

    /// Decides whether a frame with PTS `next_pts` is due at `now`.
    ///
    /// When it is, the clock commits to it: the caller must display that frame.
    pub fn advance(&mut self, now: Instant, next_pts: f64) -> ClockDecision {
        if !self.initialized {
            self.initialized = true;
            self.base_pts_seconds = next_pts - self.last_displayed_seconds;
            self.last_frame_pts_seconds = next_pts;
            self.last_frame_render_time = Some(now);
            tracing::debug!(
                "Playback clock anchored: pts {next_pts:.3}s displays as {:.3}s",
                self.last_displayed_seconds
            );
        }

        let mut delta = next_pts - self.last_frame_pts_seconds;
        if delta < MIN_FRAME_DELTA {
            delta = 1.0 / self.frame_rate.max(MIN_CADENCE_FPS);
        }

        // a delta too large to represent makes the frame due now
        let due_at = self
            .last_frame_render_time
            .and_then(|rendered| rendered.checked_add(Duration::try_from_secs_f64(delta).ok()?))
            .unwrap_or(now);
        if now.checked_add(DISPLAY_TOLERANCE).is_some_and(|deadline| deadline < due_at) {
            return ClockDecision {
                display_seconds: self.last_displayed_seconds,
                should_display: false,
            };
        }

        self.last_frame_pts_seconds = next_pts;
        self.last_frame_render_time = Some(now);
        self.last_displayed_seconds = (next_pts - self.base_pts_seconds).max(0.0);
        ClockDecision {
            display_seconds: self.last_displayed_seconds,
            should_display: true,
        }
    }

    /// Re-anchors on the next frame, reporting `target_seconds` until then.
    pub fn reset_for_seek(&mut self, target_seconds: f64) {
        self.last_displayed_seconds = target_seconds.max(0.0);
        self.initialized = false;
    }

    /// Re-anchors on the next frame without moving the reported position.
    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Position of the last displayed frame.
    pub fn displayed_seconds(&self) -> f64 {
        self.last_displayed_seconds
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(MIN_CADENCE_FPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_frame_waits_one_default_interval() {
        let mut clock = PlaybackClock::new(30.0);
        let t0 = Instant::now();
        let decision = clock.advance(t0, 0.0);
        assert!(!decision.should_display);
        assert_eq!(decision.display_seconds, 0.0);

        let decision = clock.advance(t0 + ms(34), 0.0);
        assert!(decision.should_display);
        assert_eq!(decision.display_seconds, 0.0);
    }

    #[test]
    fn test_frames_are_paced_by_pts_delta() {
        let mut clock = PlaybackClock::new(30.0);
        let t0 = Instant::now();
        clock.advance(t0, 0.0);
        assert!(clock.advance(t0 + ms(40), 0.0).should_display);

        let t1 = t0 + ms(40);
        // next frame is 100ms later in stream time
        assert!(!clock.advance(t1 + ms(50), 0.1).should_display);
        assert!(!clock.advance(t1 + ms(98), 0.1).should_display);
        let decision = clock.advance(t1 + ms(99), 0.1);
        assert!(decision.should_display);
        assert!((decision.display_seconds - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_non_increasing_pts_uses_default_cadence() {
        let mut clock = PlaybackClock::new(24.0);
        let t0 = Instant::now();
        clock.advance(t0, 1.0);
        assert!(clock.advance(t0 + ms(34), 1.0).should_display);
        let t1 = t0 + ms(34);
        // backwards PTS: paced at 1/30s rather than stalling
        assert!(!clock.advance(t1 + ms(10), 0.5).should_display);
        let decision = clock.advance(t1 + ms(34), 0.5);
        assert!(decision.should_display);
        assert_eq!(decision.display_seconds, 0.0);
    }

    #[test]
    fn test_unrepresentable_delta_is_due_now() {
        let mut clock = PlaybackClock::new(30.0);
        let t0 = Instant::now();
        clock.advance(t0, 0.0);
        assert!(clock.advance(t0 + ms(40), 0.0).should_display);

        let decision = clock.advance(t0 + ms(41), 1e300);
        assert!(decision.should_display);
        assert!(clock.advance(t0 + ms(42), f64::INFINITY).should_display);
        assert!(clock.advance(t0 + ms(43), f64::NAN).should_display);
    }

    #[test]
    fn test_display_clamped_non_negative() {
        let mut clock = PlaybackClock::new(30.0);
        let t0 = Instant::now();
        clock.advance(t0, 5.0);
        clock.advance(t0 + ms(40), 5.0);
        let decision = clock.advance(t0 + ms(200), 4.0);
        assert!(decision.display_seconds >= 0.0);
    }

    #[test]
    fn test_seek_continuity() {
        let mut clock = PlaybackClock::new(30.0);
        let mut now = Instant::now();
        let mut pts = 0.0;
        clock.advance(now, pts);
        while clock.displayed_seconds() < 5.0 {
            now += ms(34);
            if clock.advance(now, pts).should_display {
                pts += 1.0 / 30.0;
            }
        }
        assert!(clock.displayed_seconds() >= 5.0);

        clock.reset_for_seek(12.0);
        assert!(!clock.is_initialized());
        assert_eq!(clock.displayed_seconds(), 12.0);

        let mut previous = clock.displayed_seconds();
        let mut frame_pts = 12.0;
        let mut shown = Vec::new();
        for _ in 0..60 {
            now += ms(34);
            let decision = clock.advance(now, frame_pts);
            assert!(decision.display_seconds >= previous);
            assert!(decision.display_seconds >= 12.0);
            previous = decision.display_seconds;
            if decision.should_display {
                shown.push(decision.display_seconds);
                frame_pts += 1.0 / 30.0;
            }
        }
        assert_eq!(shown.first().copied(), Some(12.0));
        assert!(shown.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_invalidate_keeps_position() {
        let mut clock = PlaybackClock::new(30.0);
        let t0 = Instant::now();
        clock.advance(t0, 3.0);
        clock.advance(t0 + ms(40), 3.0);
        assert_eq!(clock.displayed_seconds(), 0.0);
        clock.invalidate();
        clock.advance(t0 + ms(50), 7.0);
        let decision = clock.advance(t0 + ms(90), 7.0);
        assert!(decision.should_display);
        assert_eq!(decision.display_seconds, 0.0);
    }
}
