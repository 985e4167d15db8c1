//! Render-side playback driver.
//!
//! [`Playback`] runs on the render thread. Each tick it pulls decoded frames
//! from the [`AsyncDecodeQueue`] into a small staging deque, asks the
//! [`PlaybackClock`] whether the oldest one is due and, if so, hands it to the
//! [`FrameUploader`] through the frames-in-flight ring.

use std::collections::VecDeque;
use std::time::Instant;

use crate::backend::VideoDecoderBackend;
use crate::clock::PlaybackClock;
use crate::frame_queue::AsyncDecodeQueue;
use crate::pixel_format::PixelFormatPlan;
use crate::upload::{present_frame, FrameRing, FrameUploader, DEFAULT_FRAMES_IN_FLIGHT};
use crate::video::{DecodedFrame, VideoError};

/// Default size of the staging deque.
pub const DEFAULT_PENDING_FRAMES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Frames pulled from the queue ahead of display
    pub pending_frames: usize,
    pub frames_in_flight: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pending_frames: DEFAULT_PENDING_FRAMES,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
        }
    }
}

pub struct Playback<B: VideoDecoderBackend + 'static, U: FrameUploader> {
    queue: AsyncDecodeQueue<B>,
    uploader: U,
    clock: PlaybackClock,
    pending: VecDeque<DecodedFrame>,
    pending_limit: usize,
    ring: FrameRing,
    current_plan: Option<PixelFormatPlan>,
    playing: bool,
}

impl<B: VideoDecoderBackend + 'static, U: FrameUploader> Playback<B, U> {
    pub fn new(queue: AsyncDecodeQueue<B>, uploader: U, config: PlaybackConfig) -> Self {
        let clock = PlaybackClock::new(queue.stream_info().effective_frame_rate());
        let pending_limit = config.pending_frames.max(1);
        Self {
            queue,
            uploader,
            clock,
            pending: VecDeque::with_capacity(pending_limit),
            pending_limit,
            ring: FrameRing::new(config.frames_in_flight),
            current_plan: None,
            playing: false,
        }
    }

    /// Shows a mid-gray frame and starts the decode thread.
    ///
    /// Playback stays paused until [`play`](Self::play).
    pub fn start(&mut self, max_buffered_frames: usize) -> Result<(), VideoError> {
        let neutral = DecodedFrame::neutral(self.queue.initial_plan());
        present_frame(&mut self.uploader, &mut self.ring, &mut self.current_plan, &neutral)?;
        self.queue.start(max_buffered_frames)
    }

    /// Stops decoding and drops staged frames.
    pub fn stop(&mut self) {
        self.playing = false;
        self.queue.stop();
        self.pending.clear();
    }

    pub fn play(&mut self) {
        if !self.playing {
            // pause time must not count as frame time
            self.clock.invalidate();
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Moves decoded frames into the staging deque until it is full.
    pub fn pump(&mut self) {
        while self.pending.len() < self.pending_limit {
            match self.queue.try_acquire_frame() {
                Some(frame) => self.pending.push_back(frame),
                None => break,
            }
        }
    }

    /// Advances playback to `now`, uploading the next frame if it is due.
    ///
    /// Returns the position to report, in seconds.
    pub fn advance_playback(&mut self, now: Instant) -> Result<f64, VideoError> {
        self.pump();

        if !self.playing {
            return Ok(self.clock.displayed_seconds());
        }
        let Some(next_pts) = self.pending.front().map(|frame| frame.pts_seconds) else {
            return Ok(self.clock.displayed_seconds());
        };

        let decision = self.clock.advance(now, next_pts);
        if decision.should_display {
            if let Some(frame) = self.pending.pop_front() {
                let slot = present_frame(&mut self.uploader, &mut self.ring, &mut self.current_plan, &frame)?;
                tracing::trace!("Presented frame {:.3}s in slot {slot}", frame.pts_seconds);
            }
        }
        Ok(decision.display_seconds)
    }

    /// Seeks and re-anchors the clock on the target.
    ///
    /// Returns the clamped target. On failure staged frames and the clock
    /// are left untouched.
    pub fn seek(&mut self, target_seconds: f64) -> Result<f64, VideoError> {
        let target = self.queue.seek(target_seconds)?;
        self.pending.clear();
        self.clock.reset_for_seek(target);
        Ok(target)
    }

    /// Position of the last displayed frame.
    pub fn position(&self) -> f64 {
        self.clock.displayed_seconds()
    }

    /// Nothing left to decode or display.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.queue.is_exhausted()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queue(&self) -> &AsyncDecodeQueue<B> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut AsyncDecodeQueue<B> {
        &mut self.queue
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }
}
