//! Frame queue for video playback.
//!
//! This module provides the bounded queue between the decode thread and the
//! render thread. The decode thread owns the [`FrameDecoder`] while it runs
//! and pushes frames into the queue, blocking when it is full; the render
//! thread pops frames without ever blocking.
//!
//! State is split three ways:
//! - decode-thread owned: the decoder, its pixel-format plan and timestamps
//!   (behind a mutex the decode thread holds for its whole lifetime, so the
//!   owner thread only reaches it after joining);
//! - owner-thread owned: the join handle and the stream metadata snapshot;
//! - shared: the frame deque with its condition variable, and the atomic
//!   flags and seek target in [`Shared`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::backend::VideoDecoderBackend;
use crate::decoder::{DecoderState, FrameDecoder};
use crate::pixel_format::PixelFormatPlan;
use crate::video::{CancelToken, DecodedFrame, StreamInfo, VideoError};

/// Seek target value meaning no seek is in progress.
pub(crate) const NO_SEEK_TARGET: i64 = -1;

/// Counters describing decode thread activity since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames produced by the decoder
    pub frames_decoded: u64,
    /// Frames dropped because they precede the active seek target
    pub frames_discarded: u64,
    /// Times the producer found the queue full and had to wait
    pub producer_waits: u64,
}

/// State shared between the owner thread and the decode thread.
pub(crate) struct Shared {
    /// Decoded frames ready for display, oldest first
    pub(crate) frames: Mutex<VecDeque<DecodedFrame>>,
    /// Signalled when the consumer frees a slot or a stop is requested
    pub(crate) space_available: Condvar,
    pub(crate) capacity: AtomicUsize,
    pub(crate) thread_running: AtomicBool,
    /// Decoder reported end of stream
    pub(crate) finished: AtomicBool,
    /// Decoder is flushing its last frames
    pub(crate) draining: AtomicBool,
    /// Frames below this PTS (microseconds) are dropped; -1 = inactive
    pub(crate) seek_target_us: AtomicI64,
    frames_decoded: AtomicU64,
    frames_discarded: AtomicU64,
    producer_waits: AtomicU64,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            space_available: Condvar::new(),
            capacity: AtomicUsize::new(capacity),
            thread_running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            seek_target_us: AtomicI64::new(NO_SEEK_TARGET),
            frames_decoded: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            producer_waits: AtomicU64::new(0),
        }
    }

    /// Applies the seek-discard rule, clearing the target once it is reached.
    fn admit(&self, pts_us: i64) -> bool {
        let target = self.seek_target_us.load(Ordering::Acquire);
        if target < 0 {
            return true;
        }
        if pts_us < target {
            return false;
        }
        // A concurrent seek may have installed a newer target; leave that one alone.
        let _ = self.seek_target_us.compare_exchange(
            target,
            NO_SEEK_TARGET,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        true
    }
}

/// A bounded queue of decoded frames filled by a dedicated decode thread.
///
/// ```no_run
/// use framepipe_core::synthetic::{SyntheticBackend, SyntheticConfig};
/// use framepipe_core::{AsyncDecodeQueue, CancelToken, DecoderConfig, FrameDecoder};
///
/// let config = DecoderConfig::default().with_max_buffered_frames(4);
/// let backend = SyntheticBackend::new(SyntheticConfig::default());
/// let decoder = FrameDecoder::new(backend, &config)?;
/// let mut queue = AsyncDecodeQueue::new(decoder, CancelToken::new());
/// queue.start(config.max_buffered_frames)?;
/// while let Some(frame) = queue.try_acquire_frame() {
///     println!("frame at {:.3}s", frame.pts_seconds);
/// }
/// queue.stop();
/// # Ok::<(), framepipe_core::VideoError>(())
/// ```
pub struct AsyncDecodeQueue<B: VideoDecoderBackend + 'static> {
    pub(crate) decoder: Arc<Mutex<FrameDecoder<B>>>,
    pub(crate) shared: Arc<Shared>,
    /// Stop flag, also polled by the backend's blocking reads
    pub(crate) stop: CancelToken,
    /// Present from `start` until `stop`, even if the thread already exited
    pub(crate) handle: Option<JoinHandle<()>>,
    pub(crate) info: StreamInfo,
    initial_plan: PixelFormatPlan,
}

impl<B: VideoDecoderBackend + 'static> AsyncDecodeQueue<B> {
    /// Creates a stopped queue around `decoder`.
    ///
    /// `stop` must be the token the backend's blocking I/O polls, so that
    /// [`stop`](Self::stop) can interrupt a read in progress.
    pub fn new(decoder: FrameDecoder<B>, stop: CancelToken) -> Self {
        let info = decoder.stream_info().clone();
        let initial_plan = *decoder.plan();
        Self {
            decoder: Arc::new(Mutex::new(decoder)),
            shared: Arc::new(Shared::new(crate::video::DEFAULT_MAX_BUFFERED_FRAMES)),
            stop,
            handle: None,
            info,
            initial_plan,
        }
    }

    /// Spawns the decode thread.
    ///
    /// Returns immediately if a thread is already running. Any stale queued
    /// frames are discarded first. On spawn failure the queue stays stopped
    /// and `start` may be retried.
    pub fn start(&mut self, max_buffered_frames: usize) -> Result<(), VideoError> {
        if self.handle.is_some() && self.shared.thread_running.load(Ordering::Acquire) {
            return Ok(());
        }
        // A thread that ended on its own still has to be reaped.
        self.join_decode_thread();

        let capacity = max_buffered_frames.max(1);
        self.stop.reset();
        self.shared.frames.lock().clear();
        self.shared.capacity.store(capacity, Ordering::Release);
        self.shared.thread_running.store(true, Ordering::Release);

        let decoder = Arc::clone(&self.decoder);
        let shared = Arc::clone(&self.shared);
        let stop = self.stop.clone();
        let spawned = thread::Builder::new()
            .name("framepipe-decode".to_string())
            .spawn(move || decode_loop(decoder, shared, stop));

        match spawned {
            Ok(handle) => {
                tracing::info!("Decode thread started (capacity {capacity})");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.thread_running.store(false, Ordering::Release);
                tracing::error!("Failed to spawn decode thread: {e}");
                Err(VideoError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Stops and joins the decode thread and discards queued frames.
    ///
    /// A no-op if the queue was never started; safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        {
            // Set under the lock so a producer about to wait cannot miss the wakeup.
            let _frames = self.shared.frames.lock();
            self.stop.cancel();
            self.shared.space_available.notify_all();
        }
        self.join_decode_thread();
        self.shared.frames.lock().clear();
        tracing::info!("Decode thread stopped");
    }

    fn join_decode_thread(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Decode thread panicked");
            }
        }
        self.shared.thread_running.store(false, Ordering::Release);
    }

    /// Takes the oldest decoded frame, if any, without blocking.
    pub fn try_acquire_frame(&self) -> Option<DecodedFrame> {
        let mut frames = self.shared.frames.lock();
        let frame = frames.pop_front();
        if frame.is_some() {
            self.shared.space_available.notify_one();
        }
        frame
    }

    /// True while the decode thread is alive.
    pub fn is_running(&self) -> bool {
        self.shared.thread_running.load(Ordering::Acquire)
    }

    /// True once `start` has been called and `stop` has not.
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Decoder reached end of stream.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.shared.draining.load(Ordering::Acquire)
    }

    /// Playback has nothing left to deliver.
    pub fn is_exhausted(&self) -> bool {
        self.is_finished() && !self.is_running() && self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Acquire)
    }

    /// Active seek target in microseconds.
    pub fn seek_target_us(&self) -> Option<i64> {
        let target = self.shared.seek_target_us.load(Ordering::Acquire);
        (target >= 0).then_some(target)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            frames_discarded: self.shared.frames_discarded.load(Ordering::Relaxed),
            producer_waits: self.shared.producer_waits.load(Ordering::Relaxed),
        }
    }

    /// Metadata of the stream being decoded.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// Output layout planned when the decoder was opened.
    pub fn initial_plan(&self) -> PixelFormatPlan {
        self.initial_plan
    }

    /// Runs `f` on the decoder, stopping the decode thread first if needed.
    ///
    /// The thread is restarted afterwards if it was started before.
    pub fn with_decoder<R>(&mut self, f: impl FnOnce(&mut FrameDecoder<B>) -> R) -> Result<R, VideoError> {
        let was_started = self.is_started();
        let capacity = self.capacity();
        self.stop();
        let result = f(&mut self.decoder.lock());
        if was_started {
            self.start(capacity)?;
        }
        Ok(result)
    }
}

impl<B: VideoDecoderBackend + 'static> Drop for AsyncDecodeQueue<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Producer loop run on the decode thread.
fn decode_loop<B: VideoDecoderBackend>(decoder: Arc<Mutex<FrameDecoder<B>>>, shared: Arc<Shared>, stop: CancelToken) {
    let mut decoder = decoder.lock();
    tracing::debug!("Decode loop entered");

    while !stop.is_cancelled() {
        let result = decoder.decode_next_frame(&stop);
        shared
            .draining
            .store(decoder.state() == DecoderState::Draining, Ordering::Release);

        let frame = match result {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                shared.finished.store(true, Ordering::Release);
                tracing::debug!("Decode loop reached end of stream");
                break;
            }
            Err(VideoError::Interrupted) => {
                tracing::debug!("Decode loop interrupted");
                break;
            }
            Err(e) => {
                tracing::error!("Decode loop stopping: {e}");
                break;
            }
        };
        shared.frames_decoded.fetch_add(1, Ordering::Relaxed);

        let pts_us = frame.pts_micros();
        if !shared.admit(pts_us) {
            shared.frames_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Discarding frame at {pts_us}us before seek target");
            continue;
        }

        let mut frames = shared.frames.lock();
        let capacity = shared.capacity.load(Ordering::Acquire);
        if frames.len() >= capacity && !stop.is_cancelled() {
            shared.producer_waits.fetch_add(1, Ordering::Relaxed);
        }
        while frames.len() >= capacity && !stop.is_cancelled() {
            shared.space_available.wait(&mut frames);
        }
        if stop.is_cancelled() {
            break;
        }
        frames.push_back(frame);
    }

    shared.thread_running.store(false, Ordering::Release);
    tracing::debug!("Decode loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticBackend, SyntheticConfig};
    use crate::video::DecoderConfig;
    use std::time::{Duration, Instant};

    fn make_queue(config: SyntheticConfig) -> AsyncDecodeQueue<SyntheticBackend> {
        let Ok(decoder) = FrameDecoder::new(SyntheticBackend::new(config), &DecoderConfig::default()) else {
            panic!("decoder should open");
        };
        AsyncDecodeQueue::new(decoder, CancelToken::new())
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut queue = make_queue(SyntheticConfig::default());
        queue.stop();
        queue.stop();
        assert!(!queue.is_running());
        assert!(!queue.is_started());
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let mut queue = make_queue(SyntheticConfig::default().with_frame_count(40));
        assert!(queue.start(3).is_ok());

        assert!(wait_until(Duration::from_secs(5), || queue.len() == 3));
        assert!(wait_until(Duration::from_secs(5), || queue.stats().producer_waits >= 1));
        assert_eq!(queue.len(), 3);

        let mut received = 0;
        while received < 40 {
            assert!(queue.len() <= 3);
            match queue.try_acquire_frame() {
                Some(_) => received += 1,
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
        assert!(wait_until(Duration::from_secs(5), || queue.is_exhausted()));
        queue.stop();
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut queue = make_queue(SyntheticConfig::default().with_frame_count(100));
        assert!(queue.start(2).is_ok());
        assert!(queue.start(8).is_ok());
        assert_eq!(queue.capacity(), 2);
        queue.stop();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stop_wakes_blocked_producer() {
        let mut queue = make_queue(SyntheticConfig::default().with_frame_count(100));
        assert!(queue.start(1).is_ok());
        assert!(wait_until(Duration::from_secs(5), || queue.stats().producer_waits >= 1));
        queue.stop();
        assert!(!queue.is_running());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_interrupts_blocking_read() {
        let mut queue = make_queue(
            SyntheticConfig::default()
                .with_frame_count(5)
                .with_read_delay(Duration::from_secs(30)),
        );
        assert!(queue.start(4).is_ok());
        thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        queue.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!queue.is_running());
    }

    #[test]
    fn test_decode_failure_ends_thread() {
        let mut queue = make_queue(SyntheticConfig::default().with_frame_count(10).with_receive_error_at(3));
        assert!(queue.start(16).is_ok());
        assert!(wait_until(Duration::from_secs(5), || !queue.is_running()));
        assert_eq!(queue.len(), 3);
        assert!(!queue.is_finished());
    }

    #[test]
    fn test_restart_after_stop_continues_stream() {
        let mut queue = make_queue(SyntheticConfig::default().with_frame_count(6));
        assert!(queue.start(2).is_ok());
        assert!(wait_until(Duration::from_secs(5), || queue.len() == 2));
        queue.stop();
        assert!(queue.start(8).is_ok());
        assert!(wait_until(Duration::from_secs(5), || queue.is_finished() && !queue.is_running()));
        let mut pts = Vec::new();
        while let Some(frame) = queue.try_acquire_frame() {
            pts.push(frame.pts_seconds);
        }
        assert!(!pts.is_empty());
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_seek_filter_admits_and_clears() {
        let shared = Shared::new(4);
        shared.seek_target_us.store(1_000_000, Ordering::Release);
        assert!(!shared.admit(999_999));
        assert!(shared.admit(1_000_000));
        assert_eq!(shared.seek_target_us.load(Ordering::Acquire), NO_SEEK_TARGET);
        assert!(shared.admit(0));
    }
}
