//! Seeking.
//!
//! A seek has to stop the decode thread before touching the backend: a
//! repositioned demuxer racing an in-flight packet read yields frames from
//! both sides of the jump. The sequence is always stop, clear, reposition,
//! flush, restart.

use std::sync::atomic::Ordering;

use crate::backend::VideoDecoderBackend;
use crate::frame_queue::{AsyncDecodeQueue, NO_SEEK_TARGET};
use crate::video::{seconds_to_micros, VideoError};

/// Clamps a requested seek position to the playable range.
///
/// A duration of zero means unknown; only the lower bound applies then.
pub fn clamp_seek_target(target_seconds: f64, duration_seconds: f64) -> f64 {
    if !target_seconds.is_finite() {
        return if target_seconds == f64::INFINITY && duration_seconds > 0.0 {
            duration_seconds
        } else {
            0.0
        };
    }
    let target = target_seconds.max(0.0);
    if duration_seconds > 0.0 {
        target.min(duration_seconds)
    } else {
        target
    }
}

impl<B: VideoDecoderBackend + 'static> AsyncDecodeQueue<B> {
    /// Seeks to `target_seconds`, returning the clamped target actually used.
    ///
    /// Frames decoded before the target are discarded by the decode thread,
    /// so the first frame delivered afterwards has a PTS at or past it. On
    /// failure the decoder position is left as it was. Either way the decode
    /// thread is restarted if it had been started.
    pub fn seek(&mut self, target_seconds: f64) -> Result<f64, VideoError> {
        let target = clamp_seek_target(target_seconds, self.info.duration());
        let was_started = self.is_started();
        let capacity = self.capacity();
        tracing::info!("Seeking to {target:.3}s (requested {target_seconds:.3}s)");

        self.stop();
        self.shared.frames.lock().clear();
        self.shared
            .seek_target_us
            .store(seconds_to_micros(target), Ordering::Release);

        let result = self.decoder.lock().seek_backend(target);

        match result {
            Ok(()) => {
                self.shared.finished.store(false, Ordering::Release);
                self.shared.draining.store(false, Ordering::Release);
                if was_started {
                    self.start(capacity)?;
                }
                Ok(target)
            }
            Err(e) => {
                tracing::warn!("Seek to {target:.3}s failed: {e}");
                self.shared.seek_target_us.store(NO_SEEK_TARGET, Ordering::Release);
                if was_started {
                    if let Err(restart) = self.start(capacity) {
                        tracing::error!("Failed to resume decoding after failed seek: {restart}");
                    }
                }
                Err(e)
            }
        }
    }
}
