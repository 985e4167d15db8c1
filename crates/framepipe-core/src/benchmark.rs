//! Decode-only throughput measurement.

use std::fmt;
use std::time::{Duration, Instant};

use crate::backend::VideoDecoderBackend;
use crate::decoder::FrameDecoder;
use crate::video::{CancelToken, VideoError};

/// Content duration decoded by default.
pub const DEFAULT_BENCHMARK_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    pub frames: u64,
    pub elapsed: Duration,
    /// Stream time covered by the decoded frames
    pub content_seconds: f64,
    pub implementation: String,
}

impl BenchmarkReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Decoded {} frames in {:.3}s -> {:.2} fps using {} over ~{:.2} s of content",
            self.frames,
            self.elapsed.as_secs_f64(),
            self.fps(),
            self.implementation,
            self.content_seconds
        )
    }
}

/// Decodes frames until `content_seconds` of stream time have passed, the
/// stream ends or `cancel` fires.
pub fn run_decode_benchmark<B: VideoDecoderBackend>(
    decoder: &mut FrameDecoder<B>,
    content_seconds: f64,
    cancel: &CancelToken,
) -> Result<BenchmarkReport, VideoError> {
    let implementation = decoder.implementation_name();
    tracing::info!("Benchmarking {content_seconds:.1}s of content using {implementation}");

    let started = Instant::now();
    let mut frames = 0u64;
    let mut first_pts = None;
    let mut covered = 0.0;

    loop {
        let frame = match decoder.decode_next_frame(cancel) {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(VideoError::Interrupted) => break,
            Err(e) => return Err(e),
        };
        frames += 1;
        let first = *first_pts.get_or_insert(frame.pts_seconds);
        covered = frame.pts_seconds - first;
        if covered >= content_seconds {
            break;
        }
    }

    Ok(BenchmarkReport {
        frames,
        elapsed: started.elapsed(),
        content_seconds: covered.max(0.0),
        implementation,
    })
}
