//! Frame decoder state machine.
//!
//! [`FrameDecoder`] turns a backend's packet/frame protocol into a stream of
//! tightly packed [`DecodedFrame`]s with resolved presentation timestamps.

use crate::backend::{BackendError, PacketRead, RawPicture, Receive, SeekRequest, VideoDecoderBackend};
use crate::pixel_format::PixelFormatPlan;
use crate::video::{CancelToken, DecodedFrame, DecoderConfig, HwAccelType, Rational, StreamInfo, VideoError};

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Nothing decoded yet
    Idle,
    /// Feeding packets from the container
    Reading,
    /// End of input reached; flushing frames still inside the codec
    Draining,
    /// Codec fully drained
    Finished,
}

/// Per-frame bookkeeping owned by whichever thread is decoding.
#[derive(Debug)]
struct FrameState {
    plan: PixelFormatPlan,
    swap_uv_override: Option<bool>,
    time_base: Rational,
    frame_rate: f64,
    /// Last resolved PTS, used when a frame carries no timestamp
    fallback_pts: f64,
    /// Frames since open or the last seek
    frames_decoded: u64,
}

impl FrameState {
    fn apply_override(&self, plan: PixelFormatPlan) -> PixelFormatPlan {
        match self.swap_uv_override {
            Some(swap) => plan.with_swap_uv(swap),
            None => plan,
        }
    }

    fn process(&mut self, picture: RawPicture<'_>) -> Result<DecodedFrame, VideoError> {
        if !self.plan.matches(picture.format, picture.width, picture.height) {
            let plan = PixelFormatPlan::configure(picture.format, picture.width, picture.height)
                .inspect_err(|e| {
                    tracing::warn!(
                        "Rejected mid-stream format change to {} {}x{}, keeping {} {}x{}: {e}",
                        picture.format,
                        picture.width,
                        picture.height,
                        self.plan.source,
                        self.plan.width,
                        self.plan.height
                    );
                })?;
            let plan = self.apply_override(plan);
            tracing::debug!(
                "Reconfigured output: {} {}x{} -> {} {}x{} ({}, {} bytes)",
                self.plan.source,
                self.plan.width,
                self.plan.height,
                plan.source,
                plan.width,
                plan.height,
                plan.output.as_str(),
                plan.total_bytes
            );
            self.plan = plan;
        }

        let mut data = Vec::with_capacity(self.plan.total_bytes);
        self.plan.pack(&picture, &mut data)?;

        let pts_seconds = self.resolve_pts(picture.timestamp);
        self.frames_decoded += 1;
        tracing::trace!("Decoded frame #{} pts={:.3}s", self.frames_decoded, pts_seconds);

        Ok(DecodedFrame {
            data,
            pts_seconds,
            plan: self.plan,
        })
    }

    fn resolve_pts(&mut self, timestamp: Option<i64>) -> f64 {
        let pts = match timestamp.and_then(|ts| self.time_base.ticks_to_seconds(ts)) {
            Some(seconds) => seconds,
            None if self.frames_decoded == 0 => self.fallback_pts,
            None => self.fallback_pts + 1.0 / self.frame_rate,
        };
        self.fallback_pts = pts;
        pts
    }
}

/// What the decode loop does after a receive attempt that produced no frame.
enum Step {
    Drained,
    NeedInput,
    Failed(BackendError),
}

/// Decodes frames from a [`VideoDecoderBackend`] into the normalized layout.
///
/// The decoder is driven by exactly one thread at a time: the owner thread
/// while no decode thread runs, the decode thread otherwise.
pub struct FrameDecoder<B: VideoDecoderBackend> {
    backend: B,
    state: DecoderState,
    frames: FrameState,
    info: StreamInfo,
}

impl<B: VideoDecoderBackend> FrameDecoder<B> {
    /// Wraps an opened backend, planning the output layout from its stream info.
    pub fn new(backend: B, config: &DecoderConfig) -> Result<Self, VideoError> {
        let info = backend.stream_info().clone();
        let mut plan = PixelFormatPlan::configure(info.format, info.width, info.height)?;
        if let Some(swap) = config.swap_uv {
            plan = plan.with_swap_uv(swap);
        }

        tracing::info!(
            "FrameDecoder: {} {}x{} {} -> {} ({} bytes/frame), {:.2} fps, time base {}, decoding with {}",
            info.codec,
            info.width,
            info.height,
            info.format,
            plan.output.as_str(),
            plan.total_bytes,
            info.effective_frame_rate(),
            info.time_base,
            backend.implementation_name()
        );

        Ok(Self {
            frames: FrameState {
                plan,
                swap_uv_override: config.swap_uv,
                time_base: info.time_base,
                frame_rate: info.effective_frame_rate(),
                fallback_pts: 0.0,
                frames_decoded: 0,
            },
            backend,
            state: DecoderState::Idle,
            info,
        })
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Current output layout.
    pub fn plan(&self) -> &PixelFormatPlan {
        &self.frames.plan
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// Frames decoded since open or the last successful seek.
    pub fn frames_decoded(&self) -> u64 {
        self.frames.frames_decoded
    }

    pub fn hw_accel(&self) -> HwAccelType {
        self.backend.hw_accel()
    }

    pub fn implementation_name(&self) -> String {
        self.backend.implementation_name()
    }

    /// Overrides the chroma order for this and every later layout.
    pub fn set_swap_uv(&mut self, swap_uv: Option<bool>) {
        self.frames.swap_uv_override = swap_uv;
        let source = self.frames.plan.source.is_vu_ordered();
        self.frames.plan = self.frames.plan.with_swap_uv(swap_uv.unwrap_or(source));
    }

    /// Decodes the next frame.
    ///
    /// Returns `Ok(None)` once the stream is fully drained. Backend failures
    /// are logged and returned; they never panic. A cancelled read returns
    /// [`VideoError::Interrupted`] and leaves the decoder state untouched.
    pub fn decode_next_frame(&mut self, cancel: &CancelToken) -> Result<Option<DecodedFrame>, VideoError> {
        if self.state == DecoderState::Finished {
            return Ok(None);
        }
        if self.state == DecoderState::Idle {
            self.state = DecoderState::Reading;
        }

        loop {
            let step = match self.backend.receive_frame() {
                Receive::Frame(picture) => return self.frames.process(picture).map(Some),
                Receive::EndOfStream => Step::Drained,
                Receive::Retry => Step::NeedInput,
                Receive::Error(e) => Step::Failed(e),
            };

            match step {
                Step::Drained => {
                    tracing::debug!("Decoder drained after {} frames", self.frames.frames_decoded);
                    self.state = DecoderState::Finished;
                    return Ok(None);
                }
                Step::NeedInput if self.state == DecoderState::Draining => {
                    tracing::warn!("Codec asked for input while draining, treating as end of stream");
                    self.state = DecoderState::Finished;
                    return Ok(None);
                }
                Step::NeedInput => self.feed(cancel)?,
                Step::Failed(BackendError::UnsupportedFormat(msg)) => {
                    tracing::warn!("Backend produced an unsupported picture: {msg}");
                    return Err(VideoError::UnsupportedFormat(msg));
                }
                Step::Failed(e) => {
                    tracing::warn!("Receive frame failed: {e}");
                    return Err(VideoError::DecodeFailed(e.to_string()));
                }
            }
        }
    }

    /// Reads one packet and hands it to the codec, or starts draining.
    fn feed(&mut self, cancel: &CancelToken) -> Result<(), VideoError> {
        match self.backend.read_packet(cancel) {
            Ok(PacketRead::Packet { stream_index, packet }) => {
                if stream_index != self.info.stream_index {
                    return Ok(());
                }
                self.backend.send_packet(&packet).map_err(|e| {
                    tracing::warn!("Send packet failed: {e}");
                    VideoError::DecodeFailed(format!("Send packet failed: {e}"))
                })
            }
            Ok(PacketRead::EndOfInput) => {
                self.begin_drain();
                Ok(())
            }
            Err(BackendError::Interrupted) => Err(VideoError::Interrupted),
            Err(e) => {
                tracing::warn!("Packet read failed, draining decoder: {e}");
                self.begin_drain();
                Ok(())
            }
        }
    }

    fn begin_drain(&mut self) {
        tracing::debug!("End of input, draining decoder");
        self.state = DecoderState::Draining;
        if let Err(e) = self.backend.send_eof() {
            tracing::warn!("Failed to signal end of input: {e}");
        }
    }

    /// Keyframe-backward seek of the backend to `target_seconds`.
    ///
    /// On success the codec is flushed, the decoder returns to
    /// [`DecoderState::Reading`] and timestamp fallback restarts from the
    /// target. On failure nothing changes.
    pub(crate) fn seek_backend(&mut self, target_seconds: f64) -> Result<(), VideoError> {
        let target_ts = self.info.time_base.seconds_to_ticks(target_seconds).ok_or_else(|| {
            VideoError::SeekFailed(format!("stream time base {} cannot express a target", self.info.time_base))
        })?;

        self.backend
            .seek(SeekRequest::backward_to(target_ts))
            .map_err(|e| VideoError::SeekFailed(e.to_string()))?;

        self.backend.flush();
        self.state = DecoderState::Reading;
        self.frames.fallback_pts = target_seconds;
        self.frames.frames_decoded = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::{OutputFormat, SourcePixelFormat};
    use crate::synthetic::{SyntheticBackend, SyntheticConfig};

    fn decoder(config: SyntheticConfig) -> FrameDecoder<SyntheticBackend> {
        let Ok(decoder) = FrameDecoder::new(SyntheticBackend::new(config), &DecoderConfig::default()) else {
            panic!("decoder should open");
        };
        decoder
    }

    fn drain(decoder: &mut FrameDecoder<SyntheticBackend>) -> Vec<DecodedFrame> {
        let cancel = CancelToken::new();
        let mut frames = Vec::new();
        loop {
            match decoder.decode_next_frame(&cancel) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => panic!("unexpected decode error: {e}"),
            }
        }
        frames
    }

    #[test]
    fn test_state_machine_runs_to_finished() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(5).with_decoder_delay(2));
        assert_eq!(decoder.state(), DecoderState::Idle);

        let cancel = CancelToken::new();
        let Ok(Some(_)) = decoder.decode_next_frame(&cancel) else {
            panic!("expected a frame");
        };
        assert_eq!(decoder.state(), DecoderState::Reading);

        let rest = drain(&mut decoder);
        assert_eq!(rest.len(), 4);
        assert_eq!(decoder.state(), DecoderState::Finished);
        assert!(matches!(decoder.decode_next_frame(&cancel), Ok(None)));
    }

    #[test]
    fn test_pts_from_time_base() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(3).with_time_base(Rational::new(1, 90_000)));
        let pts: Vec<f64> = drain(&mut decoder).iter().map(|f| f.pts_seconds).collect();
        assert_eq!(pts.len(), 3);
        assert!((pts[1] - 1.0 / 30.0).abs() < 1e-4);
        assert!((pts[2] - 2.0 / 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_missing_timestamps_fall_back_monotonically() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(4).without_timestamps());
        let pts: Vec<f64> = drain(&mut decoder).iter().map(|f| f.pts_seconds).collect();
        assert_eq!(pts[0], 0.0);
        for window in pts.windows(2) {
            assert!((window[1] - window[0] - 1.0 / 30.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mid_stream_format_change_replans() {
        let config = SyntheticConfig::default()
            .with_frame_count(4)
            .with_format_change(2, SourcePixelFormat::Yuv422p10le, 32, 16);
        let mut decoder = decoder(config);
        let frames = drain(&mut decoder);
        assert_eq!(frames[0].plan.output, OutputFormat::Nv12);
        assert_eq!(frames[2].plan.output, OutputFormat::Planar422);
        assert_eq!(frames[2].data.len(), frames[2].plan.total_bytes);
        assert_eq!(decoder.plan().width, 32);
    }

    #[test]
    fn test_unsupported_format_change_keeps_previous_plan() {
        let config = SyntheticConfig::default()
            .with_frame_count(4)
            .with_format_change(1, SourcePixelFormat::Yuv410p, 64, 64);
        let mut decoder = decoder(config);
        let cancel = CancelToken::new();
        let Ok(Some(first)) = decoder.decode_next_frame(&cancel) else {
            panic!("first frame should decode");
        };
        assert!(matches!(decoder.decode_next_frame(&cancel), Err(VideoError::UnsupportedFormat(_))));
        assert_eq!(*decoder.plan(), first.plan);
    }

    #[test]
    fn test_swap_override_survives_replan() {
        let config = SyntheticConfig::default()
            .with_frame_count(3)
            .with_format_change(1, SourcePixelFormat::Yuv420p, 32, 32);
        let Ok(mut decoder) = FrameDecoder::new(
            SyntheticBackend::new(config),
            &DecoderConfig::default().with_swap_uv(Some(true)),
        ) else {
            panic!("decoder should open");
        };
        assert!(decoder.plan().swap_uv);
        let frames = drain(&mut decoder);
        assert!(frames.iter().all(|f| f.plan.swap_uv));

        decoder.set_swap_uv(None);
        assert!(!decoder.plan().swap_uv);
    }

    #[test]
    fn test_other_streams_are_skipped() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(6).with_extra_stream());
        assert_eq!(drain(&mut decoder).len(), 6);
    }

    #[test]
    fn test_receive_error_reports_failure() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(5).with_receive_error_at(2));
        let cancel = CancelToken::new();
        assert!(matches!(decoder.decode_next_frame(&cancel), Ok(Some(_))));
        assert!(matches!(decoder.decode_next_frame(&cancel), Ok(Some(_))));
        assert!(matches!(decoder.decode_next_frame(&cancel), Err(VideoError::DecodeFailed(_))));
    }

    #[test]
    fn test_cancelled_read_is_interrupted() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(5));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(decoder.decode_next_frame(&cancel), Err(VideoError::Interrupted));
        assert_eq!(decoder.state(), DecoderState::Reading);
        cancel.reset();
        assert!(matches!(decoder.decode_next_frame(&cancel), Ok(Some(_))));
    }

    #[test]
    fn test_seek_backend_resets_fallback_anchor() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(90).without_timestamps());
        drain(&mut decoder);
        assert_eq!(decoder.state(), DecoderState::Finished);

        assert!(decoder.seek_backend(1.5).is_ok());
        assert_eq!(decoder.state(), DecoderState::Reading);
        assert_eq!(decoder.frames_decoded(), 0);

        let cancel = CancelToken::new();
        let Ok(Some(frame)) = decoder.decode_next_frame(&cancel) else {
            panic!("frame after seek");
        };
        assert_eq!(frame.pts_seconds, 1.5);
    }

    #[test]
    fn test_failed_seek_leaves_state() {
        let mut decoder = decoder(SyntheticConfig::default().with_frame_count(10).with_failing_seek());
        let cancel = CancelToken::new();
        assert!(matches!(decoder.decode_next_frame(&cancel), Ok(Some(_))));
        assert!(matches!(decoder.seek_backend(0.2), Err(VideoError::SeekFailed(_))));
        assert_eq!(decoder.frames_decoded(), 1);
        let Ok(Some(frame)) = decoder.decode_next_frame(&cancel) else {
            panic!("decoding continues after failed seek");
        };
        assert!((frame.pts_seconds - 1.0 / 30.0).abs() < 1e-9);
    }
}
