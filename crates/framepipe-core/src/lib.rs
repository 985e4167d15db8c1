//! framepipe-core: threaded video decode pipeline.
//!
//! This crate turns a compressed video stream into a paced sequence of
//! normalized frames ready for GPU upload. It contains:
//!
//! - Core types: [`video`], [`pixel_format`], [`color`]
//! - Decoding: the [`backend`] trait and the [`decoder`] state machine over it
//! - Threading: [`frame_queue`] (decode thread and bounded queue) and [`seek`]
//! - Presentation: [`clock`], [`playback`] and [`upload`]
//! - Backends: [`synthetic`] test patterns, and FFmpeg behind the `ffmpeg` feature
//! - Tooling: [`benchmark`]
//!
//! The crate installs no logging subscriber; it reports through `tracing`.

pub mod video;
pub mod pixel_format;
pub mod color;

pub mod backend;
pub mod decoder;
pub mod frame_queue;
pub mod seek;

pub mod clock;
pub mod playback;
pub mod upload;

pub mod benchmark;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use backend::{BackendError, PacketRead, PlaneView, RawPicture, Receive, SeekRequest, VideoDecoderBackend};
pub use benchmark::{run_decode_benchmark, BenchmarkReport, DEFAULT_BENCHMARK_SECONDS};
pub use clock::{ClockDecision, PlaybackClock};
pub use color::{RgbaBitmap, VideoColorInfo, VideoColorRange, VideoColorSpace, YuvOverlay};
pub use decoder::{DecoderState, FrameDecoder};
pub use frame_queue::{AsyncDecodeQueue, QueueStats};
pub use pixel_format::{OutputFormat, PixelFormatPlan, SourcePixelFormat};
pub use playback::{Playback, PlaybackConfig};
pub use seek::clamp_seek_target;
pub use upload::{present_frame, CpuUploader, FrameRing, FrameUploader};
pub use video::{
    CancelToken, DecodedFrame, DecoderConfig, HwAccelType, Rational, StreamInfo, VideoError,
    DEFAULT_MAX_BUFFERED_FRAMES,
};
