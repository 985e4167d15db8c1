//! Core video types shared across the decode pipeline.
//!
//! Everything in here is backend-agnostic: the FFmpeg backend, the synthetic
//! backend and every uploader speak in terms of [`DecodedFrame`],
//! [`StreamInfo`] and [`VideoError`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::color::{VideoColorInfo, VideoColorSpace};
use crate::pixel_format::{PixelFormatPlan, SourcePixelFormat};

/// Default number of decoded frames buffered ahead of the render thread.
pub const DEFAULT_MAX_BUFFERED_FRAMES: usize = 12;

/// Frame rate assumed when a stream does not report a usable one.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Errors that can occur while decoding or presenting video.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VideoError {
    /// Failed to open the media source
    #[error("Failed to open video: {0}")]
    OpenFailed(String),
    /// Decoder initialization failed
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),
    /// Frame decoding error
    #[error("Frame decode failed: {0}")]
    DecodeFailed(String),
    /// Pixel format cannot be mapped onto any output layout
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Zero width or height reported for a frame
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    /// Seek operation failed
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    /// The decode thread could not be spawned
    #[error("Failed to spawn decode thread: {0}")]
    ThreadSpawn(String),
    /// A blocking backend call observed cancellation
    #[error("Decode interrupted")]
    Interrupted,
    /// The uploader rejected a frame
    #[error("Upload failed: {0}")]
    Upload(String),
}

/// A rational number, used for stream time bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns the value as a float, or None for a zero denominator.
    pub fn to_f64(self) -> Option<f64> {
        if self.den == 0 {
            None
        } else {
            Some(self.num as f64 / self.den as f64)
        }
    }

    /// Converts a timestamp expressed in this time base to seconds.
    pub fn ticks_to_seconds(self, ticks: i64) -> Option<f64> {
        self.to_f64().map(|unit| ticks as f64 * unit)
    }

    /// Converts seconds to the nearest timestamp in this time base.
    pub fn seconds_to_ticks(self, seconds: f64) -> Option<i64> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some((seconds * self.den as f64 / self.num as f64).round() as i64)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Hardware acceleration device used by a decode backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HwAccelType {
    /// Software decoding
    #[default]
    None,
    /// Linux VA-API
    Vaapi,
    /// Linux VDPAU
    Vdpau,
    /// NVIDIA CUDA / NVDEC
    Cuda,
    /// Intel Quick Sync
    Qsv,
    /// macOS VideoToolbox
    VideoToolbox,
    /// Windows D3D11VA
    D3d11va,
    /// Windows DXVA2
    Dxva2,
}

impl HwAccelType {
    /// All hardware device types, in preference order.
    pub const HARDWARE: [HwAccelType; 7] = [
        HwAccelType::VideoToolbox,
        HwAccelType::D3d11va,
        HwAccelType::Cuda,
        HwAccelType::Vaapi,
        HwAccelType::Qsv,
        HwAccelType::Vdpau,
        HwAccelType::Dxva2,
    ];

    /// Returns the platform's preferred hardware device.
    pub fn platform_default() -> Self {
        #[cfg(target_os = "macos")]
        {
            HwAccelType::VideoToolbox
        }
        #[cfg(target_os = "windows")]
        {
            HwAccelType::D3d11va
        }
        #[cfg(target_os = "linux")]
        {
            HwAccelType::Vaapi
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
        {
            HwAccelType::None
        }
    }

    /// Short device name, as used by FFmpeg's hwdevice registry.
    pub fn as_str(self) -> &'static str {
        match self {
            HwAccelType::None => "software",
            HwAccelType::Vaapi => "vaapi",
            HwAccelType::Vdpau => "vdpau",
            HwAccelType::Cuda => "cuda",
            HwAccelType::Qsv => "qsv",
            HwAccelType::VideoToolbox => "videotoolbox",
            HwAccelType::D3d11va => "d3d11va",
            HwAccelType::Dxva2 => "dxva2",
        }
    }

    pub fn is_hardware(self) -> bool {
        self != HwAccelType::None
    }
}

impl fmt::Display for HwAccelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoder configuration.
///
/// Construct with [`DecoderConfig::default`] and adjust with the builder
/// methods:
///
/// ```
/// use framepipe_core::{DecoderConfig, HwAccelType};
///
/// let config = DecoderConfig::default()
///     .with_hw_type(HwAccelType::Vaapi)
///     .with_max_buffered_frames(4)
///     .with_swap_uv(Some(true));
/// assert_eq!(config.max_buffered_frames, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Requested hardware device (None = software decoding)
    pub hw_type: HwAccelType,
    /// Fall back to software decoding if the hardware device cannot be created
    pub fallback_to_software: bool,
    /// Capacity of the decoded frame queue (minimum 1)
    pub max_buffered_frames: usize,
    /// Chroma order override; None keeps the order derived from the pixel format
    pub swap_uv: Option<bool>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            hw_type: HwAccelType::None,
            fallback_to_software: true,
            max_buffered_frames: DEFAULT_MAX_BUFFERED_FRAMES,
            swap_uv: None,
        }
    }
}

impl DecoderConfig {
    /// Software-only configuration.
    pub fn software_only() -> Self {
        Self::default()
    }

    pub fn with_hw_type(mut self, hw_type: HwAccelType) -> Self {
        self.hw_type = hw_type;
        self
    }

    pub fn with_fallback_to_software(mut self, fallback: bool) -> Self {
        self.fallback_to_software = fallback;
        self
    }

    pub fn with_max_buffered_frames(mut self, frames: usize) -> Self {
        self.max_buffered_frames = frames.max(1);
        self
    }

    pub fn with_swap_uv(mut self, swap_uv: Option<bool>) -> Self {
        self.swap_uv = swap_uv;
        self
    }
}

/// Static description of the selected video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index of the selected stream within the container
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    /// Pixel format of decoded frames, as reported at open time
    pub format: SourcePixelFormat,
    /// Stream time base for timestamps
    pub time_base: Rational,
    /// Guessed frame rate, 0.0 if unknown
    pub frame_rate: f64,
    /// Container duration in seconds, if known
    pub duration_seconds: Option<f64>,
    /// Bits per component of the coded stream
    pub bit_depth: u32,
    /// Signalled matrix coefficients, if any
    pub color_space: Option<VideoColorSpace>,
    /// Whether the stream signals full (JPEG) range
    pub full_range: bool,
    /// Codec name for logging
    pub codec: String,
}

impl StreamInfo {
    /// Frame rate to use for timestamp fallback and clock cadence.
    pub fn effective_frame_rate(&self) -> f64 {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            self.frame_rate
        } else {
            FALLBACK_FRAME_RATE
        }
    }

    /// Duration clamped to be non-negative; 0.0 when unknown.
    pub fn duration(&self) -> f64 {
        self.duration_seconds.unwrap_or(0.0).max(0.0)
    }

    pub fn color_info(&self) -> VideoColorInfo {
        VideoColorInfo::derive(self.color_space, self.full_range, self.height)
    }
}

/// A decoded frame in the normalized, tightly packed layout.
///
/// The buffer always holds the luma plane followed by one interleaved chroma
/// plane; `plan` describes its exact geometry. Frames are moved, never shared:
/// the decode thread owns a frame until it is enqueued, the render thread owns
/// it after [`AsyncDecodeQueue::try_acquire_frame`](crate::AsyncDecodeQueue::try_acquire_frame).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Packed pixel data, `plan.total_bytes` long
    pub data: Vec<u8>,
    /// Presentation timestamp in seconds
    pub pts_seconds: f64,
    /// Layout of `data`
    pub plan: PixelFormatPlan,
}

impl DecodedFrame {
    /// A mid-gray frame for `plan`, shown before the first decoded frame.
    pub fn neutral(plan: PixelFormatPlan) -> Self {
        Self {
            data: plan.neutral_buffer(),
            pts_seconds: 0.0,
            plan,
        }
    }

    /// Presentation timestamp in whole microseconds.
    pub fn pts_micros(&self) -> i64 {
        seconds_to_micros(self.pts_seconds)
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.plan.y_plane_bytes.min(self.data.len())]
    }

    pub fn uv_plane(&self) -> &[u8] {
        let start = self.plan.y_plane_bytes.min(self.data.len());
        &self.data[start..]
    }
}

pub(crate) fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

/// Cooperative cancellation flag polled by blocking backend calls.
///
/// Cloning yields a handle to the same flag. The decode thread's stop flag is
/// one of these, so setting it both ends the producer loop and aborts any
/// packet read the backend is blocked in.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_conversions() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(tb.ticks_to_seconds(90_000), Some(1.0));
        assert_eq!(tb.seconds_to_ticks(12.0), Some(1_080_000));
        assert_eq!(Rational::new(1, 0).ticks_to_seconds(10), None);
        assert_eq!(Rational::new(0, 1).seconds_to_ticks(1.0), None);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_decoder_config_min_capacity() {
        let config = DecoderConfig::default().with_max_buffered_frames(0);
        assert_eq!(config.max_buffered_frames, 1);
        assert_eq!(DecoderConfig::default().max_buffered_frames, 12);
        assert!(DecoderConfig::default().fallback_to_software);
    }

    #[test]
    fn test_effective_frame_rate_fallback() {
        let mut info = StreamInfo {
            stream_index: 0,
            width: 64,
            height: 64,
            format: SourcePixelFormat::Nv12,
            time_base: Rational::new(1, 30),
            frame_rate: 0.0,
            duration_seconds: None,
            bit_depth: 8,
            color_space: None,
            full_range: false,
            codec: "test".to_string(),
        };
        assert_eq!(info.effective_frame_rate(), FALLBACK_FRAME_RATE);
        info.frame_rate = f64::NAN;
        assert_eq!(info.effective_frame_rate(), FALLBACK_FRAME_RATE);
        info.frame_rate = 24.0;
        assert_eq!(info.effective_frame_rate(), 24.0);
        assert_eq!(info.duration(), 0.0);
    }

    #[test]
    fn test_hw_accel_names() {
        assert_eq!(HwAccelType::None.to_string(), "software");
        assert_eq!(HwAccelType::Vaapi.as_str(), "vaapi");
        assert!(!HwAccelType::None.is_hardware());
        assert!(HwAccelType::HARDWARE.iter().all(|t| t.is_hardware()));
    }
}
