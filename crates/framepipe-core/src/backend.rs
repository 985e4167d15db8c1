//! Decode backend abstraction.
//!
//! A backend wraps a demuxer plus codec with pull-based send-packet /
//! receive-frame semantics. Opening a container and picking the best video
//! stream happen in each backend's constructor; after that the
//! [`FrameDecoder`](crate::FrameDecoder) drives it exclusively through
//! [`VideoDecoderBackend`].

use crate::video::{CancelToken, HwAccelType, StreamInfo};
use crate::pixel_format::SourcePixelFormat;

/// One plane of a decoded picture, as laid out by the backend.
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
}

/// A decoded picture borrowed from the backend until the next call into it.
#[derive(Debug, Clone)]
pub struct RawPicture<'a> {
    pub width: u32,
    pub height: u32,
    pub format: SourcePixelFormat,
    /// Best-effort timestamp in stream time base units
    pub timestamp: Option<i64>,
    pub planes: Vec<PlaneView<'a>>,
}

/// Failures reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// A blocking call observed the cancel token
    #[error("operation interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("seek rejected: {0}")]
    Seek(String),
}

/// Outcome of asking the codec for its next frame.
#[derive(Debug)]
pub enum Receive<T> {
    Frame(T),
    /// The codec needs more input before it can produce a frame
    Retry,
    /// The codec has been fully drained
    EndOfStream,
    Error(BackendError),
}

/// Outcome of a packet read.
#[derive(Debug)]
pub enum PacketRead<P> {
    Packet { stream_index: usize, packet: P },
    /// The container has no more packets
    EndOfInput,
}

/// Timestamps for a keyframe seek, in the stream time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub min_ts: i64,
    pub target_ts: i64,
    pub max_ts: i64,
    /// Land on the nearest keyframe at or before `target_ts`
    pub backward: bool,
}

impl SeekRequest {
    /// Keyframe-backward seek to `target_ts`.
    pub fn backward_to(target_ts: i64) -> Self {
        Self {
            min_ts: i64::MIN,
            target_ts,
            max_ts: target_ts,
            backward: true,
        }
    }
}

/// Trait for pull-based decode backends.
pub trait VideoDecoderBackend: Send {
    /// Compressed packet type handed from `read_packet` to `send_packet`.
    type Packet;

    /// Metadata of the selected video stream.
    fn stream_info(&self) -> &StreamInfo;

    /// Reads the next packet from the container.
    ///
    /// Blocking I/O must poll `cancel` and return
    /// [`BackendError::Interrupted`] once it is set.
    fn read_packet(&mut self, cancel: &CancelToken) -> Result<PacketRead<Self::Packet>, BackendError>;

    /// Submits a packet of the selected stream to the codec.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), BackendError>;

    /// Signals end of input so the codec flushes its delayed frames.
    fn send_eof(&mut self) -> Result<(), BackendError>;

    /// Pulls the next decoded picture out of the codec.
    fn receive_frame(&mut self) -> Receive<RawPicture<'_>>;

    /// Repositions the demuxer.
    fn seek(&mut self, request: SeekRequest) -> Result<(), BackendError>;

    /// Discards frames buffered inside the codec.
    fn flush(&mut self);

    /// Hardware device decoding runs on, if any.
    fn hw_accel(&self) -> HwAccelType {
        HwAccelType::None
    }

    /// Name used in logs and benchmark reports.
    fn implementation_name(&self) -> String {
        self.hw_accel().as_str().to_string()
    }
}
