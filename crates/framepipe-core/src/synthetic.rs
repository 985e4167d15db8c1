//! Synthetic decode backend.
//!
//! Generates a deterministic test pattern without any native libraries: the
//! luma plane of frame `n` is filled with `n` (masked to the sample width), the
//! first chroma component with 64 and the second with 192, all scaled to the
//! format's bit depth. Rows carry configurable padding so stride handling is
//! exercised. Useful for tests, benchmarks of the pipeline itself, and as a
//! stand-in when FFmpeg is not compiled in.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{BackendError, PacketRead, PlaneView, RawPicture, Receive, SeekRequest, VideoDecoderBackend};
use crate::pixel_format::SourcePixelFormat;
use crate::video::{CancelToken, Rational, StreamInfo};

const PADDING_BYTE: u8 = 0xEE;
const EXTRA_STREAM_PACKET: u64 = u64::MAX;

/// Mid-stream switch of format or size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatChange {
    /// First frame index using the new parameters
    pub at_frame: u64,
    pub format: SourcePixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Shape of the generated stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub format: SourcePixelFormat,
    pub frame_count: u64,
    pub frame_rate: f64,
    pub time_base: Rational,
    /// Distance between keyframes, in frames
    pub keyframe_interval: u64,
    /// Extra bytes at the end of every row
    pub row_padding: usize,
    /// Whether frames carry timestamps
    pub timestamps: bool,
    /// Packets the codec holds back before emitting a frame
    pub decoder_delay: usize,
    /// Interleave packets of a second, non-video stream
    pub extra_stream: bool,
    pub format_change: Option<FormatChange>,
    /// Frame index whose receive fails with a codec error
    pub receive_error_at: Option<u64>,
    /// Reject every seek
    pub failing_seek: bool,
    /// Simulated blocking I/O per packet read
    pub read_delay: Option<Duration>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            format: SourcePixelFormat::Nv12,
            frame_count: 10,
            frame_rate: 30.0,
            time_base: Rational::new(1, 30_000),
            keyframe_interval: 10,
            row_padding: 16,
            timestamps: true,
            decoder_delay: 0,
            extra_stream: false,
            format_change: None,
            receive_error_at: None,
            failing_seek: false,
            read_delay: None,
        }
    }
}

impl SyntheticConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: SourcePixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_keyframe_interval(mut self, interval: u64) -> Self {
        self.keyframe_interval = interval.max(1);
        self
    }

    pub fn with_row_padding(mut self, padding: usize) -> Self {
        self.row_padding = padding;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn with_decoder_delay(mut self, delay: usize) -> Self {
        self.decoder_delay = delay;
        self
    }

    pub fn with_extra_stream(mut self) -> Self {
        self.extra_stream = true;
        self
    }

    pub fn with_format_change(mut self, at_frame: u64, format: SourcePixelFormat, width: u32, height: u32) -> Self {
        self.format_change = Some(FormatChange {
            at_frame,
            format,
            width,
            height,
        });
        self
    }

    pub fn with_receive_error_at(mut self, frame: u64) -> Self {
        self.receive_error_at = Some(frame);
        self
    }

    pub fn with_failing_seek(mut self) -> Self {
        self.failing_seek = true;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    fn params_for(&self, frame: u64) -> (SourcePixelFormat, u32, u32) {
        match self.format_change {
            Some(change) if frame >= change.at_frame => (change.format, change.width, change.height),
            _ => (self.format, self.width, self.height),
        }
    }

    fn pts_ticks(&self, frame: u64) -> i64 {
        self.time_base
            .seconds_to_ticks(frame as f64 / self.frame_rate)
            .unwrap_or(frame as i64)
    }
}

/// In-memory backend producing [`SyntheticConfig`] streams.
pub struct SyntheticBackend {
    config: SyntheticConfig,
    info: StreamInfo,
    next_packet: u64,
    extra_packet_due: bool,
    in_codec: VecDeque<u64>,
    draining: bool,
    planes: [Vec<u8>; 3],
    strides: [usize; 3],
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        let info = StreamInfo {
            stream_index: 0,
            width: config.width,
            height: config.height,
            format: config.format,
            time_base: config.time_base,
            frame_rate: config.frame_rate,
            duration_seconds: Some(config.frame_count as f64 / config.frame_rate),
            bit_depth: config.format.descriptor().bit_depth,
            color_space: None,
            full_range: false,
            codec: "synthetic".to_string(),
        };
        Self {
            config,
            info,
            next_packet: 0,
            extra_packet_due: false,
            in_codec: VecDeque::new(),
            draining: false,
            planes: [Vec::new(), Vec::new(), Vec::new()],
            strides: [0; 3],
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Blocks for the configured read delay, polling `cancel`.
    fn simulate_io(&self, cancel: &CancelToken) -> Result<(), BackendError> {
        let Some(delay) = self.config.read_delay else {
            return Ok(());
        };
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Err(BackendError::Interrupted);
            }
            thread::sleep(Duration::from_millis(1).min(delay));
        }
        Ok(())
    }

    fn render(&mut self, frame: u64, format: SourcePixelFormat, width: u32, height: u32) {
        let desc = format.descriptor();
        let bpc = if desc.bit_depth > 8 { 2 } else { 1 };
        let chroma_width = width.div_ceil(1 << desc.log2_chroma_w) as usize;
        let chroma_height = height.div_ceil(1 << desc.log2_chroma_h) as usize;
        let interleaved = desc.chroma_interleaved();
        // P01x samples are MSB-aligned, planar high-depth samples are not
        let msb_shift = if interleaved && bpc == 2 { 16 - desc.bit_depth } else { 0 };
        let depth_mask = if desc.bit_depth >= 16 { u16::MAX } else { (1u16 << desc.bit_depth) - 1 };
        let scale = |value8: u16| (value8 << desc.bit_depth.saturating_sub(8)) << msb_shift;
        let luma = ((frame as u16) & depth_mask) << msb_shift;

        let mut layout: Vec<(usize, usize, Vec<u16>)> = vec![(width as usize, height as usize, vec![luma])];
        if interleaved {
            layout.push((chroma_width * 2, chroma_height, vec![scale(64), scale(192)]));
        } else {
            layout.push((chroma_width, chroma_height, vec![scale(64)]));
            layout.push((chroma_width, chroma_height, vec![scale(192)]));
        }

        for (index, (samples_per_row, rows, pattern)) in layout.into_iter().enumerate() {
            let row_bytes = samples_per_row * bpc;
            let stride = row_bytes + self.config.row_padding;
            let plane = &mut self.planes[index];
            plane.clear();
            plane.reserve(stride * rows);
            for _ in 0..rows {
                for sample in 0..samples_per_row {
                    let value = pattern[sample % pattern.len()];
                    if bpc == 1 {
                        plane.push(value as u8);
                    } else {
                        plane.extend_from_slice(&value.to_le_bytes());
                    }
                }
                plane.resize(plane.len() + self.config.row_padding, PADDING_BYTE);
            }
            self.strides[index] = stride;
        }
    }
}

impl VideoDecoderBackend for SyntheticBackend {
    type Packet = u64;

    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self, cancel: &CancelToken) -> Result<PacketRead<u64>, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Interrupted);
        }
        self.simulate_io(cancel)?;

        if self.extra_packet_due {
            self.extra_packet_due = false;
            return Ok(PacketRead::Packet {
                stream_index: 1,
                packet: EXTRA_STREAM_PACKET,
            });
        }
        if self.next_packet >= self.config.frame_count {
            return Ok(PacketRead::EndOfInput);
        }

        let packet = self.next_packet;
        self.next_packet += 1;
        self.extra_packet_due = self.config.extra_stream;
        Ok(PacketRead::Packet { stream_index: 0, packet })
    }

    fn send_packet(&mut self, packet: &u64) -> Result<(), BackendError> {
        if self.draining {
            return Err(BackendError::Codec("packet sent after end of input".to_string()));
        }
        if *packet == EXTRA_STREAM_PACKET {
            return Err(BackendError::Codec("packet belongs to another stream".to_string()));
        }
        self.in_codec.push_back(*packet);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), BackendError> {
        self.draining = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Receive<RawPicture<'_>> {
        let ready = if self.draining {
            !self.in_codec.is_empty()
        } else {
            self.in_codec.len() > self.config.decoder_delay
        };
        if !ready {
            return if self.draining { Receive::EndOfStream } else { Receive::Retry };
        }

        let Some(frame) = self.in_codec.pop_front() else {
            return Receive::Retry;
        };
        if self.config.receive_error_at == Some(frame) {
            return Receive::Error(BackendError::Codec(format!("corrupt frame {frame}")));
        }

        let (format, width, height) = self.config.params_for(frame);
        self.render(frame, format, width, height);

        let plane_count = if format.descriptor().chroma_interleaved() { 2 } else { 3 };
        let planes = self.planes[..plane_count]
            .iter()
            .zip(self.strides)
            .map(|(data, stride)| PlaneView { data: data.as_slice(), stride })
            .collect();

        Receive::Frame(RawPicture {
            width,
            height,
            format,
            timestamp: self.config.timestamps.then(|| self.config.pts_ticks(frame)),
            planes,
        })
    }

    fn seek(&mut self, request: SeekRequest) -> Result<(), BackendError> {
        if self.config.failing_seek {
            return Err(BackendError::Seek("synthetic stream rejects seeks".to_string()));
        }
        let seconds = self
            .config
            .time_base
            .ticks_to_seconds(request.target_ts)
            .ok_or_else(|| BackendError::Seek("invalid time base".to_string()))?;
        let target = ((seconds * self.config.frame_rate) + 1e-6).floor().max(0.0) as u64;
        let target = target.min(self.config.frame_count);
        let interval = self.config.keyframe_interval.max(1);
        self.next_packet = if request.backward {
            target / interval * interval
        } else {
            target.div_ceil(interval) * interval
        };
        self.extra_packet_due = false;
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.in_codec.clear();
        self.draining = false;
    }
}
