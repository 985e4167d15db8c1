//! FFmpeg decode backend (`ffmpeg` feature).
//!
//! Demuxing and decoding go through `ffmpeg-next`. Hardware decoding attaches
//! an FFmpeg hwdevice context to the codec; hardware frames are transferred to
//! system memory in the preferred software format before the copy step.

use std::path::Path;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use crate::backend::{BackendError, PacketRead, PlaneView, RawPicture, Receive, SeekRequest, VideoDecoderBackend};
use crate::color::VideoColorSpace;
use crate::pixel_format::{detect_bit_depth, SourcePixelFormat};
use crate::video::{CancelToken, DecoderConfig, HwAccelType, Rational, StreamInfo, VideoError};

/// FFmpeg pixel formats the pipeline can consume directly.
const PIXEL_FORMATS: [(ffi::AVPixelFormat, SourcePixelFormat); 17] = [
    (ffi::AVPixelFormat::AV_PIX_FMT_NV12, SourcePixelFormat::Nv12),
    (ffi::AVPixelFormat::AV_PIX_FMT_NV21, SourcePixelFormat::Nv21),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV420P, SourcePixelFormat::Yuv420p),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUVJ420P, SourcePixelFormat::Yuv420p),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV420P10LE, SourcePixelFormat::Yuv420p10le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV420P12LE, SourcePixelFormat::Yuv420p12le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV422P, SourcePixelFormat::Yuv422p),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV422P10LE, SourcePixelFormat::Yuv422p10le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV422P12LE, SourcePixelFormat::Yuv422p12le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV444P, SourcePixelFormat::Yuv444p),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV444P10LE, SourcePixelFormat::Yuv444p10le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV444P12LE, SourcePixelFormat::Yuv444p12le),
    (ffi::AVPixelFormat::AV_PIX_FMT_P010LE, SourcePixelFormat::P010le),
    (ffi::AVPixelFormat::AV_PIX_FMT_P012LE, SourcePixelFormat::P012le),
    (ffi::AVPixelFormat::AV_PIX_FMT_P016LE, SourcePixelFormat::P016le),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV410P, SourcePixelFormat::Yuv410p),
    (ffi::AVPixelFormat::AV_PIX_FMT_YUV411P, SourcePixelFormat::Yuv411p),
];

fn source_format(raw: i32) -> Option<SourcePixelFormat> {
    PIXEL_FORMATS
        .iter()
        .find(|(av, _)| *av as i32 == raw)
        .map(|(_, format)| *format)
}

fn av_format(format: SourcePixelFormat) -> Option<ffi::AVPixelFormat> {
    PIXEL_FORMATS
        .iter()
        .find(|(_, source)| *source == format)
        .map(|(av, _)| *av)
}

fn device_type(hw_type: HwAccelType) -> Option<ffi::AVHWDeviceType> {
    use ffi::AVHWDeviceType as Av;
    match hw_type {
        HwAccelType::None => None,
        HwAccelType::Vaapi => Some(Av::AV_HWDEVICE_TYPE_VAAPI),
        HwAccelType::Vdpau => Some(Av::AV_HWDEVICE_TYPE_VDPAU),
        HwAccelType::Cuda => Some(Av::AV_HWDEVICE_TYPE_CUDA),
        HwAccelType::Qsv => Some(Av::AV_HWDEVICE_TYPE_QSV),
        HwAccelType::VideoToolbox => Some(Av::AV_HWDEVICE_TYPE_VIDEOTOOLBOX),
        HwAccelType::D3d11va => Some(Av::AV_HWDEVICE_TYPE_D3D11VA),
        HwAccelType::Dxva2 => Some(Av::AV_HWDEVICE_TYPE_DXVA2),
    }
}

/// Hardware device types compiled into the linked FFmpeg.
pub fn available_hw_devices() -> Vec<HwAccelType> {
    let mut devices = Vec::new();
    let mut current = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        current = unsafe { ffi::av_hwdevice_iterate_types(current) };
        if current == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(accel) = HwAccelType::HARDWARE
            .into_iter()
            .find(|accel| device_type(*accel) == Some(current))
        {
            devices.push(accel);
        }
    }
    devices
}

/// A hardware device opened for decoding. Holds one reference to the
/// device's `AVBufferRef`; the codec context takes its own on attach.
struct HwDevice {
    accel: HwAccelType,
    buffer: *mut ffi::AVBufferRef,
}

impl HwDevice {
    /// Opens the default device of kind `accel`.
    fn create(accel: HwAccelType) -> Result<Self, String> {
        let Some(kind) = device_type(accel) else {
            return Err(format!("{accel} is not a hardware device"));
        };
        let mut buffer: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe { ffi::av_hwdevice_ctx_create(&mut buffer, kind, ptr::null(), ptr::null_mut(), 0) };
        match (ret, buffer.is_null()) {
            (0.., false) => Ok(Self { accel, buffer }),
            (0.., true) => Err(format!("{accel} returned no device")),
            (code, _) => Err(format!("{accel}: {}", ffmpeg::Error::from(code))),
        }
    }

    /// Makes `context` decode on this device.
    fn attach(&self, context: &mut ffmpeg::codec::context::Context) -> Result<(), String> {
        let reference = unsafe { ffi::av_buffer_ref(self.buffer) };
        if reference.is_null() {
            return Err(format!("{}: out of memory referencing the device", self.accel));
        }
        unsafe {
            let codec = context.as_mut_ptr();
            ffi::av_buffer_unref(&mut (*codec).hw_device_ctx);
            (*codec).hw_device_ctx = reference;
        }
        Ok(())
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        // av_buffer_unref nulls the pointer and ignores null
        unsafe { ffi::av_buffer_unref(&mut self.buffer) };
    }
}

/// Outcome of a hardware device that could not be used: software decoding when
/// `config` allows it, otherwise a `DecoderInit` error.
fn software_fallback(config: &DecoderConfig, reason: &str) -> Result<(), VideoError> {
    if config.fallback_to_software {
        tracing::warn!("No hardware decoding ({reason}), using software");
        Ok(())
    } else {
        Err(VideoError::DecoderInit(format!(
            "hardware decoding unavailable and software fallback disabled: {reason}"
        )))
    }
}

/// Decode backend over an FFmpeg demuxer and codec.
pub struct FfmpegBackend {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    info: StreamInfo,
    active_hw_type: HwAccelType,
    /// Software format requested when downloading hardware frames
    download_format: Option<ffi::AVPixelFormat>,
    frame: ffmpeg::frame::Video,
    sw_frame: ffmpeg::frame::Video,
    // dropped after `decoder`, which holds its own reference
    _hw_device: Option<HwDevice>,
}

// SAFETY: FfmpegBackend exclusively owns its FFmpeg contexts and frames. The
// FrameDecoder wrapping it is reached by one thread at a time (behind the
// decode queue's mutex), so the raw pointers are never used concurrently.
unsafe impl Send for FfmpegBackend {}

impl FfmpegBackend {
    /// Opens `path` and prepares a decoder for its best video stream.
    ///
    /// `cancel` is polled by FFmpeg's interrupt callback during blocking I/O,
    /// including the open itself.
    pub fn open(path: impl AsRef<Path>, config: &DecoderConfig, cancel: CancelToken) -> Result<Self, VideoError> {
        let path = path.as_ref();
        ffmpeg::init().map_err(|e| VideoError::DecoderInit(format!("FFmpeg init failed: {e}")))?;

        let token = cancel.clone();
        let input = ffmpeg::format::input_with_interrupt(&path, move || token.is_cancelled())
            .map_err(|e| VideoError::OpenFailed(format!("Failed to open {}: {e}", path.display())))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| VideoError::OpenFailed("No video stream found".to_string()))?;
        let stream_index = stream.index();
        let time_base = Rational::new(stream.time_base().numerator(), stream.time_base().denominator());
        let container_bits = unsafe { (*stream.parameters().as_ptr()).bits_per_raw_sample };

        let frame_rate = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .map(|rate| Rational::new(rate.numerator(), rate.denominator()).to_f64().unwrap_or(0.0))
            .find(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(0.0);

        let duration_seconds = if stream.duration() > 0 {
            time_base.ticks_to_seconds(stream.duration())
        } else if input.duration() > 0 {
            Some(input.duration() as f64 / ffi::AV_TIME_BASE as f64)
        } else {
            None
        };

        let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| VideoError::DecoderInit(format!("Failed to create codec context: {e}")))?;

        let hw_device = Self::open_hw_device(config, &mut context)?;
        let active_hw_type = hw_device.as_ref().map_or(HwAccelType::None, |device| device.accel);

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| VideoError::DecoderInit(format!("Failed to open decoder: {e}")))?;

        let codec_bits = unsafe { (*decoder.as_ptr()).bits_per_raw_sample };
        let reported = source_format(ffi::AVPixelFormat::from(decoder.format()) as i32);
        let bit_depth = detect_bit_depth(
            u32::try_from(container_bits).ok(),
            u32::try_from(codec_bits).ok(),
            reported,
        );

        let format = match (reported, active_hw_type.is_hardware()) {
            (_, true) => SourcePixelFormat::preferred_download(bit_depth, reported),
            (Some(format), false) => format,
            (None, false) => {
                return Err(VideoError::UnsupportedFormat(format!(
                    "{:?} is not a supported decode format",
                    decoder.format()
                )))
            }
        };

        let info = StreamInfo {
            stream_index,
            width: decoder.width(),
            height: decoder.height(),
            format,
            time_base,
            frame_rate,
            duration_seconds,
            bit_depth,
            color_space: color_space(decoder.color_space()),
            full_range: decoder.color_range() == ffmpeg::color::Range::JPEG,
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        };

        tracing::info!(
            "FfmpegBackend: opened {} ({}x{}, {}, {}-bit, {:.2} fps, duration {:?}) with {}",
            path.display(),
            info.width,
            info.height,
            info.codec,
            info.bit_depth,
            info.frame_rate,
            info.duration_seconds,
            active_hw_type
        );

        Ok(Self {
            input,
            decoder,
            download_format: av_format(format),
            info,
            active_hw_type,
            frame: ffmpeg::frame::Video::empty(),
            sw_frame: ffmpeg::frame::Video::empty(),
            _hw_device: hw_device,
        })
    }

    fn open_hw_device(
        config: &DecoderConfig,
        context: &mut ffmpeg::codec::context::Context,
    ) -> Result<Option<HwDevice>, VideoError> {
        if !config.hw_type.is_hardware() {
            return Ok(None);
        }
        match HwDevice::create(config.hw_type).and_then(|device| device.attach(context).map(|()| device)) {
            Ok(device) => {
                tracing::info!("Decoding on {} device", device.accel);
                Ok(Some(device))
            }
            Err(reason) => software_fallback(config, &reason).map(|()| None),
        }
    }

    /// Copies the current hardware frame into `sw_frame`.
    fn download(&mut self) -> Result<(), BackendError> {
        let mut ret = -1;
        if let Some(format) = self.download_format {
            ret = unsafe {
                ffi::av_frame_unref(self.sw_frame.as_mut_ptr());
                (*self.sw_frame.as_mut_ptr()).format = format as i32;
                ffi::av_hwframe_transfer_data(self.sw_frame.as_mut_ptr(), self.frame.as_ptr(), 0)
            };
        }
        if ret < 0 {
            // let the device pick its native software format
            ret = unsafe {
                ffi::av_frame_unref(self.sw_frame.as_mut_ptr());
                ffi::av_hwframe_transfer_data(self.sw_frame.as_mut_ptr(), self.frame.as_ptr(), 0)
            };
        }
        if ret < 0 {
            return Err(BackendError::Codec(format!(
                "Failed to transfer hardware frame to CPU: {ret}"
            )));
        }
        tracing::trace!("Transferred hardware frame to CPU");
        Ok(())
    }
}

fn color_space(space: ffmpeg::color::Space) -> Option<VideoColorSpace> {
    use ffmpeg::color::Space;
    match space {
        Space::BT709 => Some(VideoColorSpace::Bt709),
        Space::BT2020NCL | Space::BT2020CL => Some(VideoColorSpace::Bt2020),
        Space::SMPTE170M | Space::BT470BG | Space::FCC => Some(VideoColorSpace::Bt601),
        _ => None,
    }
}

fn picture(frame: &ffmpeg::frame::Video, timestamp: Option<i64>) -> Result<RawPicture<'_>, BackendError> {
    let raw = unsafe { (*frame.as_ptr()).format };
    let format = source_format(raw)
        .ok_or_else(|| BackendError::UnsupportedFormat(format!("{:?}", frame.format())))?;
    let plane_count = format.descriptor().planes.min(frame.planes());
    let planes = (0..plane_count)
        .map(|index| PlaneView {
            data: frame.data(index),
            stride: frame.stride(index),
        })
        .collect();
    Ok(RawPicture {
        width: frame.width(),
        height: frame.height(),
        format,
        timestamp,
        planes,
    })
}

impl VideoDecoderBackend for FfmpegBackend {
    type Packet = ffmpeg::Packet;

    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self, cancel: &CancelToken) -> Result<PacketRead<ffmpeg::Packet>, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Interrupted);
        }
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(PacketRead::Packet {
                stream_index: packet.stream(),
                packet,
            }),
            Err(ffmpeg::Error::Eof) => Ok(PacketRead::EndOfInput),
            Err(ffmpeg::Error::Exit) => Err(BackendError::Interrupted),
            Err(_) if cancel.is_cancelled() => Err(BackendError::Interrupted),
            Err(e) => Err(BackendError::Io(e.to_string())),
        }
    }

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), BackendError> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| BackendError::Codec(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<(), BackendError> {
        self.decoder.send_eof().map_err(|e| BackendError::Codec(e.to_string()))
    }

    fn receive_frame(&mut self) -> Receive<RawPicture<'_>> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Receive::EndOfStream,
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => return Receive::Retry,
            Err(e) => return Receive::Error(BackendError::Codec(e.to_string())),
        }

        let timestamp = self.frame.timestamp().or_else(|| self.frame.pts());
        let hardware = unsafe { !(*self.frame.as_ptr()).hw_frames_ctx.is_null() };
        if hardware {
            if let Err(e) = self.download() {
                return Receive::Error(e);
            }
        }

        let source = if hardware { &self.sw_frame } else { &self.frame };
        match picture(source, timestamp) {
            Ok(picture) => Receive::Frame(picture),
            Err(e) => Receive::Error(e),
        }
    }

    fn seek(&mut self, request: SeekRequest) -> Result<(), BackendError> {
        let flags = if request.backward {
            ffi::AVSEEK_FLAG_BACKWARD as i32
        } else {
            0
        };
        let ret = unsafe {
            ffi::avformat_seek_file(
                self.input.as_mut_ptr(),
                self.info.stream_index as i32,
                request.min_ts,
                request.target_ts,
                request.max_ts,
                flags,
            )
        };
        if ret < 0 {
            return Err(BackendError::Seek(ffmpeg::Error::from(ret).to_string()));
        }
        tracing::debug!("FFmpeg seek to {} ticks", request.target_ts);
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn hw_accel(&self) -> HwAccelType {
        self.active_hw_type
    }
}
