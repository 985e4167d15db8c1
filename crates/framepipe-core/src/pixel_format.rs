//! Pixel-format negotiation and frame packing.
//!
//! A [`PixelFormatPlan`] describes the tightly packed buffer the decoder
//! produces for a source format and frame size. Every output layout shares
//! the same geometry: a full-resolution luma plane followed by one interleaved
//! chroma plane (U then V, or V then U when swapped). Planar sources have their
//! separate U and V planes interleaved during the copy, and planar sources
//! wider than 8 bits are widened to MSB-aligned 16-bit little-endian samples so
//! the uploader sees one sample convention regardless of the source.

use std::fmt;

use crate::backend::{PlaneView, RawPicture};
use crate::video::VideoError;

/// Pixel formats a decode backend can hand to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourcePixelFormat {
    Nv12,
    Nv21,
    Yuv420p,
    Yuv420p10le,
    Yuv420p12le,
    Yuv422p,
    Yuv422p10le,
    Yuv422p12le,
    Yuv444p,
    Yuv444p10le,
    Yuv444p12le,
    P010le,
    P012le,
    P016le,
    /// 4:1:0 planar; chroma is too coarse for any output layout
    Yuv410p,
    /// 4:1:1 planar
    Yuv411p,
    /// Packed RGBA
    Rgba,
}

/// Layout metadata for a [`SourcePixelFormat`], mirroring what a pixel-format
/// descriptor table reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub name: &'static str,
    /// Horizontal chroma subsampling as a power of two
    pub log2_chroma_w: u8,
    /// Vertical chroma subsampling as a power of two
    pub log2_chroma_h: u8,
    /// Significant bits per component
    pub bit_depth: u32,
    /// Number of data planes
    pub planes: usize,
    /// Components live in separate planes rather than packed pixels
    pub planar: bool,
    /// YUV rather than RGB components
    pub yuv: bool,
}

impl FormatDescriptor {
    /// Both chroma components share a single plane.
    pub fn chroma_interleaved(&self) -> bool {
        self.planar && self.yuv && self.planes == 2
    }
}

const fn desc(
    name: &'static str,
    log2_chroma_w: u8,
    log2_chroma_h: u8,
    bit_depth: u32,
    planes: usize,
) -> FormatDescriptor {
    FormatDescriptor {
        name,
        log2_chroma_w,
        log2_chroma_h,
        bit_depth,
        planes,
        planar: true,
        yuv: true,
    }
}

impl SourcePixelFormat {
    pub const fn descriptor(self) -> FormatDescriptor {
        match self {
            SourcePixelFormat::Nv12 => desc("nv12", 1, 1, 8, 2),
            SourcePixelFormat::Nv21 => desc("nv21", 1, 1, 8, 2),
            SourcePixelFormat::Yuv420p => desc("yuv420p", 1, 1, 8, 3),
            SourcePixelFormat::Yuv420p10le => desc("yuv420p10le", 1, 1, 10, 3),
            SourcePixelFormat::Yuv420p12le => desc("yuv420p12le", 1, 1, 12, 3),
            SourcePixelFormat::Yuv422p => desc("yuv422p", 1, 0, 8, 3),
            SourcePixelFormat::Yuv422p10le => desc("yuv422p10le", 1, 0, 10, 3),
            SourcePixelFormat::Yuv422p12le => desc("yuv422p12le", 1, 0, 12, 3),
            SourcePixelFormat::Yuv444p => desc("yuv444p", 0, 0, 8, 3),
            SourcePixelFormat::Yuv444p10le => desc("yuv444p10le", 0, 0, 10, 3),
            SourcePixelFormat::Yuv444p12le => desc("yuv444p12le", 0, 0, 12, 3),
            SourcePixelFormat::P010le => desc("p010le", 1, 1, 10, 2),
            SourcePixelFormat::P012le => desc("p012le", 1, 1, 12, 2),
            SourcePixelFormat::P016le => desc("p016le", 1, 1, 16, 2),
            SourcePixelFormat::Yuv410p => desc("yuv410p", 2, 2, 8, 3),
            SourcePixelFormat::Yuv411p => desc("yuv411p", 2, 0, 8, 3),
            SourcePixelFormat::Rgba => FormatDescriptor {
                name: "rgba",
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                bit_depth: 8,
                planes: 1,
                planar: false,
                yuv: false,
            },
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// 8-bit semi-planar NV12/NV21 family.
    pub fn is_nv12_family(self) -> bool {
        matches!(self, SourcePixelFormat::Nv12 | SourcePixelFormat::Nv21)
    }

    /// Format whose interleaved chroma stores V before U.
    pub fn is_vu_ordered(self) -> bool {
        self == SourcePixelFormat::Nv21
    }

    /// Chooses the software format to request from a hardware decoder.
    ///
    /// A supported software source format is kept as is. Otherwise the choice
    /// keeps the source chroma layout at the nearest supported depth, with
    /// 4:2:0 going to the NV12/P01x family.
    pub fn preferred_download(bit_depth: u32, source: Option<SourcePixelFormat>) -> Self {
        if let Some(format) = source {
            if PixelFormatPlan::configure(format, 2, 2).is_ok() {
                return format;
            }
        }
        let chroma = source.map(|f| {
            let d = f.descriptor();
            (d.log2_chroma_w, d.log2_chroma_h)
        });
        match (chroma, bit_depth) {
            (Some((1, 0)), 0..=8) => SourcePixelFormat::Yuv422p,
            (Some((1, 0)), 9..=10) => SourcePixelFormat::Yuv422p10le,
            (Some((1, 0)), _) => SourcePixelFormat::Yuv422p12le,
            (Some((0, 0)), 0..=8) => SourcePixelFormat::Yuv444p,
            (Some((0, 0)), 9..=10) => SourcePixelFormat::Yuv444p10le,
            (Some((0, 0)), _) => SourcePixelFormat::Yuv444p12le,
            (_, 0..=8) => SourcePixelFormat::Nv12,
            (_, 9..=10) => SourcePixelFormat::P010le,
            (_, 11..=12) => SourcePixelFormat::P012le,
            _ => SourcePixelFormat::P016le,
        }
    }
}

impl fmt::Display for SourcePixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Determines the coded bit depth of a stream.
///
/// Prefers the container's bits-per-raw-sample, then the codec's, then the
/// pixel format's component depth, defaulting to 8.
pub fn detect_bit_depth(
    container_bits: Option<u32>,
    codec_bits: Option<u32>,
    format: Option<SourcePixelFormat>,
) -> u32 {
    container_bits
        .filter(|&bits| bits > 0)
        .or(codec_bits.filter(|&bits| bits > 0))
        .or(format.map(|f| f.descriptor().bit_depth))
        .unwrap_or(8)
}

/// Normalized output layout handed to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Nv12,
    Planar420,
    Planar422,
    Planar444,
    Unsupported,
}

impl OutputFormat {
    /// Classifies a source format. NV12-family wins over the divisor rules.
    pub fn classify(format: SourcePixelFormat) -> Self {
        let desc = format.descriptor();
        if !desc.planar || !desc.yuv {
            return OutputFormat::Unsupported;
        }
        if format.is_nv12_family() {
            return OutputFormat::Nv12;
        }
        match (1u32 << desc.log2_chroma_w, 1u32 << desc.log2_chroma_h) {
            (2, 2) => OutputFormat::Planar420,
            (2, 1) => OutputFormat::Planar422,
            (1, 1) => OutputFormat::Planar444,
            _ => OutputFormat::Unsupported,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Nv12 => "nv12",
            OutputFormat::Planar420 => "planar420",
            OutputFormat::Planar422 => "planar422",
            OutputFormat::Planar444 => "planar444",
            OutputFormat::Unsupported => "unsupported",
        }
    }
}

/// Buffer geometry for one source format at one frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatPlan {
    pub source: SourcePixelFormat,
    pub output: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub chroma_div_x: u32,
    pub chroma_div_y: u32,
    pub chroma_width: u32,
    pub chroma_height: u32,
    /// Source chroma arrives interleaved in one plane
    pub chroma_interleaved: bool,
    /// Chroma pairs are swapped while packing, relative to the source order.
    /// Use [`PixelFormatPlan::output_vu`] for the order of the packed buffer.
    pub swap_uv: bool,
    pub bit_depth: u32,
    pub bytes_per_component: usize,
    pub y_plane_bytes: usize,
    /// Both chroma channels, interleaved
    pub uv_plane_bytes: usize,
    pub total_bytes: usize,
}

impl PixelFormatPlan {
    /// Computes the plan for `source` at `width`x`height`.
    ///
    /// Fails with [`VideoError::UnsupportedFormat`] when the format maps onto
    /// no output layout and [`VideoError::InvalidDimensions`] for an empty
    /// frame.
    pub fn configure(source: SourcePixelFormat, width: u32, height: u32) -> Result<Self, VideoError> {
        if width == 0 || height == 0 {
            return Err(VideoError::InvalidDimensions { width, height });
        }

        let output = OutputFormat::classify(source);
        if output == OutputFormat::Unsupported {
            return Err(VideoError::UnsupportedFormat(format!(
                "pixel format {source} has no supported output layout"
            )));
        }

        let desc = source.descriptor();
        let chroma_div_x = 1u32 << desc.log2_chroma_w;
        let chroma_div_y = 1u32 << desc.log2_chroma_h;
        let chroma_width = width.div_ceil(chroma_div_x).max(1);
        let chroma_height = height.div_ceil(chroma_div_y).max(1);
        let bytes_per_component = if desc.bit_depth > 8 { 2 } else { 1 };

        let y_plane_bytes = width as usize * height as usize * bytes_per_component;
        let uv_plane_bytes = chroma_width as usize * chroma_height as usize * 2 * bytes_per_component;

        Ok(Self {
            source,
            output,
            width,
            height,
            chroma_div_x,
            chroma_div_y,
            chroma_width,
            chroma_height,
            chroma_interleaved: desc.chroma_interleaved(),
            swap_uv: source.is_vu_ordered(),
            bit_depth: desc.bit_depth,
            bytes_per_component,
            y_plane_bytes,
            uv_plane_bytes,
            total_bytes: y_plane_bytes + uv_plane_bytes,
        })
    }

    /// Same plan with the chroma order overridden.
    pub fn with_swap_uv(mut self, swap_uv: bool) -> Self {
        self.swap_uv = swap_uv;
        self
    }

    /// Whether the packed buffer carries V before U.
    pub fn output_vu(&self) -> bool {
        self.swap_uv != self.source.is_vu_ordered()
    }

    /// Whether this plan was computed for the given frame parameters.
    pub fn matches(&self, source: SourcePixelFormat, width: u32, height: u32) -> bool {
        self.source == source && self.width == width && self.height == height
    }

    /// Left shift applied to each 16-bit sample while packing.
    pub fn sample_shift(&self) -> u32 {
        if self.bytes_per_component == 2 && !self.chroma_interleaved && self.bit_depth < 16 {
            16 - self.bit_depth
        } else {
            0
        }
    }

    /// Plan-sized buffer filled with mid-gray.
    pub fn neutral_buffer(&self) -> Vec<u8> {
        if self.bytes_per_component == 1 {
            return vec![0x80; self.total_bytes];
        }
        let mid = (1u16 << 15).to_le_bytes();
        let mut buffer = Vec::with_capacity(self.total_bytes);
        for _ in 0..self.total_bytes / 2 {
            buffer.extend_from_slice(&mid);
        }
        buffer
    }

    /// Copies a (possibly strided) decoded picture into `out`, tightly packed.
    ///
    /// `out` is resized to `total_bytes`. The picture must match this plan's
    /// dimensions and format.
    pub fn pack(&self, picture: &RawPicture<'_>, out: &mut Vec<u8>) -> Result<(), VideoError> {
        let needed_planes = if self.chroma_interleaved { 2 } else { 3 };
        if picture.planes.len() < needed_planes {
            return Err(VideoError::DecodeFailed(format!(
                "{} picture has {} planes, expected {needed_planes}",
                self.source,
                picture.planes.len()
            )));
        }

        out.clear();
        out.resize(self.total_bytes, 0);
        let (y_out, uv_out) = out.split_at_mut(self.y_plane_bytes);

        let bpc = self.bytes_per_component;
        let shift = self.sample_shift();

        let luma_row = self.width as usize * bpc;
        for (row, dst) in y_out.chunks_exact_mut(luma_row).enumerate() {
            let src = plane_row(&picture.planes[0], row, luma_row, 0)?;
            copy_samples(dst, src, shift);
        }

        let chroma_row = self.chroma_width as usize * 2 * bpc;
        if self.chroma_interleaved {
            for (row, dst) in uv_out.chunks_exact_mut(chroma_row).enumerate() {
                let src = plane_row(&picture.planes[1], row, chroma_row, 1)?;
                copy_samples(dst, src, shift);
                if self.swap_uv {
                    swap_chroma_pairs(dst, bpc);
                }
            }
            return Ok(());
        }

        let half_row = self.chroma_width as usize * bpc;
        let (first, second) = if self.swap_uv { (2, 1) } else { (1, 2) };
        for (row, dst) in uv_out.chunks_exact_mut(chroma_row).enumerate() {
            let a = plane_row(&picture.planes[first], row, half_row, first)?;
            let b = plane_row(&picture.planes[second], row, half_row, second)?;
            interleave_samples(dst, a, b, bpc, shift);
        }
        Ok(())
    }
}

fn plane_row<'a>(plane: &PlaneView<'a>, row: usize, len: usize, index: usize) -> Result<&'a [u8], VideoError> {
    let start = row * plane.stride;
    plane.data.get(start..start + len).ok_or_else(|| {
        VideoError::DecodeFailed(format!(
            "plane {index} too small: row {row} needs {} bytes, plane has {}",
            start + len,
            plane.data.len()
        ))
    })
}

fn copy_samples(dst: &mut [u8], src: &[u8], shift: u32) {
    if shift == 0 {
        dst.copy_from_slice(src);
        return;
    }
    for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
        let sample = u16::from_le_bytes([s[0], s[1]]) << shift;
        d.copy_from_slice(&sample.to_le_bytes());
    }
}

fn swap_chroma_pairs(row: &mut [u8], bpc: usize) {
    for pair in row.chunks_exact_mut(2 * bpc) {
        let (u, v) = pair.split_at_mut(bpc);
        u.swap_with_slice(v);
    }
}

fn interleave_samples(dst: &mut [u8], a: &[u8], b: &[u8], bpc: usize, shift: u32) {
    if bpc == 1 {
        for (pair, (&x, &y)) in dst.chunks_exact_mut(2).zip(a.iter().zip(b)) {
            pair[0] = x;
            pair[1] = y;
        }
        return;
    }
    for (pair, (x, y)) in dst.chunks_exact_mut(4).zip(a.chunks_exact(2).zip(b.chunks_exact(2))) {
        let x = u16::from_le_bytes([x[0], x[1]]) << shift;
        let y = u16::from_le_bytes([y[0], y[1]]) << shift;
        pair[..2].copy_from_slice(&x.to_le_bytes());
        pair[2..].copy_from_slice(&y.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED: [SourcePixelFormat; 14] = [
        SourcePixelFormat::Nv12,
        SourcePixelFormat::Nv21,
        SourcePixelFormat::Yuv420p,
        SourcePixelFormat::Yuv420p10le,
        SourcePixelFormat::Yuv420p12le,
        SourcePixelFormat::Yuv422p,
        SourcePixelFormat::Yuv422p10le,
        SourcePixelFormat::Yuv422p12le,
        SourcePixelFormat::Yuv444p,
        SourcePixelFormat::Yuv444p10le,
        SourcePixelFormat::Yuv444p12le,
        SourcePixelFormat::P010le,
        SourcePixelFormat::P012le,
        SourcePixelFormat::P016le,
    ];

    fn plan(format: SourcePixelFormat, width: u32, height: u32) -> PixelFormatPlan {
        let Ok(plan) = PixelFormatPlan::configure(format, width, height) else {
            panic!("{format} {width}x{height} should configure");
        };
        plan
    }

    #[test]
    fn test_nv12_1080p_sizes() {
        let plan = plan(SourcePixelFormat::Nv12, 1920, 1080);
        assert_eq!(plan.output, OutputFormat::Nv12);
        assert_eq!(plan.y_plane_bytes, 2_073_600);
        assert_eq!(plan.uv_plane_bytes, 1_036_800);
        assert_eq!(plan.total_bytes, 3_110_400);
        assert!(!plan.swap_uv);
        assert!(plan.chroma_interleaved);
    }

    #[test]
    fn test_yuv420p_1080p_matches_nv12_geometry() {
        let planar = plan(SourcePixelFormat::Yuv420p, 1920, 1080);
        assert_eq!(planar.output, OutputFormat::Planar420);
        assert_eq!(planar.total_bytes, 3_110_400);
        assert!(!planar.chroma_interleaved);
    }

    #[test]
    fn test_classification() {
        assert_eq!(plan(SourcePixelFormat::Nv21, 16, 16).output, OutputFormat::Nv12);
        assert!(plan(SourcePixelFormat::Nv21, 16, 16).swap_uv);
        assert_eq!(plan(SourcePixelFormat::P010le, 16, 16).output, OutputFormat::Planar420);
        assert_eq!(plan(SourcePixelFormat::Yuv422p10le, 16, 16).output, OutputFormat::Planar422);
        assert_eq!(plan(SourcePixelFormat::Yuv444p12le, 16, 16).output, OutputFormat::Planar444);
        assert_eq!(OutputFormat::classify(SourcePixelFormat::Yuv410p), OutputFormat::Unsupported);
        assert_eq!(OutputFormat::classify(SourcePixelFormat::Yuv411p), OutputFormat::Unsupported);
        assert_eq!(OutputFormat::classify(SourcePixelFormat::Rgba), OutputFormat::Unsupported);
    }

    #[test]
    fn test_output_chroma_order() {
        assert!(!plan(SourcePixelFormat::Nv12, 4, 4).output_vu());
        // NV21 is swapped into U-first order by default
        assert!(!plan(SourcePixelFormat::Nv21, 4, 4).output_vu());
        assert!(!plan(SourcePixelFormat::Yuv420p, 4, 4).output_vu());
        assert!(plan(SourcePixelFormat::Nv12, 4, 4).with_swap_uv(true).output_vu());
        assert!(plan(SourcePixelFormat::Nv21, 4, 4).with_swap_uv(false).output_vu());
        assert!(plan(SourcePixelFormat::Yuv444p, 4, 4).with_swap_uv(true).output_vu());
    }

    #[test]
    fn test_unsupported_and_empty_fail() {
        assert!(matches!(
            PixelFormatPlan::configure(SourcePixelFormat::Rgba, 16, 16),
            Err(VideoError::UnsupportedFormat(_))
        ));
        assert_eq!(
            PixelFormatPlan::configure(SourcePixelFormat::Nv12, 0, 16),
            Err(VideoError::InvalidDimensions { width: 0, height: 16 })
        );
    }

    #[test]
    fn test_plans_are_deterministic_and_sum() {
        for format in SUPPORTED {
            for (w, h) in [(1, 1), (3, 5), (64, 64), (1921, 1081)] {
                let a = plan(format, w, h);
                let b = plan(format, w, h);
                assert_eq!(a, b);
                assert_eq!(a.total_bytes, a.y_plane_bytes + a.uv_plane_bytes);
                assert!(a.chroma_width >= 1 && a.chroma_height >= 1);
            }
        }
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let plan420 = plan(SourcePixelFormat::Yuv420p, 5, 3);
        assert_eq!((plan420.chroma_width, plan420.chroma_height), (3, 2));
        assert_eq!(plan420.uv_plane_bytes, 3 * 2 * 2);

        let plan422 = plan(SourcePixelFormat::Yuv422p10le, 5, 3);
        assert_eq!((plan422.chroma_width, plan422.chroma_height), (3, 3));
        assert_eq!(plan422.bytes_per_component, 2);
        assert_eq!(plan422.uv_plane_bytes, 3 * 3 * 2 * 2);
    }

    #[test]
    fn test_sample_shift() {
        assert_eq!(plan(SourcePixelFormat::Yuv420p10le, 4, 4).sample_shift(), 6);
        assert_eq!(plan(SourcePixelFormat::Yuv444p12le, 4, 4).sample_shift(), 4);
        assert_eq!(plan(SourcePixelFormat::P010le, 4, 4).sample_shift(), 0);
        assert_eq!(plan(SourcePixelFormat::Yuv420p, 4, 4).sample_shift(), 0);
    }

    #[test]
    fn test_pack_strips_stride_padding() {
        let plan = plan(SourcePixelFormat::Nv12, 4, 2);
        // stride 6: two bytes of padding per row
        let y = [1, 2, 3, 4, 0xEE, 0xEE, 5, 6, 7, 8, 0xEE, 0xEE];
        let uv = [10, 20, 30, 40, 0xEE, 0xEE];
        let picture = RawPicture {
            width: 4,
            height: 2,
            format: SourcePixelFormat::Nv12,
            timestamp: None,
            planes: vec![PlaneView { data: &y, stride: 6 }, PlaneView { data: &uv, stride: 6 }],
        };
        let mut out = Vec::new();
        let Ok(()) = plan.pack(&picture, &mut out) else {
            panic!("pack failed");
        };
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 20, 30, 40]);
    }

    #[test]
    fn test_pack_nv21_swaps_chroma() {
        let plan = plan(SourcePixelFormat::Nv21, 2, 2);
        let y = [1, 2, 3, 4];
        let vu = [20, 10];
        let picture = RawPicture {
            width: 2,
            height: 2,
            format: SourcePixelFormat::Nv21,
            timestamp: None,
            planes: vec![PlaneView { data: &y, stride: 2 }, PlaneView { data: &vu, stride: 2 }],
        };
        let mut out = Vec::new();
        assert!(plan.pack(&picture, &mut out).is_ok());
        assert_eq!(&out[4..], &[10, 20]);
    }

    #[test]
    fn test_pack_planar_interleaves_and_shifts() {
        let plan = plan(SourcePixelFormat::Yuv420p10le, 2, 2);
        let y: Vec<u8> = [1u16, 2, 3, 1023].iter().flat_map(|s| s.to_le_bytes()).collect();
        let u = 100u16.to_le_bytes();
        let v = 200u16.to_le_bytes();
        let picture = RawPicture {
            width: 2,
            height: 2,
            format: SourcePixelFormat::Yuv420p10le,
            timestamp: None,
            planes: vec![
                PlaneView { data: &y, stride: 4 },
                PlaneView { data: &u, stride: 2 },
                PlaneView { data: &v, stride: 2 },
            ],
        };
        let mut out = Vec::new();
        assert!(plan.pack(&picture, &mut out).is_ok());
        let samples: Vec<u16> = out.chunks_exact(2).map(|s| u16::from_le_bytes([s[0], s[1]])).collect();
        assert_eq!(samples, vec![1 << 6, 2 << 6, 3 << 6, 1023 << 6, 100 << 6, 200 << 6]);
    }

    #[test]
    fn test_pack_swap_override_on_planar() {
        let plan = plan(SourcePixelFormat::Yuv444p, 1, 1).with_swap_uv(true);
        let picture = RawPicture {
            width: 1,
            height: 1,
            format: SourcePixelFormat::Yuv444p,
            timestamp: None,
            planes: vec![
                PlaneView { data: &[9], stride: 1 },
                PlaneView { data: &[1], stride: 1 },
                PlaneView { data: &[2], stride: 1 },
            ],
        };
        let mut out = Vec::new();
        assert!(plan.pack(&picture, &mut out).is_ok());
        assert_eq!(out, vec![9, 2, 1]);
    }

    #[test]
    fn test_pack_rejects_short_plane() {
        let plan = plan(SourcePixelFormat::Nv12, 4, 4);
        let y = [0u8; 8];
        let uv = [0u8; 8];
        let picture = RawPicture {
            width: 4,
            height: 4,
            format: SourcePixelFormat::Nv12,
            timestamp: None,
            planes: vec![PlaneView { data: &y, stride: 4 }, PlaneView { data: &uv, stride: 4 }],
        };
        let mut out = Vec::new();
        assert!(matches!(plan.pack(&picture, &mut out), Err(VideoError::DecodeFailed(_))));
    }

    #[test]
    fn test_neutral_buffer() {
        let plan8 = plan(SourcePixelFormat::Nv12, 4, 4);
        assert!(plan8.neutral_buffer().iter().all(|&b| b == 0x80));
        let plan16 = plan(SourcePixelFormat::P010le, 4, 4);
        let buf = plan16.neutral_buffer();
        assert_eq!(buf.len(), plan16.total_bytes);
        assert!(buf.chunks_exact(2).all(|s| s == [0x00, 0x80]));
    }

    #[test]
    fn test_preferred_download_format() {
        assert_eq!(
            SourcePixelFormat::preferred_download(8, Some(SourcePixelFormat::Yuv420p)),
            SourcePixelFormat::Yuv420p
        );
        assert_eq!(SourcePixelFormat::preferred_download(8, None), SourcePixelFormat::Nv12);
        assert_eq!(SourcePixelFormat::preferred_download(10, None), SourcePixelFormat::P010le);
        assert_eq!(
            SourcePixelFormat::preferred_download(10, Some(SourcePixelFormat::Yuv411p)),
            SourcePixelFormat::P010le
        );
        assert_eq!(SourcePixelFormat::preferred_download(12, None), SourcePixelFormat::P012le);
        assert_eq!(SourcePixelFormat::preferred_download(16, None), SourcePixelFormat::P016le);
        assert_eq!(
            SourcePixelFormat::preferred_download(12, Some(SourcePixelFormat::Rgba)),
            SourcePixelFormat::Yuv444p12le
        );
    }

    #[test]
    fn test_detect_bit_depth() {
        assert_eq!(detect_bit_depth(Some(10), Some(8), None), 10);
        assert_eq!(detect_bit_depth(Some(0), Some(12), None), 12);
        assert_eq!(detect_bit_depth(None, None, Some(SourcePixelFormat::P010le)), 10);
        assert_eq!(detect_bit_depth(None, None, None), 8);
    }
}
