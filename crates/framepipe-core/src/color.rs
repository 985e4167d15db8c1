//! Colour metadata and CPU overlay compositing.
//!
//! Overlays (labels, frame-rate counters and the like) arrive as RGBA bitmaps.
//! [`YuvOverlay::from_rgba`] converts one into the stream's YUV space once, and
//! [`YuvOverlay::apply`] alpha-blends it into any normalized frame buffer.

use crate::pixel_format::PixelFormatPlan;

/// Matrix coefficients of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoColorSpace {
    Bt601,
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoColorRange {
    /// 16-235 luma, 16-240 chroma
    #[default]
    Limited,
    /// 0-255
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoColorInfo {
    pub space: VideoColorSpace,
    pub range: VideoColorRange,
}

impl VideoColorInfo {
    /// Resolves the colour description of a stream.
    ///
    /// Streams that do not signal their matrix are assumed BT.709 from 720
    /// lines up and BT.601 below.
    pub fn derive(signalled: Option<VideoColorSpace>, full_range: bool, height: u32) -> Self {
        let space = signalled.unwrap_or(if height >= 720 {
            VideoColorSpace::Bt709
        } else {
            VideoColorSpace::Bt601
        });
        let range = if full_range {
            VideoColorRange::Full
        } else {
            VideoColorRange::Limited
        };
        Self { space, range }
    }
}

struct YuvCoefficients {
    y: [f32; 3],
    u: [f32; 3],
    v: [f32; 3],
}

impl YuvCoefficients {
    fn for_space(space: VideoColorSpace) -> Self {
        match space {
            VideoColorSpace::Bt601 => Self {
                y: [0.299, 0.587, 0.114],
                u: [-0.168736, -0.331264, 0.5],
                v: [0.5, -0.418688, -0.081312],
            },
            VideoColorSpace::Bt709 => Self {
                y: [0.2126, 0.7152, 0.0722],
                u: [-0.114572, -0.385428, 0.5],
                v: [0.5, -0.454153, -0.045847],
            },
            VideoColorSpace::Bt2020 => Self {
                y: [0.2627, 0.6780, 0.0593],
                u: [-0.13963, -0.36037, 0.5],
                v: [0.5, -0.459786, -0.040214],
            },
        }
    }
}

fn dot(weights: [f32; 3], rgb: [f32; 3]) -> f32 {
    weights[0] * rgb[0] + weights[1] * rgb[1] + weights[2] * rgb[2]
}

fn luma_byte(value: f32, range: VideoColorRange) -> u8 {
    let value = value.clamp(0.0, 1.0);
    let scaled = match range {
        VideoColorRange::Full => value * 255.0,
        VideoColorRange::Limited => value * 219.0 + 16.0,
    };
    scaled.round().clamp(0.0, 255.0) as u8
}

fn chroma_byte(value: f32, range: VideoColorRange) -> u8 {
    let scaled = match range {
        VideoColorRange::Full => (value + 0.5) * 255.0,
        VideoColorRange::Limited => value * 224.0 + 128.0,
    };
    scaled.round().clamp(0.0, 255.0) as u8
}

/// An RGBA bitmap positioned on the frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RgbaBitmap {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// `width * height * 4` bytes, row-major, unpremultiplied
    pub pixels: Vec<u8>,
}

/// An overlay converted to YUV with per-sample alpha.
///
/// Chroma is stored at the subsampling of the layout it was built for, one
/// interleaved U/V pair per chroma block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YuvOverlay {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub chroma_div_x: u32,
    pub chroma_div_y: u32,
    pub uv_width: u32,
    pub uv_height: u32,
    pub y_plane: Vec<u8>,
    pub y_alpha: Vec<u8>,
    pub uv_plane: Vec<u8>,
    pub uv_alpha: Vec<u8>,
}

impl YuvOverlay {
    /// Converts `bitmap` for frames laid out by `plan`.
    ///
    /// Chroma of each block is the alpha-weighted mean of its visible pixels;
    /// block alpha is the summed pixel alpha capped at one.
    pub fn from_rgba(bitmap: &RgbaBitmap, color: VideoColorInfo, plan: &PixelFormatPlan) -> Self {
        let div_x = plan.chroma_div_x.max(1);
        let div_y = plan.chroma_div_y.max(1);
        let mut overlay = Self {
            width: bitmap.width,
            height: bitmap.height,
            offset_x: bitmap.offset_x,
            offset_y: bitmap.offset_y,
            chroma_div_x: div_x,
            chroma_div_y: div_y,
            ..Self::default()
        };

        let pixel_count = bitmap.width as usize * bitmap.height as usize;
        if pixel_count == 0 || bitmap.pixels.len() < pixel_count * 4 {
            return overlay;
        }

        overlay.uv_width = bitmap.width.div_ceil(div_x);
        overlay.uv_height = bitmap.height.div_ceil(div_y);
        let block_count = overlay.uv_width as usize * overlay.uv_height as usize;
        overlay.y_plane = vec![0; pixel_count];
        overlay.y_alpha = vec![0; pixel_count];
        overlay.uv_plane = vec![128; block_count * 2];
        overlay.uv_alpha = vec![0; block_count];

        let coeffs = YuvCoefficients::for_space(color.space);
        let mut acc_u = vec![0.0f32; block_count];
        let mut acc_v = vec![0.0f32; block_count];
        let mut acc_alpha = vec![0.0f32; block_count];

        for y in 0..bitmap.height {
            for x in 0..bitmap.width {
                let index = (y * bitmap.width + x) as usize;
                let px = &bitmap.pixels[index * 4..index * 4 + 4];
                overlay.y_alpha[index] = px[3];
                if px[3] == 0 {
                    continue;
                }

                let alpha = px[3] as f32 / 255.0;
                let rgb = [px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0];
                overlay.y_plane[index] = luma_byte(dot(coeffs.y, rgb), color.range);

                let block = ((y / div_y) * overlay.uv_width + x / div_x) as usize;
                acc_u[block] += alpha * chroma_byte(dot(coeffs.u, rgb), color.range) as f32;
                acc_v[block] += alpha * chroma_byte(dot(coeffs.v, rgb), color.range) as f32;
                acc_alpha[block] += alpha;
            }
        }

        for block in 0..block_count {
            let total = acc_alpha[block];
            overlay.uv_alpha[block] = (total.min(1.0) * 255.0).clamp(0.0, 255.0) as u8;
            if total > 0.0 {
                overlay.uv_plane[block * 2] = (acc_u[block] / total).clamp(0.0, 255.0) as u8;
                overlay.uv_plane[block * 2 + 1] = (acc_v[block] / total).clamp(0.0, 255.0) as u8;
            }
        }
        overlay
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.y_plane.is_empty()
    }

    /// Blends the overlay into `buffer`, a frame packed according to `plan`.
    ///
    /// Parts outside the frame are clipped. 16-bit layouts take the overlay's
    /// 8-bit values as the top byte of each MSB-aligned sample.
    pub fn apply(&self, plan: &PixelFormatPlan, buffer: &mut [u8]) {
        if self.is_empty() || buffer.len() < plan.total_bytes {
            return;
        }
        let (y_region, uv_region) = buffer[..plan.total_bytes].split_at_mut(plan.y_plane_bytes);
        let wide = plan.bytes_per_component == 2;
        // low bits below the significant depth stay zero
        let sample_mask = if plan.bit_depth >= 16 { u16::MAX } else { u16::MAX << (16 - plan.bit_depth) };

        for y in 0..self.height {
            let frame_y = self.offset_y + y;
            if frame_y >= plan.height {
                break;
            }
            for x in 0..self.width {
                let frame_x = self.offset_x + x;
                if frame_x >= plan.width {
                    break;
                }
                let index = (y * self.width + x) as usize;
                let alpha = self.y_alpha[index];
                if alpha == 0 {
                    continue;
                }
                let dst = (frame_y * plan.width + frame_x) as usize;
                blend_sample(y_region, dst, self.y_plane[index], alpha, wide, sample_mask);
            }
        }

        let chroma_x = self.offset_x / self.chroma_div_x;
        let chroma_y = self.offset_y / self.chroma_div_y;
        for by in 0..self.uv_height {
            let frame_by = chroma_y + by;
            if frame_by >= plan.chroma_height {
                break;
            }
            for bx in 0..self.uv_width {
                let frame_bx = chroma_x + bx;
                if frame_bx >= plan.chroma_width {
                    break;
                }
                let block = (by * self.uv_width + bx) as usize;
                let alpha = self.uv_alpha[block];
                if alpha == 0 {
                    continue;
                }
                let dst = ((frame_by * plan.chroma_width + frame_bx) * 2) as usize;
                let (first, second) = if plan.output_vu() { (1, 0) } else { (0, 1) };
                blend_sample(uv_region, dst, self.uv_plane[block * 2 + first], alpha, wide, sample_mask);
                blend_sample(uv_region, dst + 1, self.uv_plane[block * 2 + second], alpha, wide, sample_mask);
            }
        }
    }
}

fn blend(base: f32, overlay: f32, alpha: f32) -> f32 {
    alpha * overlay + (1.0 - alpha) * base + 0.5
}

/// Blends sample number `sample` of `region` towards `value`.
fn blend_sample(region: &mut [u8], sample: usize, value: u8, alpha: u8, wide: bool, mask: u16) {
    let alpha = alpha as f32 / 255.0;
    if !wide {
        if let Some(base) = region.get_mut(sample) {
            *base = blend(*base as f32, value as f32, alpha).clamp(0.0, 255.0) as u8;
        }
        return;
    }
    let Some(bytes) = region.get_mut(sample * 2..sample * 2 + 2) else {
        return;
    };
    let base = u16::from_le_bytes([bytes[0], bytes[1]]);
    let target = (value as u16) << 8;
    let mixed = blend(base as f32, target as f32, alpha).clamp(0.0, 65535.0) as u16 & mask;
    bytes.copy_from_slice(&mixed.to_le_bytes());
}
