// PIXEL CONVERT - Decoder output to planar 4:2:0
//
// Decoders hand us whatever layout they produce (I420, NV12, 4:4:4, RGB).
// The presenter only understands one layout: three planes, full-size luma
// plus two half-size chroma planes (YUV420P / I420).
// This module bridges them with a bilinear resampler, so it also covers
// the rescale half of what libswscale would do.
//
// The converter is built once per stream and owns every lookup table and
// scratch plane it needs. The destination buffer belongs to the caller and
// is overwritten in place on every call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    // YUV planar (common decoder output)
    YUV420P, // Y plane, U plane (quarter size), V plane (quarter size)
    YUV444P, // Y plane, U plane (full size), V plane (full size)

    // YUV semi-planar (GPU decoder output)
    NV12, // Y plane, interleaved UV plane

    // RGB
    RGB24,  // 8-bit per channel, packed
    RGBA32, // 8-bit per channel + alpha, packed
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, 0 for planar
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::RGB24 => 3,
            Self::RGBA32 => 4,
            _ => 0, // Planar formats
        }
    }

    /// Number of planes stored in a frame of this format
    pub fn plane_count(&self) -> usize {
        match self {
            Self::YUV420P | Self::YUV444P => 3,
            Self::NV12 => 2,
            Self::RGB24 | Self::RGBA32 => 1,
        }
    }

    /// Calculate buffer size needed (tightly packed, no row padding)
    pub fn buffer_size(&self, width: usize, height: usize) -> usize {
        let (cw, ch) = chroma_dimensions(width, height);
        match self {
            Self::YUV420P | Self::NV12 => width * height + 2 * cw * ch,
            Self::YUV444P => width * height * 3,
            Self::RGB24 => width * height * 3,
            Self::RGBA32 => width * height * 4,
        }
    }

    /// Row length in bytes of each plane when tightly packed
    pub fn packed_linesizes(&self, width: usize) -> [usize; 3] {
        let cw = (width + 1) / 2;
        match self {
            Self::YUV420P => [width, cw, cw],
            Self::YUV444P => [width, width, width],
            Self::NV12 => [width, cw * 2, 0],
            Self::RGB24 => [width * 3, 0, 0],
            Self::RGBA32 => [width * 4, 0, 0],
        }
    }

    /// Row count of each plane
    pub fn plane_heights(&self, height: usize) -> [usize; 3] {
        let ch = (height + 1) / 2;
        match self {
            Self::YUV420P => [height, ch, ch],
            Self::YUV444P => [height, height, height],
            Self::NV12 => [height, ch, 0],
            Self::RGB24 | Self::RGBA32 => [height, 0, 0],
        }
    }

    pub fn is_rgb(&self) -> bool {
        matches!(self, Self::RGB24 | Self::RGBA32)
    }
}

/// Chroma plane size for 4:2:0 subsampling. Odd sizes round up.
pub fn chroma_dimensions(width: usize, height: usize) -> (usize, usize) {
    ((width + 1) / 2, (height + 1) / 2)
}

// ============================================================================
// Color Matrix
// ============================================================================

/// BT.601 luma weights (Wr, Wb); Wg = 1 - Wr - Wb
const BT601_WR: f32 = 0.299;
const BT601_WB: f32 = 0.114;

/// Limited-range BT.601 RGB to YUV matrix, rows are Y, Cb, Cr
fn bt601_rgb_to_yuv_matrix() -> [[f32; 3]; 3] {
    let (wr, wb) = (BT601_WR, BT601_WB);
    let wg = 1.0 - wr - wb;

    // Y  = Wr*R + Wg*G + Wb*B
    // Cb = (B - Y) / (2 * (1 - Wb))
    // Cr = (R - Y) / (2 * (1 - Wr))
    // then squeezed into 219 (luma) and 224 (chroma) code values
    let y_scale = 219.0 / 255.0;
    let c_scale = 224.0 / 255.0;
    let cb_div = 2.0 * (1.0 - wb);
    let cr_div = 2.0 * (1.0 - wr);

    [
        [wr * y_scale, wg * y_scale, wb * y_scale],
        [
            -wr / cb_div * c_scale,
            -wg / cb_div * c_scale,
            (1.0 - wb) / cb_div * c_scale,
        ],
        [
            (1.0 - wr) / cr_div * c_scale,
            -wg / cr_div * c_scale,
            -wb / cr_div * c_scale,
        ],
    ]
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported conversion: {0:?} -> YUV420P")]
    Unsupported(PixelFormat),
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("Format mismatch: converter expects {expected:?}, frame is {actual:?}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },
    #[error("Size mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    SizeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),
}

// ============================================================================
// Video Frame
// ============================================================================

/// A raw frame in any supported layout, with per-plane strides.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub linesize: [usize; 3], // Stride for each plane
    pub offsets: [usize; 3],  // Start of each plane inside `data`
    pub pts_us: i64,
}

impl VideoFrame {
    /// Allocate a tightly packed, zeroed frame
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        let mut frame = Self {
            width: 0,
            height: 0,
            format,
            data: Vec::new(),
            linesize: [0; 3],
            offsets: [0; 3],
            pts_us: 0,
        };
        frame.reshape(width, height, format);
        frame
    }

    /// Change geometry, reusing the allocation when it is large enough
    pub fn reshape(&mut self, width: usize, height: usize, format: PixelFormat) {
        let linesize = format.packed_linesizes(width);
        let heights = format.plane_heights(height);

        let mut offsets = [0usize; 3];
        let mut total = 0usize;
        for plane in 0..3 {
            offsets[plane] = total;
            total += linesize[plane] * heights[plane];
        }

        self.width = width;
        self.height = height;
        self.format = format;
        self.linesize = linesize;
        self.offsets = offsets;
        self.data.resize(total, 0);
    }

    /// Get plane data slice
    pub fn plane(&self, index: usize) -> &[u8] {
        if index >= self.format.plane_count() {
            return &[];
        }
        let start = self.offsets[index];
        let end = if index + 1 < self.format.plane_count() {
            self.offsets[index + 1]
        } else {
            self.data.len()
        };
        self.data.get(start..end).unwrap_or(&[])
    }

    /// Get mutable plane data slice
    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        if index >= self.format.plane_count() {
            return &mut [];
        }
        let start = self.offsets[index];
        let end = if index + 1 < self.format.plane_count() {
            self.offsets[index + 1]
        } else {
            self.data.len()
        };
        match self.data.get_mut(start..end) {
            Some(plane) => plane,
            None => &mut [],
        }
    }
}

/// Fixed-size I420 output buffer.
///
/// Allocated once per stream; `convert` overwrites it in place and its
/// length never changes afterwards.
#[derive(Debug, Clone)]
pub struct ConvertedFrame {
    frame: VideoFrame,
}

impl ConvertedFrame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            frame: VideoFrame::new(width, height, PixelFormat::YUV420P),
        }
    }

    pub fn width(&self) -> usize {
        self.frame.width
    }

    pub fn height(&self) -> usize {
        self.frame.height
    }

    pub fn pts_us(&self) -> i64 {
        self.frame.pts_us
    }

    /// Total byte size of all three planes
    pub fn byte_len(&self) -> usize {
        self.frame.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame.data
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.frame.linesize.get(plane).copied().unwrap_or(0)
    }

    /// (Y, U, V) planes
    pub fn planes(&self) -> [&[u8]; 3] {
        [self.frame.plane(0), self.frame.plane(1), self.frame.plane(2)]
    }

    fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let u_start = self.frame.offsets[1];
        let v_start = self.frame.offsets[2];
        let (y, rest) = self.frame.data.split_at_mut(u_start);
        let (u, v) = rest.split_at_mut(v_start - u_start);
        (y, u, v)
    }
}

// ============================================================================
// Scaler (resize)
// ============================================================================

/// Fixed-point weights are in 1/256ths
const FRAC_BITS: u32 = 8;
const FRAC_ONE: u32 = 1 << FRAC_BITS;

#[derive(Debug, Clone, Copy)]
struct Tap {
    i0: usize,
    i1: usize,
    frac: u32, // weight of i1
}

/// One sample grid inside a source buffer. `step` and `offset` let the
/// same scaler walk interleaved data (NV12 chroma, packed RGB).
#[derive(Debug, Clone, Copy)]
struct PlaneView<'a> {
    data: &'a [u8],
    stride: usize,
    step: usize,
    offset: usize,
}

/// Plane resampler with pre-computed source taps for every output pixel.
#[derive(Debug, Clone)]
pub struct Scaler {
    src_width: usize,
    src_height: usize,
    dst_width: usize,
    dst_height: usize,
    x_taps: Vec<Tap>,
    y_taps: Vec<Tap>,
    identity: bool,
}

impl Scaler {
    pub fn new(
        src_width: usize,
        src_height: usize,
        dst_width: usize,
        dst_height: usize,
    ) -> Self {
        Self {
            src_width,
            src_height,
            dst_width,
            dst_height,
            x_taps: build_taps(src_width, dst_width),
            y_taps: build_taps(src_height, dst_height),
            identity: src_width == dst_width && src_height == dst_height,
        }
    }

    fn required_len(&self, view: &PlaneView<'_>) -> usize {
        if self.src_height == 0 || self.src_width == 0 {
            return 0;
        }
        (self.src_height - 1) * view.stride + (self.src_width - 1) * view.step + view.offset + 1
    }

    fn scale(&self, src: PlaneView<'_>, dst: &mut [u8], dst_stride: usize) -> Result<(), ConvertError> {
        if src.data.len() < self.required_len(&src) {
            return Err(ConvertError::ConversionFailed(format!(
                "source plane holds {} bytes, needs {}",
                src.data.len(),
                self.required_len(&src)
            )));
        }
        if dst.len() < dst_stride * self.dst_height {
            return Err(ConvertError::ConversionFailed(format!(
                "destination plane holds {} bytes, needs {}",
                dst.len(),
                dst_stride * self.dst_height
            )));
        }

        if self.identity && src.step == 1 && src.offset == 0 {
            for y in 0..self.dst_height {
                let src_row = &src.data[y * src.stride..y * src.stride + self.src_width];
                dst[y * dst_stride..y * dst_stride + self.dst_width].copy_from_slice(src_row);
            }
            return Ok(());
        }

        for (dst_y, ty) in self.y_taps.iter().enumerate() {
            let row0 = ty.i0 * src.stride + src.offset;
            let row1 = ty.i1 * src.stride + src.offset;
            let dst_row = &mut dst[dst_y * dst_stride..dst_y * dst_stride + self.dst_width];

            for (out, tx) in dst_row.iter_mut().zip(&self.x_taps) {
                let c0 = tx.i0 * src.step;
                let c1 = tx.i1 * src.step;

                let top = lerp(src.data[row0 + c0], src.data[row0 + c1], tx.frac);
                let bottom = lerp(src.data[row1 + c0], src.data[row1 + c1], tx.frac);
                let v = (top * (FRAC_ONE - ty.frac) + bottom * ty.frac + (1 << (2 * FRAC_BITS - 1)))
                    >> (2 * FRAC_BITS);
                *out = v.min(255) as u8;
            }
        }

        Ok(())
    }
}

#[inline]
fn lerp(a: u8, b: u8, frac: u32) -> u32 {
    a as u32 * (FRAC_ONE - frac) + b as u32 * frac
}

/// Sample centers are aligned: src = (dst + 0.5) * ratio - 0.5
fn build_taps(src_len: usize, dst_len: usize) -> Vec<Tap> {
    if src_len == 0 {
        return Vec::new();
    }
    let ratio = src_len as f64 / dst_len.max(1) as f64;
    let last = src_len - 1;

    (0..dst_len)
        .map(|d| {
            let pos = ((d as f64 + 0.5) * ratio - 0.5).max(0.0);
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = ((pos - i0 as f64) * FRAC_ONE as f64).round() as u32;
            Tap {
                i0,
                i1,
                frac: frac.min(FRAC_ONE),
            }
        })
        .collect()
}

// ============================================================================
// Converter
// ============================================================================

pub struct PixelConverter {
    src_format: PixelFormat,
    src_width: usize,
    src_height: usize,
    dst_width: usize,
    dst_height: usize,
    luma: Scaler,
    chroma: Scaler,
    // Fixed-point RGB -> YUV rows, scaled by 2^16
    rgb_matrix: [[i32; 3]; 3],
    // Full-resolution Y/U/V scratch for packed RGB sources
    scratch: Vec<u8>,
}

impl PixelConverter {
    pub fn new(
        src_format: PixelFormat,
        src_width: usize,
        src_height: usize,
        dst_width: usize,
        dst_height: usize,
    ) -> Result<Self, ConvertError> {
        for (width, height) in [(src_width, src_height), (dst_width, dst_height)] {
            if width == 0 || height == 0 {
                return Err(ConvertError::InvalidDimensions { width, height });
            }
        }

        let (src_cw, src_ch) = match src_format {
            PixelFormat::YUV420P | PixelFormat::NV12 => chroma_dimensions(src_width, src_height),
            PixelFormat::YUV444P | PixelFormat::RGB24 | PixelFormat::RGBA32 => (src_width, src_height),
        };
        let (dst_cw, dst_ch) = chroma_dimensions(dst_width, dst_height);

        let matrix = bt601_rgb_to_yuv_matrix();
        let mut rgb_matrix = [[0i32; 3]; 3];
        for (row, src_row) in rgb_matrix.iter_mut().zip(matrix.iter()) {
            for (coef, value) in row.iter_mut().zip(src_row.iter()) {
                *coef = (value * 65536.0).round() as i32;
            }
        }

        let scratch = if src_format.is_rgb() {
            vec![0u8; src_width * src_height * 3]
        } else {
            Vec::new()
        };

        Ok(Self {
            src_format,
            src_width,
            src_height,
            dst_width,
            dst_height,
            luma: Scaler::new(src_width, src_height, dst_width, dst_height),
            chroma: Scaler::new(src_cw, src_ch, dst_cw, dst_ch),
            rgb_matrix,
            scratch,
        })
    }

    /// Convert a frame into the caller's reusable buffer
    pub fn convert(&mut self, src: &VideoFrame, dst: &mut ConvertedFrame) -> Result<(), ConvertError> {
        if src.format != self.src_format {
            return Err(ConvertError::FormatMismatch {
                expected: self.src_format,
                actual: src.format,
            });
        }
        if src.width != self.src_width || src.height != self.src_height {
            return Err(ConvertError::SizeMismatch {
                expected_width: self.src_width,
                expected_height: self.src_height,
                width: src.width,
                height: src.height,
            });
        }
        if dst.width() != self.dst_width || dst.height() != self.dst_height {
            return Err(ConvertError::SizeMismatch {
                expected_width: self.dst_width,
                expected_height: self.dst_height,
                width: dst.width(),
                height: dst.height(),
            });
        }

        let y_stride = dst.stride(0);
        let c_stride = dst.stride(1);
        let (y_dst, u_dst, v_dst) = dst.planes_mut();

        match self.src_format {
            PixelFormat::YUV420P | PixelFormat::YUV444P => {
                self.luma.scale(plane_view(src, 0, 1, 0), y_dst, y_stride)?;
                self.chroma.scale(plane_view(src, 1, 1, 0), u_dst, c_stride)?;
                self.chroma.scale(plane_view(src, 2, 1, 0), v_dst, c_stride)?;
            }
            PixelFormat::NV12 => {
                self.luma.scale(plane_view(src, 0, 1, 0), y_dst, y_stride)?;
                self.chroma.scale(plane_view(src, 1, 2, 0), u_dst, c_stride)?;
                self.chroma.scale(plane_view(src, 1, 2, 1), v_dst, c_stride)?;
            }
            PixelFormat::RGB24 | PixelFormat::RGBA32 => {
                self.rgb_to_yuv444(src)?;
                let plane_len = self.src_width * self.src_height;
                let (y_src, rest) = self.scratch.split_at(plane_len);
                let (u_src, v_src) = rest.split_at(plane_len);
                let view = |data| PlaneView {
                    data,
                    stride: self.src_width,
                    step: 1,
                    offset: 0,
                };
                self.luma.scale(view(y_src), y_dst, y_stride)?;
                self.chroma.scale(view(u_src), u_dst, c_stride)?;
                self.chroma.scale(view(v_src), v_dst, c_stride)?;
            }
        }

        dst.frame.pts_us = src.pts_us;
        Ok(())
    }

    fn rgb_to_yuv444(&mut self, src: &VideoFrame) -> Result<(), ConvertError> {
        let bpp = self.src_format.bytes_per_pixel();
        let width = self.src_width;
        let height = self.src_height;
        let stride = src.linesize[0];
        let rgb = src.plane(0);

        if stride < width * bpp || rgb.len() < stride * (height - 1) + width * bpp {
            return Err(ConvertError::ConversionFailed(format!(
                "RGB plane holds {} bytes for {}x{} at stride {}",
                rgb.len(),
                width,
                height,
                stride
            )));
        }

        let m = self.rgb_matrix;
        let plane_len = width * height;
        let (y_out, rest) = self.scratch.split_at_mut(plane_len);
        let (u_out, v_out) = rest.split_at_mut(plane_len);

        for y in 0..height {
            let row = &rgb[y * stride..y * stride + width * bpp];
            for (x, px) in row.chunks_exact(bpp).enumerate() {
                let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
                let luma = (m[0][0] * r + m[0][1] * g + m[0][2] * b + (1 << 15)) >> 16;
                let cb = (m[1][0] * r + m[1][1] * g + m[1][2] * b + (1 << 15)) >> 16;
                let cr = (m[2][0] * r + m[2][1] * g + m[2][2] * b + (1 << 15)) >> 16;

                let idx = y * width + x;
                y_out[idx] = (luma + 16).clamp(0, 255) as u8;
                u_out[idx] = (cb + 128).clamp(0, 255) as u8;
                v_out[idx] = (cr + 128).clamp(0, 255) as u8;
            }
        }

        Ok(())
    }
}

fn plane_view(frame: &VideoFrame, plane: usize, step: usize, offset: usize) -> PlaneView<'_> {
    PlaneView {
        data: frame.plane(plane),
        stride: frame.linesize[plane],
        step,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_i420(width: usize, height: usize) -> VideoFrame {
        let mut frame = VideoFrame::new(width, height, PixelFormat::YUV420P);
        for (i, px) in frame.plane_mut(0).iter_mut().enumerate() {
            *px = (i % 251) as u8;
        }
        frame.plane_mut(1).fill(90);
        frame.plane_mut(2).fill(200);
        frame
    }

    #[test]
    fn buffer_size_is_three_halves_for_420() {
        assert_eq!(PixelFormat::YUV420P.buffer_size(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(PixelFormat::YUV420P.buffer_size(64, 48), 64 * 48 * 3 / 2);
        // odd sizes round the chroma planes up
        assert_eq!(PixelFormat::YUV420P.buffer_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn identity_conversion_copies_planes() {
        let src = gradient_i420(64, 48);
        let mut converter =
            PixelConverter::new(PixelFormat::YUV420P, 64, 48, 64, 48).unwrap();
        let mut dst = ConvertedFrame::new(64, 48);

        converter.convert(&src, &mut dst).unwrap();

        assert_eq!(dst.planes()[0], src.plane(0));
        assert_eq!(dst.planes()[1], src.plane(1));
        assert_eq!(dst.planes()[2], src.plane(2));
    }

    #[test]
    fn output_buffer_is_never_reallocated() {
        let mut converter =
            PixelConverter::new(PixelFormat::YUV420P, 32, 16, 32, 16).unwrap();
        let mut dst = ConvertedFrame::new(32, 16);
        let ptr = dst.as_bytes().as_ptr();

        for pts in 0..10 {
            let mut src = gradient_i420(32, 16);
            src.pts_us = pts * 40_000;
            converter.convert(&src, &mut dst).unwrap();
            assert_eq!(dst.byte_len(), 32 * 16 * 3 / 2);
            assert_eq!(dst.as_bytes().as_ptr(), ptr);
            assert_eq!(dst.pts_us(), pts * 40_000);
        }
    }

    #[test]
    fn honours_source_stride_padding() {
        let mut src = gradient_i420(4, 2);
        // widen every row to 8 bytes, padding filled with garbage
        let y: Vec<u8> = src.plane(0).to_vec();
        let mut padded = Vec::new();
        for row in y.chunks(4) {
            padded.extend_from_slice(row);
            padded.extend_from_slice(&[0xEE; 4]);
        }
        let u = src.plane(1).to_vec();
        let v = src.plane(2).to_vec();
        let y_len = padded.len();
        padded.extend_from_slice(&u);
        padded.extend_from_slice(&v);
        src.data = padded;
        src.linesize = [8, 2, 2];
        src.offsets = [0, y_len, y_len + u.len()];

        let mut converter =
            PixelConverter::new(PixelFormat::YUV420P, 4, 2, 4, 2).unwrap();
        let mut dst = ConvertedFrame::new(4, 2);
        converter.convert(&src, &mut dst).unwrap();

        assert_eq!(dst.planes()[0], &y[..]);
        assert!(!dst.planes()[0].contains(&0xEE));
    }

    #[test]
    fn nv12_chroma_is_deinterleaved() {
        let mut src = VideoFrame::new(4, 4, PixelFormat::NV12);
        src.plane_mut(0).fill(100);
        for pair in src.plane_mut(1).chunks_exact_mut(2) {
            pair[0] = 60;
            pair[1] = 180;
        }

        let mut converter =
            PixelConverter::new(PixelFormat::NV12, 4, 4, 4, 4).unwrap();
        let mut dst = ConvertedFrame::new(4, 4);
        converter.convert(&src, &mut dst).unwrap();

        let [y, u, v] = dst.planes();
        assert!(y.iter().all(|&p| p == 100));
        assert!(u.iter().all(|&p| p == 60));
        assert!(v.iter().all(|&p| p == 180));
    }

    #[test]
    fn yuv444_chroma_is_downsampled() {
        let mut src = VideoFrame::new(4, 2, PixelFormat::YUV444P);
        src.plane_mut(0).fill(50);
        // left half 0, right half 200 in U; V constant
        for row in src.plane_mut(1).chunks_exact_mut(4) {
            row.copy_from_slice(&[0, 0, 200, 200]);
        }
        src.plane_mut(2).fill(128);

        let mut converter =
            PixelConverter::new(PixelFormat::YUV444P, 4, 2, 4, 2).unwrap();
        let mut dst = ConvertedFrame::new(4, 2);
        converter.convert(&src, &mut dst).unwrap();

        let [_, u, v] = dst.planes();
        assert_eq!(u, &[0, 200]);
        assert_eq!(v, &[128, 128]);
    }

    #[test]
    fn rgb_white_and_black_hit_limited_range() {
        let mut src = VideoFrame::new(2, 2, PixelFormat::RGB24);
        src.plane_mut(0).copy_from_slice(&[
            255, 255, 255, 255, 255, 255, //
            0, 0, 0, 0, 0, 0,
        ]);

        let mut converter =
            PixelConverter::new(PixelFormat::RGB24, 2, 2, 2, 2).unwrap();
        let mut dst = ConvertedFrame::new(2, 2);
        converter.convert(&src, &mut dst).unwrap();

        let [y, u, v] = dst.planes();
        assert_eq!(y, &[235, 235, 16, 16]);
        // neutral grey averages stay neutral
        assert_eq!(u, &[128]);
        assert_eq!(v, &[128]);
    }

    #[test]
    fn bilinear_upscale_interpolates() {
        let mut src = VideoFrame::new(2, 2, PixelFormat::YUV420P);
        src.plane_mut(0).copy_from_slice(&[0, 255, 0, 255]);
        src.plane_mut(1).fill(128);
        src.plane_mut(2).fill(128);

        let mut converter =
            PixelConverter::new(PixelFormat::YUV420P, 2, 2, 4, 2).unwrap();
        let mut dst = ConvertedFrame::new(4, 2);
        converter.convert(&src, &mut dst).unwrap();

        let row = &dst.planes()[0][..4];
        assert_eq!(row[0], 0);
        assert_eq!(row[3], 255);
        assert!(row[1] > 0 && row[1] < row[2] && row[2] < 255);
    }

    #[test]
    fn rejects_mismatched_frames() {
        let mut converter =
            PixelConverter::new(PixelFormat::YUV420P, 8, 8, 8, 8).unwrap();
        let mut dst = ConvertedFrame::new(8, 8);

        let wrong_size = VideoFrame::new(4, 4, PixelFormat::YUV420P);
        assert!(matches!(
            converter.convert(&wrong_size, &mut dst),
            Err(ConvertError::SizeMismatch { .. })
        ));

        let wrong_format = VideoFrame::new(8, 8, PixelFormat::NV12);
        assert!(matches!(
            converter.convert(&wrong_format, &mut dst),
            Err(ConvertError::FormatMismatch { .. })
        ));

        let mut truncated = VideoFrame::new(8, 8, PixelFormat::YUV420P);
        truncated.data.truncate(10);
        assert!(matches!(
            converter.convert(&truncated, &mut dst),
            Err(ConvertError::ConversionFailed(_))
        ));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            PixelConverter::new(PixelFormat::YUV420P, 0, 8, 0, 8),
            Err(ConvertError::InvalidDimensions { .. })
        ));
    }
}
