//! Pixel format conversion utilities
//!
//! Everything handed to the RTC engine is packed RGB24. Conversions use
//! integer BT.601 limited-range coefficients.

use crate::error::{PublisherError, Result};
use crate::model::frame::{Frame, PixelFormat};

/// Mirroring applied after conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transform {
    pub hflip: bool,
    pub vflip: bool,
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        !self.hflip && !self.vflip
    }

    /// Mirror an RGB24 frame in place.
    pub fn apply(&self, frame: &mut Frame) {
        if self.is_identity() || frame.format != PixelFormat::Rgb24 {
            return;
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        let stride = width * 3;

        if self.vflip {
            for y in 0..height / 2 {
                let (top, bottom) = frame.data.split_at_mut((height - 1 - y) * stride);
                top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
            }
        }

        if self.hflip {
            for row in frame.data.chunks_exact_mut(stride) {
                for x in 0..width / 2 {
                    let (a, b) = (x * 3, (width - 1 - x) * 3);
                    for c in 0..3 {
                        row.swap(a + c, b + c);
                    }
                }
            }
        }
    }
}

/// Convert any supported frame to RGB24.
///
/// Fails when the buffer length does not match the declared size and layout.
pub fn to_rgb24(frame: Frame) -> Result<Frame> {
    if !frame.is_well_formed() {
        return Err(PublisherError::CaptureFailed(format!(
            "{:?} buffer of {} bytes does not match {}x{}",
            frame.format,
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let data = match frame.format {
        PixelFormat::Rgb24 => return Ok(frame),
        PixelFormat::Bgr24 => bgr24_to_rgb24(&frame.data),
        PixelFormat::Yuyv => yuyv_to_rgb24(&frame.data),
        PixelFormat::I420 => i420_to_rgb24(&frame.data, frame.width, frame.height),
    };

    Ok(Frame {
        data,
        format: PixelFormat::Rgb24,
        ..frame
    })
}

/// Drop the row padding of a buffer whose rows are `stride` bytes apart.
///
/// I420 chroma rows are taken to be `stride / 2` apart. Returns `None` when
/// the buffer is too short to hold every row.
pub fn pack_rows(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: usize,
) -> Option<Vec<u8>> {
    let row = format.row_len(width);
    let rows = height as usize;
    if stride <= row {
        return Some(data.to_vec());
    }

    let mut planes = vec![(row, stride, rows)];
    if format == PixelFormat::I420 {
        let chroma = ((width as usize).div_ceil(2), stride / 2, rows.div_ceil(2));
        planes.push(chroma);
        planes.push(chroma);
    }

    let mut out = Vec::with_capacity(format.buffer_len(width, height));
    let mut offset = 0;
    for (row, stride, rows) in planes {
        for r in 0..rows {
            let start = offset + r * stride;
            out.extend_from_slice(data.get(start..start + row)?);
        }
        offset += rows * stride;
    }
    Some(out)
}

fn bgr24_to_rgb24(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = bgr.to_vec();
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    rgb
}

fn yuyv_to_rgb24(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for quad in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn i420_to_rgb24(i420: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let (y_plane, chroma) = i420.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(cw * ch);

    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let c = (y / 2) * cw + x / 2;
            rgb.extend_from_slice(&yuv_to_rgb(y_plane[y * w + x], u_plane[c], v_plane[c]));
        }
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed RGB24 to planar I420 for the encoder.
///
/// Chroma is taken from the top-left pixel of each 2x2 block.
pub fn rgb24_to_i420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);

    let mut out = vec![0u8; w * h + cw * ch * 2];
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 3;
            let (r, g, b) = (rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32);

            y_plane[y * w + x] = clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);

            if y % 2 == 0 && x % 2 == 0 {
                let c = (y / 2) * cw + x / 2;
                u_plane[c] = clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
                v_plane[c] = clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame::new(data, width, height, PixelFormat::Rgb24)
    }

    #[test]
    fn test_rgb_passthrough() {
        let frame = rgb_frame(2, 1, vec![1, 2, 3, 4, 5, 6]);
        let out = to_rgb24(frame.clone()).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr24);
        let out = to_rgb24(frame).unwrap();
        assert_eq!(out.format, PixelFormat::Rgb24);
        assert_eq!(out.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // Y=16 is black, Y=235 is white, neutral chroma
        let frame = Frame::new(vec![16, 128, 235, 128], 2, 1, PixelFormat::Yuyv);
        let out = to_rgb24(frame).unwrap();
        assert_eq!(out.data, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_i420_gray() {
        let mut data = vec![126u8; 4];
        data.extend_from_slice(&[128, 128]);
        let frame = Frame::new(data, 2, 2, PixelFormat::I420);
        let out = to_rgb24(frame).unwrap();
        assert_eq!(out.data.len(), 12);
        assert!(out.data.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_wrong_size_is_capture_failure() {
        let frame = Frame::new(vec![0; 7], 2, 2, PixelFormat::Yuyv);
        assert!(matches!(
            to_rgb24(frame),
            Err(PublisherError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_hflip() {
        let mut frame = rgb_frame(2, 1, vec![1, 2, 3, 4, 5, 6]);
        Transform { hflip: true, vflip: false }.apply(&mut frame);
        assert_eq!(frame.data, vec![4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn test_vflip() {
        let mut frame = rgb_frame(1, 3, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
        Transform { hflip: false, vflip: true }.apply(&mut frame);
        assert_eq!(frame.data, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn test_pack_rows_strips_padding() {
        // 2x2 YUYV with 4 bytes of padding per row
        let data = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        let packed = pack_rows(&data, PixelFormat::Yuyv, 2, 2, 8).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(Frame::new(packed, 2, 2, PixelFormat::Yuyv).is_well_formed());
    }

    #[test]
    fn test_pack_rows_i420_planes() {
        // 2x2 I420, luma stride 4, chroma stride 2
        let data = [1, 2, 0, 0, 3, 4, 0, 0, 5, 0, 6, 0];
        let packed = pack_rows(&data, PixelFormat::I420, 2, 2, 4).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_pack_rows_unpadded_is_copy() {
        let data = [1, 2, 3, 4, 5, 6];
        assert_eq!(
            pack_rows(&data, PixelFormat::Rgb24, 2, 1, 6).unwrap(),
            data.to_vec()
        );
    }

    #[test]
    fn test_pack_rows_short_buffer() {
        assert!(pack_rows(&[0; 10], PixelFormat::Yuyv, 2, 2, 8).is_none());
    }

    #[test]
    fn test_rgb_to_i420_black() {
        let out = rgb24_to_i420(&[0; 12], 2, 2);
        assert_eq!(out.len(), 6);
        assert_eq!(&out[..4], &[16, 16, 16, 16]);
        assert_eq!(&out[4..], &[128, 128]);
    }
}
