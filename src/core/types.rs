//! Core value types that flow through the pipeline.
//!
//! A [`Frame`] is produced by a frame source, lent to a processor for one
//! upload and then dropped. Nothing downstream retains it.

use crate::core::error::FrameError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Width and height of a frame or image resource, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Bytes in one tightly packed RGBA8 row, saturating at `u32::MAX`.
    pub fn row_bytes(&self) -> u32 {
        self.width.saturating_mul(BYTES_PER_PIXEL)
    }

    /// Bytes in one tightly packed RGBA8 frame (`width * height * 4`).
    pub fn frame_bytes(&self) -> usize {
        (self.width as usize)
            .saturating_mul(BYTES_PER_PIXEL as usize)
            .saturating_mul(self.height as usize)
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Parse `WIDTHxHEIGHT` (e.g. `1920x1080`).
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.split_once(['x', 'X'])?;
        let res = Self::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
        res.is_valid().then_some(res)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One captured RGBA8 frame.
///
/// Rows are `stride` bytes apart; `stride` is at least `width * 4` and any
/// bytes past the active pixels of a row are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    /// Pixel data, RGBA byte order, row-major
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap tightly packed RGBA8 data (`stride == width * 4`).
    pub fn packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width.saturating_mul(BYTES_PER_PIXEL),
            data,
        }
    }

    /// Wrap RGBA8 data with an explicit row stride.
    pub fn with_stride(width: u32, height: u32, stride: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride,
            data,
        }
    }

    /// Create a frame filled with one color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL as usize)
            .collect();
        Self::packed(width, height, data)
    }

    /// Resolution of this frame.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Byte length this frame must have: `stride * height`.
    pub fn expected_len(&self) -> usize {
        (self.stride as usize).saturating_mul(self.height as usize)
    }

    /// RGBA value of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride as usize + x as usize * BYTES_PER_PIXEL as usize;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    /// Check that this frame can be uploaded to a processor configured for
    /// `expected`.
    ///
    /// A frame is accepted only when its dimensions equal `expected`, its
    /// stride covers a full row, and its buffer holds exactly
    /// `stride * height` bytes. Truncated or oversized buffers are rejected.
    pub fn check_against(&self, expected: Resolution) -> Result<(), FrameError> {
        let dims_match = self.resolution() == expected;
        let stride_ok = self
            .width
            .checked_mul(BYTES_PER_PIXEL)
            .is_some_and(|row| self.stride >= row);
        if dims_match && stride_ok && self.data.len() == self.expected_len() {
            return Ok(());
        }
        Err(FrameError::SizeMismatch {
            expected,
            expected_len: expected.frame_bytes(),
            actual: self.resolution(),
            actual_len: self.data.len(),
            stride: self.stride,
        })
    }

    /// Copy the active pixels of every row into `dst`, whose rows are
    /// `dst_stride` bytes apart. Padding in `dst` is left untouched.
    pub fn write_rows_into(&self, dst: &mut [u8], dst_stride: usize) {
        copy_rows(
            &self.data,
            self.stride as usize,
            dst,
            dst_stride,
            self.resolution().row_bytes() as usize,
            self.height as usize,
        );
    }
}

/// Copy `rows` rows of `row_bytes` bytes between buffers with different
/// row strides.
pub fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    if src_stride == row_bytes && dst_stride == row_bytes {
        let len = row_bytes * rows;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for y in 0..rows {
        let s = y * src_stride;
        let d = y * dst_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("1920x1080"), Some(Resolution::new(1920, 1080)));
        assert_eq!(Resolution::parse("64X32"), Some(Resolution::new(64, 32)));
        assert_eq!(Resolution::parse("0x10"), None);
        assert_eq!(Resolution::parse("abc"), None);
    }

    #[test]
    fn test_resolution_sizes() {
        let res = Resolution::new(64, 48);
        assert_eq!(res.row_bytes(), 256);
        assert_eq!(res.frame_bytes(), 64 * 48 * 4);
        assert_eq!(res.to_string(), "64x48");
    }

    #[test]
    fn test_check_accepts_packed_frame() {
        let frame = Frame::filled(8, 4, [1, 2, 3, 255]);
        assert!(frame.check_against(Resolution::new(8, 4)).is_ok());
    }

    #[test]
    fn test_check_rejects_truncated_buffer() {
        let mut frame = Frame::filled(8, 4, [0; 4]);
        frame.data.pop();
        let err = frame.check_against(Resolution::new(8, 4)).unwrap_err();
        assert!(matches!(err, FrameError::SizeMismatch { actual_len: 127, .. }));
    }

    #[test]
    fn test_check_rejects_oversized_buffer() {
        let mut frame = Frame::filled(8, 4, [0; 4]);
        frame.data.extend_from_slice(&[0; 4]);
        assert!(frame.check_against(Resolution::new(8, 4)).is_err());
    }

    #[test]
    fn test_check_rejects_wrong_dimensions() {
        let frame = Frame::filled(8, 4, [0; 4]);
        assert!(frame.check_against(Resolution::new(4, 8)).is_err());
    }

    #[test]
    fn test_check_rejects_overflowing_width() {
        let frame = Frame::with_stride(1 << 30, 1, 0, vec![]);
        let err = frame.check_against(Resolution::new(8, 8)).unwrap_err();
        assert!(matches!(err, FrameError::SizeMismatch { actual_len: 0, stride: 0, .. }));

        // Matching dimensions do not rescue a width whose row overflows u32.
        let res = Resolution::new(u32::MAX, 1);
        let frame = Frame::with_stride(u32::MAX, 1, u32::MAX, vec![]);
        assert!(frame.check_against(res).is_err());
        assert_eq!(res.row_bytes(), u32::MAX);
    }

    #[test]
    fn test_check_accepts_declared_stride() {
        let frame = Frame::with_stride(2, 2, 12, vec![0; 24]);
        assert!(frame.check_against(Resolution::new(2, 2)).is_ok());

        let short_stride = Frame::with_stride(2, 2, 4, vec![0; 8]);
        assert!(short_stride.check_against(Resolution::new(2, 2)).is_err());
    }

    #[test]
    fn test_write_rows_compacts_stride() {
        // Two pixels per row, 4 bytes of padding per row.
        let frame = Frame::with_stride(
            2,
            2,
            12,
            vec![
                1, 1, 1, 1, 2, 2, 2, 2, 9, 9, 9, 9, //
                3, 3, 3, 3, 4, 4, 4, 4, 9, 9, 9, 9,
            ],
        );
        let mut dst = vec![0u8; 16];
        frame.write_rows_into(&mut dst, 8);
        assert_eq!(dst, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4]);
    }

    #[test]
    fn test_write_rows_pads_destination() {
        let frame = Frame::filled(1, 2, [7, 7, 7, 7]);
        let mut dst = vec![0u8; 16];
        frame.write_rows_into(&mut dst, 8);
        assert_eq!(&dst[0..4], &[7; 4]);
        assert_eq!(&dst[4..8], &[0; 4]);
        assert_eq!(&dst[8..12], &[7; 4]);
    }

    #[test]
    fn test_pixel_accessor_honours_stride() {
        let frame = Frame::with_stride(1, 2, 8, vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0]);
        assert_eq!(frame.pixel(0, 1), [5, 6, 7, 8]);
    }
}
