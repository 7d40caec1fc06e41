//! Owned grayscale frames.
//!
//! A [`Frame`] is always a private copy. Drivers lend their ring-buffer slot
//! only for the duration of a callback and [`Frame::from_strided`] copies the
//! rows out of it, dropping any row padding on the way.

use image::GrayImage;
use thiserror::Error;

/// Errors building a frame from a raw buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Row stride {stride} is smaller than frame width {width}")]
    InvalidStride { stride: u32, width: u32 },

    #[error("Buffer holds {actual} bytes, {needed} needed")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Frame has zero size")]
    Empty,
}

/// A grayscale frame with capture metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: GrayImage,
    /// Capture timestamp in microseconds since the Unix epoch.
    timestamp_us: u64,
    /// Per-camera capture sequence number.
    sequence: u64,
}

impl Frame {
    /// Wrap an already-owned image.
    pub fn new(image: GrayImage, timestamp_us: u64, sequence: u64) -> Self {
        Self {
            image,
            timestamp_us,
            sequence,
        }
    }

    /// Copy a (possibly padded) 8-bit buffer into a new packed frame.
    pub fn from_strided(
        data: &[u8],
        width: u32,
        height: u32,
        stride: u32,
        timestamp_us: u64,
        sequence: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        if stride < width {
            return Err(FrameError::InvalidStride { stride, width });
        }

        let needed = stride as usize * (height as usize - 1) + width as usize;
        if data.len() < needed {
            return Err(FrameError::BufferTooSmall {
                needed,
                actual: data.len(),
            });
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in data.chunks(stride as usize).take(height as usize) {
            pixels.extend_from_slice(&row[..width as usize]);
        }

        // Length is exactly width * height, so this cannot fail.
        let image = GrayImage::from_raw(width, height, pixels).ok_or(FrameError::BufferTooSmall {
            needed,
            actual: data.len(),
        })?;

        Ok(Self::new(image, timestamp_us, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row stride in bytes. Owned frames are always packed.
    pub fn stride(&self) -> u32 {
        self.image.width()
    }

    /// Get frame dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Packed row-major pixel data.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Intensity at (x, y). Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.image.get_pixel(x, y).0[0]
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }
}

/// Errors pairing rectified frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairError {
    #[error("Left frame is {left:?} but right frame is {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
}

/// Two rectified frames of identical dimensions.
#[derive(Debug, Clone)]
pub struct RectifiedFramePair {
    left: Frame,
    right: Frame,
}

impl RectifiedFramePair {
    pub fn new(left: Frame, right: Frame) -> Result<Self, PairError> {
        if left.dimensions() != right.dimensions() {
            return Err(PairError::DimensionMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        Ok(Self { left, right })
    }

    pub fn left(&self) -> &Frame {
        &self.left
    }

    pub fn right(&self) -> &Frame {
        &self.right
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.left.dimensions()
    }

    /// Timestamp of the pair, taken from the left camera.
    pub fn timestamp_us(&self) -> u64 {
        self.left.timestamp_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_strided_drops_padding() {
        // 3x2 frame with 2 bytes of padding per row
        let data = [1, 2, 3, 0xEE, 0xEE, 4, 5, 6, 0xEE, 0xEE];
        let frame = Frame::from_strided(&data, 3, 2, 5, 10, 1).unwrap();

        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.stride(), 3);
        assert_eq!(frame.pixels(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.timestamp_us(), 10);
        assert_eq!(frame.sequence(), 1);
    }

    #[test]
    fn test_from_strided_last_row_may_be_unpadded() {
        let data = [1, 2, 0xEE, 3, 4];
        let frame = Frame::from_strided(&data, 2, 2, 3, 0, 0).unwrap();
        assert_eq!(frame.pixels(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_from_strided_rejects_short_buffer() {
        let data = [0u8; 5];
        let err = Frame::from_strided(&data, 3, 2, 3, 0, 0).unwrap_err();
        assert_eq!(err, FrameError::BufferTooSmall { needed: 6, actual: 5 });
    }

    #[test]
    fn test_from_strided_rejects_narrow_stride() {
        let data = [0u8; 16];
        let err = Frame::from_strided(&data, 4, 2, 3, 0, 0).unwrap_err();
        assert_eq!(err, FrameError::InvalidStride { stride: 3, width: 4 });
    }

    #[test]
    fn test_copy_is_independent_of_source_buffer() {
        let mut data = vec![7u8; 4];
        let frame = Frame::from_strided(&data, 2, 2, 2, 0, 0).unwrap();
        data.iter_mut().for_each(|b| *b = 0);
        assert_eq!(frame.pixels(), &[7, 7, 7, 7]);
    }

    #[test]
    fn test_pair_rejects_mismatched_dimensions() {
        let left = Frame::new(GrayImage::new(4, 4), 0, 0);
        let right = Frame::new(GrayImage::new(4, 3), 0, 0);
        assert_eq!(
            RectifiedFramePair::new(left, right).unwrap_err(),
            PairError::DimensionMismatch {
                left: (4, 4),
                right: (4, 3)
            }
        );
    }

    #[test]
    fn test_pair_timestamp_comes_from_left() {
        let left = Frame::new(GrayImage::new(2, 2), 100, 0);
        let right = Frame::new(GrayImage::new(2, 2), 105, 0);
        let pair = RectifiedFramePair::new(left, right).unwrap();
        assert_eq!(pair.timestamp_us(), 100);
        assert_eq!(pair.dimensions(), (2, 2));
    }
}
