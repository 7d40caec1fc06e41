//! Fixed-point rectification remap.
//!
//! Calibration yields floating-point source coordinates for every destination
//! pixel. They are quantized once to integer nearest-neighbour coordinates and
//! the per-frame remap is then a plain table lookup.

use crate::frame::Frame;
use image::GrayImage;
use thiserror::Error;
use tracing::debug;

/// Source coordinate used for entries that fall outside any image.
const OUT_OF_RANGE: [i16; 2] = [-1, -1];

/// Errors building a remap table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemapError {
    #[error("Map holds {actual} entries, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Remap table has zero size")]
    Empty,
}

/// Errors applying a remap table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RectifyError {
    #[error("Frame is {frame:?} but remap table is {table:?}")]
    DimensionMismatch { frame: (u32, u32), table: (u32, u32) },
}

/// Precomputed integer source coordinates, one `[x, y]` pair per output pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    width: u32,
    height: u32,
    coords: Vec<[i16; 2]>,
}

impl RemapTable {
    /// Table that maps every pixel onto itself.
    pub fn identity(width: u32, height: u32) -> Self {
        let coords = (0..height)
            .flat_map(|y| (0..width).map(move |x| [quantize(x as f64), quantize(y as f64)]))
            .collect();
        Self {
            width,
            height,
            coords,
        }
    }

    /// Quantize a pair of row-major floating-point maps.
    ///
    /// Coordinates are rounded to the nearest pixel and saturated into `i16`;
    /// non-finite entries become out-of-range and rectify to black.
    pub fn from_float_maps(
        map_x: &[f64],
        map_y: &[f64],
        width: u32,
        height: u32,
    ) -> Result<Self, RemapError> {
        if width == 0 || height == 0 {
            return Err(RemapError::Empty);
        }

        let expected = width as usize * height as usize;
        for map in [map_x, map_y] {
            if map.len() != expected {
                return Err(RemapError::SizeMismatch {
                    width,
                    height,
                    expected,
                    actual: map.len(),
                });
            }
        }

        let coords = map_x
            .iter()
            .zip(map_y)
            .map(|(&x, &y)| {
                if x.is_finite() && y.is_finite() {
                    [quantize(x), quantize(y)]
                } else {
                    OUT_OF_RANGE
                }
            })
            .collect();

        debug!("Quantized {}x{} remap table", width, height);

        Ok(Self {
            width,
            height,
            coords,
        })
    }

    /// Get table dimensions (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Source coordinate for output pixel (x, y).
    pub fn source(&self, x: u32, y: u32) -> [i16; 2] {
        self.coords[(y * self.width + x) as usize]
    }
}

fn quantize(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Rectify a frame through a precomputed remap table.
///
/// Output has the same dimensions and capture metadata as the input.
pub fn rectify(frame: &Frame, table: &RemapTable) -> Result<Frame, RectifyError> {
    let (width, height) = frame.dimensions();
    if (width, height) != table.dimensions() {
        return Err(RectifyError::DimensionMismatch {
            frame: frame.dimensions(),
            table: table.dimensions(),
        });
    }

    let src = frame.pixels();
    let pixels: Vec<u8> = table
        .coords
        .iter()
        .map(|&[sx, sy]| {
            if sx >= 0 && sy >= 0 && (sx as u32) < width && (sy as u32) < height {
                src[sy as usize * width as usize + sx as usize]
            } else {
                0
            }
        })
        .collect();

    let image = GrayImage::from_raw(width, height, pixels).ok_or(RectifyError::DimensionMismatch {
        frame: frame.dimensions(),
        table: table.dimensions(),
    })?;

    Ok(Frame::new(image, frame.timestamp_us(), frame.sequence()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let image = GrayImage::from_fn(width, height, |x, y| image::Luma([(x + y * width) as u8]));
        Frame::new(image, 42, 3)
    }

    #[test]
    fn test_identity_rectify_is_lossless() {
        let frame = gradient_frame(8, 6);
        let table = RemapTable::identity(8, 6);

        let out = rectify(&frame, &table).unwrap();
        assert_eq!(out.pixels(), frame.pixels());
        assert_eq!(out.timestamp_us(), 42);
        assert_eq!(out.sequence(), 3);
    }

    #[test]
    fn test_rectify_preserves_dimensions() {
        for (w, h) in [(1, 1), (5, 3), (64, 64), (17, 40)] {
            let frame = gradient_frame(w, h);
            let map_x: Vec<f64> = (0..h).flat_map(|_| (0..w).map(|x| x as f64 * 0.5 + 3.3)).collect();
            let map_y: Vec<f64> = (0..h).flat_map(|y| (0..w).map(move |_| y as f64 - 1.7)).collect();
            let table = RemapTable::from_float_maps(&map_x, &map_y, w, h).unwrap();

            let out = rectify(&frame, &table).unwrap();
            assert_eq!(out.dimensions(), (w, h));
        }
    }

    #[test]
    fn test_from_float_maps_rounds_to_nearest() {
        let table = RemapTable::from_float_maps(&[0.4, 1.6], &[0.5, -0.4], 2, 1).unwrap();
        assert_eq!(table.source(0, 0), [0, 1]);
        assert_eq!(table.source(1, 0), [2, 0]);
    }

    #[test]
    fn test_non_finite_entries_rectify_to_black() {
        let frame = Frame::new(GrayImage::from_pixel(2, 1, image::Luma([200])), 0, 0);
        let table = RemapTable::from_float_maps(&[f64::NAN, 0.0], &[0.0, 0.0], 2, 1).unwrap();

        let out = rectify(&frame, &table).unwrap();
        assert_eq!(out.pixels(), &[0, 200]);
    }

    #[test]
    fn test_out_of_bounds_source_is_black() {
        let frame = Frame::new(GrayImage::from_pixel(2, 2, image::Luma([9])), 0, 0);
        let table =
            RemapTable::from_float_maps(&[5.0, 1.0, 0.0, 1e9], &[0.0, 1.0, -3.0, 1.0], 2, 2).unwrap();

        let out = rectify(&frame, &table).unwrap();
        assert_eq!(out.pixels(), &[0, 9, 0, 0]);
    }

    #[test]
    fn test_shift_map_moves_content() {
        // Each output pixel samples one column to the right
        let frame = gradient_frame(4, 1);
        let map_x = [1.0, 2.0, 3.0, 4.0];
        let table = RemapTable::from_float_maps(&map_x, &[0.0; 4], 4, 1).unwrap();

        let out = rectify(&frame, &table).unwrap();
        assert_eq!(out.pixels(), &[1, 2, 3, 0]);
    }

    #[test]
    fn test_rectify_rejects_wrong_size() {
        let frame = gradient_frame(4, 4);
        let table = RemapTable::identity(4, 5);
        assert_eq!(
            rectify(&frame, &table).unwrap_err(),
            RectifyError::DimensionMismatch {
                frame: (4, 4),
                table: (4, 5)
            }
        );
    }

    #[test]
    fn test_from_float_maps_rejects_size_mismatch() {
        let err = RemapTable::from_float_maps(&[0.0; 3], &[0.0; 4], 2, 2).unwrap_err();
        assert!(matches!(err, RemapError::SizeMismatch { actual: 3, .. }));
    }
}
