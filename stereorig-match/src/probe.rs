//! Fixed-disparity block probe.
//!
//! Tests every grid-aligned block of the left image at exactly the configured
//! disparity. Blocks without enough horizontal edge energy are skipped, the
//! rest are accepted when their mean absolute difference against the shifted
//! right block is within the SAD threshold. Cheap enough to run on the
//! capture thread, which makes it useful for rig bring-up and simulation.

use glam::UVec2;
use stereorig_data::Frame;

use crate::engine::{Correspondence, StereoEngine};
use crate::params::StereoParameters;

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockProbe;

impl BlockProbe {
    pub fn new() -> Self {
        Self
    }
}

impl StereoEngine for BlockProbe {
    fn name(&self) -> &str {
        "block-probe"
    }

    fn compute(
        &self,
        left: &Frame,
        right: &Frame,
        params: &StereoParameters,
    ) -> Vec<Correspondence> {
        let (width, height) = left.dimensions();
        if right.dimensions() != (width, height) {
            return Vec::new();
        }

        let block = params.block_size.max(1) as u32;
        let disparity = params.disparity.max(0) as u32;
        let sobel_limit = params.sobel_limit.max(0) as u64;
        let area = (block as u64 * block as u64) as f32;

        let mut matches = Vec::new();
        for by in grid(height, block) {
            for bx in grid(width, block).filter(|&bx| bx >= disparity) {
                if edge_strength(left, bx, by, block) < sobel_limit {
                    continue;
                }

                let mean = sad(left, right, bx, bx - disparity, by, block) as f32 / area;
                if mean > params.sad_threshold as f32 {
                    continue;
                }

                matches.push(Correspondence::new(
                    UVec2::new(bx + block / 2, by + block / 2),
                    disparity as f32,
                ));
            }
        }
        matches
    }
}

/// Origins of the blocks that fit entirely inside `extent`.
fn grid(extent: u32, block: u32) -> impl Iterator<Item = u32> {
    (0..extent)
        .step_by(block as usize)
        .take_while(move |&origin| origin as u64 + block as u64 <= extent as u64)
}

/// Sum of absolute horizontal Sobel responses over the block interior.
fn edge_strength(frame: &Frame, bx: u32, by: u32, block: u32) -> u64 {
    if block < 3 {
        return 0;
    }

    let p = |x: u32, y: u32| frame.pixel(x, y) as i32;
    let mut total = 0u64;
    for y in by + 1..by + block - 1 {
        for x in bx + 1..bx + block - 1 {
            let gx = (p(x + 1, y - 1) + 2 * p(x + 1, y) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2 * p(x - 1, y) + p(x - 1, y + 1));
            total += gx.unsigned_abs() as u64;
        }
    }
    total
}

fn sad(left: &Frame, right: &Frame, left_x: u32, right_x: u32, by: u32, block: u32) -> u64 {
    let mut total = 0u64;
    for y in by..by + block {
        for dx in 0..block {
            let l = left.pixel(left_x + dx, y) as i32;
            let r = right.pixel(right_x + dx, y) as i32;
            total += (l - r).unsigned_abs() as u64;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    const BACKGROUND: u8 = 40;

    fn texture(x: u32, y: u32) -> u8 {
        ((x * 37 + y * 91) % 200 + 30) as u8
    }

    /// Flat frame with one textured 8x8 patch whose left edge is at `x0`.
    fn patch_frame(x0: u32, y0: u32) -> Frame {
        let image = GrayImage::from_fn(64, 64, |x, y| {
            if (x0..x0 + 8).contains(&x) && (y0..y0 + 8).contains(&y) {
                Luma([texture(x - x0, y - y0)])
            } else {
                Luma([BACKGROUND])
            }
        });
        Frame::new(image, 0, 0)
    }

    fn params(disparity: i32, block_size: i32) -> StereoParameters {
        StereoParameters {
            disparity,
            block_size,
            ..StereoParameters::default()
        }
    }

    #[test]
    fn test_finds_shifted_patch() {
        let left = patch_frame(24, 24);
        let right = patch_frame(20, 24);

        let matches = BlockProbe.compute(&left, &right, &params(4, 8));
        assert_eq!(matches, vec![Correspondence::new(UVec2::new(28, 28), 4.0)]);
    }

    #[test]
    fn test_wrong_disparity_is_rejected() {
        let left = patch_frame(24, 24);
        let right = patch_frame(20, 24);

        let matches = BlockProbe.compute(&left, &right, &StereoParameters {
            sad_threshold: 5,
            ..params(6, 8)
        });
        assert!(matches.is_empty());
    }

    #[test]
    fn test_flat_image_has_no_matches() {
        let flat = Frame::new(GrayImage::from_pixel(64, 64, Luma([BACKGROUND])), 0, 0);
        assert!(BlockProbe.compute(&flat, &flat, &params(4, 8)).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let left = patch_frame(24, 24);
        let right = patch_frame(20, 24);
        let p = params(4, 8);

        assert_eq!(
            BlockProbe.compute(&left, &right, &p),
            BlockProbe.compute(&left, &right, &p)
        );
    }

    #[test]
    fn test_mismatched_frames_yield_nothing() {
        let left = patch_frame(24, 24);
        let right = Frame::new(GrayImage::new(32, 64), 0, 0);
        assert!(BlockProbe.compute(&left, &right, &params(4, 8)).is_empty());
    }

    #[test]
    fn test_block_larger_than_frame() {
        let left = patch_frame(24, 24);
        assert!(BlockProbe.compute(&left, &left, &params(0, 65)).is_empty());
        assert!(BlockProbe.compute(&left, &left, &params(0, i32::MAX)).is_empty());
        assert!(BlockProbe.compute(&left, &left, &params(i32::MAX, 8)).is_empty());
    }

    #[test]
    fn test_grid_near_extent_limit() {
        let block = 1 << 31;
        assert_eq!(grid(u32::MAX, block).collect::<Vec<_>>(), vec![0]);
        assert_eq!(grid(64, 65).count(), 0);
        assert_eq!(grid(64, 8).last(), Some(56));
    }
}
