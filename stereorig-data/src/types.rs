//! Reconstruction output types.

use glam::{UVec2, Vec3};

/// An accepted stereo match: rectified pixel, disparity and 3-D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityPoint {
    /// Pixel location in the left rectified image.
    pub pixel: UVec2,
    /// Horizontal shift to the matching right pixel.
    pub disparity: f32,
    /// Reconstructed position in the left camera's optical frame.
    pub point: Vec3,
}

impl DisparityPoint {
    pub fn new(pixel: UVec2, disparity: f32, point: Vec3) -> Self {
        Self {
            pixel,
            disparity,
            point,
        }
    }
}

/// One cycle's point cloud, ready for the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudMessage {
    /// Points in publish order.
    pub points: Vec<Vec3>,
    /// Capture time in microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Reference frame the points are expressed in.
    pub frame_id: String,
}

impl PointCloudMessage {
    pub fn new(points: Vec<Vec3>, timestamp_us: u64, frame_id: impl Into<String>) -> Self {
        Self {
            points,
            timestamp_us,
            frame_id: frame_id.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = PointCloudMessage::new(vec![Vec3::new(1.0, 2.0, 3.0)], 7, "stereo");
        assert_eq!(msg.len(), 1);
        assert!(!msg.is_empty());
        assert_eq!(msg.frame_id, "stereo");
        assert_eq!(msg.timestamp_us, 7);
    }

    #[test]
    fn test_empty_message() {
        let msg = PointCloudMessage::new(Vec::new(), 0, String::from("body"));
        assert!(msg.is_empty());
    }
}
