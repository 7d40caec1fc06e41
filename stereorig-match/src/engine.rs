//! The matching-engine boundary.
//!
//! A [`StereoEngine`] finds correspondences between two rectified frames; the
//! [`StereoEngineAdapter`] owns the reprojection step so every engine yields
//! points in the same metric camera frame.

use std::sync::Arc;

use glam::UVec2;
use stereorig_data::{CalibrationSet, DisparityPoint, Frame, RectifiedFramePair};
use tracing::trace;

use crate::params::StereoParameters;

/// A rectified left-image pixel and its matched horizontal shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub pixel: UVec2,
    pub disparity: f32,
}

impl Correspondence {
    pub fn new(pixel: UVec2, disparity: f32) -> Self {
        Self { pixel, disparity }
    }
}

/// Dense or sparse stereo correspondence search.
///
/// Implementations must be deterministic for identical inputs and must only
/// read the frames they are given.
pub trait StereoEngine: Send {
    fn name(&self) -> &str {
        "external"
    }

    fn compute(
        &self,
        left: &Frame,
        right: &Frame,
        params: &StereoParameters,
    ) -> Vec<Correspondence>;
}

impl<E: StereoEngine + ?Sized> StereoEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn compute(
        &self,
        left: &Frame,
        right: &Frame,
        params: &StereoParameters,
    ) -> Vec<Correspondence> {
        (**self).compute(left, right, params)
    }
}

/// Runs an engine on a rectified pair and reprojects its output.
pub struct StereoEngineAdapter<E> {
    engine: E,
    calibration: Arc<CalibrationSet>,
}

impl<E: StereoEngine> StereoEngineAdapter<E> {
    pub fn new(engine: E, calibration: Arc<CalibrationSet>) -> Self {
        Self {
            engine,
            calibration,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Correspondences for this pair, reprojected through Q.
    ///
    /// Matches outside the frame or with a non-finite reprojection are
    /// dropped. An empty result is valid.
    pub fn compute(
        &self,
        pair: &RectifiedFramePair,
        params: &StereoParameters,
    ) -> Vec<DisparityPoint> {
        let (width, height) = pair.dimensions();
        let matches = self.engine.compute(pair.left(), pair.right(), params);
        let found = matches.len();

        let points: Vec<DisparityPoint> = matches
            .into_iter()
            .filter(|m| m.pixel.x < width && m.pixel.y < height)
            .filter_map(|m| {
                self.calibration
                    .reproject(m.pixel, m.disparity)
                    .map(|point| DisparityPoint::new(m.pixel, m.disparity, point))
            })
            .collect();

        if points.len() != found {
            trace!(
                "{} dropped {} of {} correspondences",
                self.engine.name(),
                found - points.len(),
                found
            );
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use stereorig_data::stereo_reprojection;

    struct Fixed(Vec<Correspondence>);

    impl StereoEngine for Fixed {
        fn compute(&self, _: &Frame, _: &Frame, _: &StereoParameters) -> Vec<Correspondence> {
            self.0.clone()
        }
    }

    fn pair(width: u32, height: u32) -> RectifiedFramePair {
        let frame = Frame::new(GrayImage::new(width, height), 0, 0);
        RectifiedFramePair::new(frame.clone(), frame).unwrap()
    }

    fn calibration() -> Arc<CalibrationSet> {
        Arc::new(CalibrationSet::identity(
            64,
            64,
            stereo_reprojection(100.0, 32.0, 32.0, 0.1),
        ))
    }

    #[test]
    fn test_reprojects_through_q() {
        let adapter = StereoEngineAdapter::new(
            Fixed(vec![Correspondence::new(UVec2::new(42, 32), 4.0)]),
            calibration(),
        );

        let points = adapter.compute(&pair(64, 64), &StereoParameters::default());
        assert_eq!(points.len(), 1);
        let p = points[0].point;
        assert!((p.z - 2.5).abs() < 1e-5);
        assert!((p.x - 0.25).abs() < 1e-5);
        assert!(p.y.abs() < 1e-5);
    }

    #[test]
    fn test_zero_disparity_is_dropped() {
        let adapter = StereoEngineAdapter::new(
            Fixed(vec![
                Correspondence::new(UVec2::new(10, 10), 0.0),
                Correspondence::new(UVec2::new(10, 10), 8.0),
            ]),
            calibration(),
        );

        let points = adapter.compute(&pair(64, 64), &StereoParameters::default());
        assert_eq!(points.len(), 1);
        assert!((points[0].point.z - 1.25).abs() < 1e-5);
    }

    #[test]
    fn test_out_of_frame_matches_are_dropped() {
        let adapter = StereoEngineAdapter::new(
            Fixed(vec![Correspondence::new(UVec2::new(64, 0), 4.0)]),
            calibration(),
        );
        assert!(adapter.compute(&pair(64, 64), &StereoParameters::default()).is_empty());
    }

    #[test]
    fn test_boxed_engine() {
        let engine: Box<dyn StereoEngine> = Box::new(Fixed(Vec::new()));
        assert_eq!(engine.name(), "external");
        let adapter = StereoEngineAdapter::new(engine, calibration());
        assert!(adapter.compute(&pair(64, 64), &StereoParameters::default()).is_empty());
    }
}
