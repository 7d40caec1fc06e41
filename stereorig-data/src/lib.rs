//! Stereorig Data Crate
//!
//! Calibration, frame and point-cloud types shared by the stereorig crates.
//! Nothing here talks to hardware or the network: this crate only parses the
//! calibration directory, owns image buffers and applies the precomputed
//! rectification remap.

pub mod calibration;
pub mod frame;
pub mod remap;
pub mod types;

pub use calibration::{CalibrationError, CalibrationSet, stereo_reprojection};
pub use frame::{Frame, FrameError, PairError, RectifiedFramePair};
pub use remap::{RemapError, RemapTable, RectifyError, rectify};
pub use types::{DisparityPoint, PointCloudMessage};
