//! Stereorig Capture - camera lifecycle and frame capture
//!
//! This crate owns everything between the hardware driver and an owned
//! [`Frame`](stereorig_data::Frame):
//!
//! - [`CameraDriver`]: the driver boundary (open, configure, transmit, dequeue, release)
//! - [`CameraSource`]: one camera's Open → Streaming → Stopped → Closed lifecycle
//! - [`CameraManager`]: the fixed left/right pair and the driver context
//! - [`SimulatedDriver`]: in-process driver for tests and bench runs
//! - Webcams (via nokhwa, requires `webcam` feature)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stereorig_capture::{CameraManager, CaptureMode, DeviceId, SimulatedDriver};
//!
//! let driver = Arc::new(SimulatedDriver::stereo_rig([DeviceId(1), DeviceId(2)], 64, 48, 4));
//! let cameras = CameraManager::open_pair(driver, [DeviceId(1), DeviceId(2)], &CaptureMode::new(64, 48))?;
//! let frame = cameras.left().capture_frame()?;
//! ```

mod manager;
mod sim;
mod source;

#[cfg(feature = "webcam")]
mod webcam;

pub use manager::{CAMERA_COUNT, CameraManager, Side};
pub use sim::{DeviceStats, SimulatedDriver, synthetic_pair};
pub use source::{
    BorrowedFrame, CameraDriver, CameraSource, CameraState, CaptureError, CaptureMode,
    DeviceId, DeviceInitError, DriverError, ParseDeviceIdError,
};

#[cfg(feature = "webcam")]
pub use webcam::WebcamDriver;
