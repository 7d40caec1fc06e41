//! The fixed left/right camera pair.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::source::{CameraDriver, CameraSource, CaptureMode, DeviceId, DeviceInitError};

/// Cameras in a stereo rig.
pub const CAMERA_COUNT: usize = 2;

/// Which camera of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Owns both camera handles and the driver context behind them.
///
/// Teardown through [`CameraManager::close_all`] is safe from any thread and
/// frees the driver context exactly once.
pub struct CameraManager {
    cameras: [CameraSource; CAMERA_COUNT],
    driver: Arc<dyn CameraDriver>,
    context_freed: AtomicBool,
}

impl CameraManager {
    /// Open, configure and start both cameras.
    ///
    /// On failure every camera opened so far is closed and the driver context
    /// is freed before the error is returned.
    #[tracing::instrument(skip_all, fields(left = %devices[0], right = %devices[1]))]
    pub fn open_pair(
        driver: Arc<dyn CameraDriver>,
        devices: [DeviceId; CAMERA_COUNT],
        mode: &CaptureMode,
    ) -> Result<Self, DeviceInitError> {
        let left = match bring_up(&driver, devices[0], mode) {
            Ok(camera) => camera,
            Err(e) => {
                driver.free_context();
                return Err(e);
            }
        };

        let right = match bring_up(&driver, devices[1], mode) {
            Ok(camera) => camera,
            Err(e) => {
                warn!("Right camera failed, closing left camera {}", left.device());
                left.close();
                driver.free_context();
                return Err(e);
            }
        };

        info!("Stereo pair streaming via {} driver", driver.name());
        Ok(Self {
            cameras: [left, right],
            driver,
            context_freed: AtomicBool::new(false),
        })
    }

    pub fn left(&self) -> &CameraSource {
        &self.cameras[0]
    }

    pub fn right(&self) -> &CameraSource {
        &self.cameras[1]
    }

    pub fn get(&self, side: Side) -> &CameraSource {
        match side {
            Side::Left => self.left(),
            Side::Right => self.right(),
        }
    }

    pub fn cameras(&self) -> &[CameraSource; CAMERA_COUNT] {
        &self.cameras
    }

    /// Close both cameras and free the driver context.
    ///
    /// Returns `true` for the call that freed the context. Beyond the driver
    /// calls described on [`CameraDriver`] it only touches atomics, so it is
    /// usable from the interrupt path.
    pub fn close_all(&self) -> bool {
        for camera in &self.cameras {
            camera.close();
        }

        if self.context_freed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.driver.free_context();
        true
    }
}

impl fmt::Debug for CameraManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraManager")
            .field("cameras", &self.cameras)
            .field("driver", &self.driver.name())
            .field("context_freed", &self.context_freed)
            .finish()
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn bring_up(
    driver: &Arc<dyn CameraDriver>,
    device: DeviceId,
    mode: &CaptureMode,
) -> Result<CameraSource, DeviceInitError> {
    if let Err(e) = driver.reset(device) {
        warn!("Bus reset failed, opening anyway: {}", e);
    }

    // Dropping the source on error releases the device.
    let camera = CameraSource::open(driver.clone(), device)?;
    camera.configure(mode)?;
    camera.start_streaming()?;
    Ok(camera)
}
