//! Camera lifecycle and the driver boundary.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use stereorig_data::Frame;
use thiserror::Error;
use tracing::{info, warn};

/// 64-bit hardware identifier of a physical camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Error parsing a device id from text.
#[derive(Debug, Error)]
#[error("Invalid device id '{input}': expected hex (0x...) or decimal")]
pub struct ParseDeviceIdError {
    input: String,
}

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed.map(DeviceId).map_err(|_| ParseDeviceIdError {
            input: s.to_string(),
        })
    }
}

/// Custom region-of-interest grayscale capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMode {
    /// Region width in pixels.
    pub width: u32,
    /// Region height in pixels.
    pub height: u32,
    /// Horizontal offset of the region on the sensor.
    pub left: u32,
    /// Vertical offset of the region on the sensor.
    pub top: u32,
    /// Let the camera drive exposure.
    pub auto_exposure: bool,
    /// How long a capture may block before giving up.
    pub frame_timeout: Duration,
}

impl CaptureMode {
    /// Full-region mode at the given size with auto exposure on.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, left: u32, top: u32) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }
}

impl Default for CaptureMode {
    fn default() -> Self {
        Self {
            width: 376,
            height: 240,
            left: 0,
            top: 0,
            auto_exposure: true,
            frame_timeout: Duration::from_millis(500),
        }
    }
}

/// A driver ring-buffer slot lent for the duration of a dequeue callback.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub timestamp_us: u64,
}

/// Errors that make a camera unusable at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceInitError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Device busy: {0}")]
    DeviceBusy(DeviceId),

    #[error("Failed to configure device {device}: {reason}")]
    Configuration { device: DeviceId, reason: String },
}

/// Errors from a single capture.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Timed out waiting for a frame from {0}")]
    Timeout(DeviceId),

    #[error("Device error on {device}: {reason}")]
    Device { device: DeviceId, reason: String },

    #[error("Device lost: {device}: {reason}")]
    DeviceLost { device: DeviceId, reason: String },

    #[error("Device {0} is not streaming")]
    NotStreaming(DeviceId),
}

impl CaptureError {
    /// Whether the loop must stop. Timeouts and transient device errors only
    /// cost the current cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost { .. } | Self::NotStreaming(_))
    }
}

/// A failed driver call outside of capture.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Driver error on {device}: {reason}")]
pub struct DriverError {
    pub device: DeviceId,
    pub reason: String,
}

/// Hardware driver boundary.
///
/// Methods take `&self` so teardown can run from the interrupt handler while
/// the loop thread is blocked in [`CameraDriver::dequeue`]. Implementations
/// must wake blocked dequeues when a device is released.
///
/// [`stop_capture`](Self::stop_capture), [`release`](Self::release) and
/// [`free_context`](Self::free_context) run on the interrupt thread. They may
/// take short internal locks but must never wait on the loop thread: any
/// lock they share with `dequeue` has to be dropped while `dequeue` waits.
pub trait CameraDriver: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Put the device's bus into a known state before it is opened.
    ///
    /// Drivers with nothing to reset keep the default.
    fn reset(&self, device: DeviceId) -> Result<(), DriverError> {
        let _ = device;
        Ok(())
    }

    /// Claim a device.
    fn open(&self, device: DeviceId) -> Result<(), DeviceInitError>;

    /// Select the capture mode and exposure behaviour.
    fn configure(&self, device: DeviceId, mode: &CaptureMode) -> Result<(), DeviceInitError>;

    /// Turn hardware transmission on or off.
    fn set_transmission(&self, device: DeviceId, enabled: bool) -> Result<(), DriverError>;

    /// Wait up to `timeout` for the next frame and lend it to `consume`.
    ///
    /// The slot is re-queued as soon as `consume` returns.
    fn dequeue(
        &self,
        device: DeviceId,
        timeout: Duration,
        consume: &mut dyn FnMut(BorrowedFrame<'_>),
    ) -> Result<(), CaptureError>;

    /// Stop the capture machinery (ring buffers, DMA).
    fn stop_capture(&self, device: DeviceId);

    /// Release the device claim.
    fn release(&self, device: DeviceId);

    /// Free the driver context once every device is released.
    fn free_context(&self) {}
}

/// Lifecycle state of a camera handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CameraState {
    Open = 0,
    Streaming = 1,
    Stopped = 2,
    Closed = 3,
}

impl CameraState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CameraState::Open,
            1 => CameraState::Streaming,
            2 => CameraState::Stopped,
            _ => CameraState::Closed,
        }
    }
}

/// One physical camera: its handle state plus the driver that backs it.
pub struct CameraSource {
    device: DeviceId,
    driver: Arc<dyn CameraDriver>,
    state: AtomicU8,
    frame_timeout_us: AtomicU64,
    sequence: AtomicU64,
}

impl CameraSource {
    /// Claim a camera.
    #[tracing::instrument(skip(driver), fields(driver = driver.name()))]
    pub fn open(driver: Arc<dyn CameraDriver>, device: DeviceId) -> Result<Self, DeviceInitError> {
        driver.open(device)?;
        info!("Opened camera {}", device);

        Ok(Self {
            device,
            driver,
            state: AtomicU8::new(CameraState::Open as u8),
            frame_timeout_us: AtomicU64::new(
                CaptureMode::default().frame_timeout.as_micros() as u64,
            ),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn state(&self) -> CameraState {
        CameraState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of frames captured so far.
    pub fn frames_captured(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Apply a capture mode. Only valid while not streaming.
    pub fn configure(&self, mode: &CaptureMode) -> Result<(), DeviceInitError> {
        match self.state() {
            CameraState::Open | CameraState::Stopped => {}
            state => {
                return Err(DeviceInitError::Configuration {
                    device: self.device,
                    reason: format!("cannot configure while {:?}", state),
                });
            }
        }

        self.driver.configure(self.device, mode)?;
        self.frame_timeout_us
            .store(mode.frame_timeout.as_micros() as u64, Ordering::Relaxed);

        info!(
            "Camera {} configured: {}x{} at ({}, {}), auto exposure {}",
            self.device,
            mode.width,
            mode.height,
            mode.left,
            mode.top,
            if mode.auto_exposure { "on" } else { "off" }
        );
        Ok(())
    }

    /// Turn on transmission. No-op if already streaming.
    pub fn start_streaming(&self) -> Result<(), DeviceInitError> {
        let previous = match self.state() {
            CameraState::Streaming => return Ok(()),
            CameraState::Closed => {
                return Err(DeviceInitError::Configuration {
                    device: self.device,
                    reason: "camera is closed".to_string(),
                });
            }
            state => state,
        };

        self.driver
            .set_transmission(self.device, true)
            .map_err(|e| DeviceInitError::Configuration {
                device: self.device,
                reason: e.reason,
            })?;

        if self
            .state
            .compare_exchange(
                previous as u8,
                CameraState::Streaming as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Closed underneath us; the closer already released the device.
            return Err(DeviceInitError::Configuration {
                device: self.device,
                reason: "camera closed while starting".to_string(),
            });
        }

        info!("Camera {} streaming", self.device);
        Ok(())
    }

    /// Turn off transmission. No-op unless streaming.
    pub fn stop_streaming(&self) {
        if self
            .state
            .compare_exchange(
                CameraState::Streaming as u8,
                CameraState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            if let Err(e) = self.driver.set_transmission(self.device, false) {
                warn!("Failed to stop transmission: {}", e);
            }
        }
    }

    /// Block until the next frame arrives and return an owned copy of it.
    pub fn capture_frame(&self) -> Result<Frame, CaptureError> {
        if self.state() != CameraState::Streaming {
            return Err(CaptureError::NotStreaming(self.device));
        }

        let timeout = Duration::from_micros(self.frame_timeout_us.load(Ordering::Relaxed));
        let sequence = self.sequence.load(Ordering::Relaxed);
        let mut copied = None;

        self.driver.dequeue(self.device, timeout, &mut |slot: BorrowedFrame<'_>| {
            copied = Some(Frame::from_strided(
                slot.data,
                slot.width,
                slot.height,
                slot.stride,
                slot.timestamp_us,
                sequence,
            ));
        })?;

        let frame = copied
            .ok_or_else(|| CaptureError::Device {
                device: self.device,
                reason: "driver returned without a frame".to_string(),
            })?
            .map_err(|e| CaptureError::Device {
                device: self.device,
                reason: e.to_string(),
            })?;

        self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    /// Stop streaming if needed and release the device.
    ///
    /// Idempotent and safe to call from another thread. Returns `true` only
    /// for the call that actually released the hardware. Does not log; the
    /// driver calls it makes follow the rules on [`CameraDriver`].
    pub fn close(&self) -> bool {
        let previous =
            CameraState::from_u8(self.state.swap(CameraState::Closed as u8, Ordering::AcqRel));
        if previous == CameraState::Closed {
            return false;
        }

        if previous == CameraState::Streaming {
            let _ = self.driver.set_transmission(self.device, false);
        }
        self.driver.stop_capture(self.device);
        self.driver.release(self.device);
        true
    }
}

impl fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSource")
            .field("device", &self.device)
            .field("driver", &self.driver.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDriver;

    const CAM: DeviceId = DeviceId(0x00b09d0100af04d8);

    fn driver() -> Arc<SimulatedDriver> {
        Arc::new(SimulatedDriver::new().with_device(CAM, 4, 2, 6))
    }

    fn streaming(driver: &Arc<SimulatedDriver>) -> CameraSource {
        let source = CameraSource::open(driver.clone(), CAM).unwrap();
        source
            .configure(&CaptureMode::new(4, 2).with_frame_timeout(Duration::from_millis(20)))
            .unwrap();
        source.start_streaming().unwrap();
        source
    }

    #[test]
    fn test_device_id_display_and_parse() {
        assert_eq!(CAM.to_string(), "0x00b09d0100af04d8");
        assert_eq!("0x00b09d0100af04d8".parse::<DeviceId>().unwrap(), CAM);
        assert_eq!("42".parse::<DeviceId>().unwrap(), DeviceId(42));
        assert!("0xnothex".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let driver = driver();
        let source = CameraSource::open(driver.clone(), CAM).unwrap();
        assert_eq!(source.state(), CameraState::Open);

        source.configure(&CaptureMode::new(4, 2)).unwrap();
        source.start_streaming().unwrap();
        assert_eq!(source.state(), CameraState::Streaming);

        source.stop_streaming();
        assert_eq!(source.state(), CameraState::Stopped);

        assert!(source.close());
        assert_eq!(source.state(), CameraState::Closed);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let driver = driver();
        let source = streaming(&driver);

        source.start_streaming().unwrap();
        assert_eq!(driver.stats(CAM).unwrap().transmission_on, 1);

        source.stop_streaming();
        source.stop_streaming();
        assert_eq!(driver.stats(CAM).unwrap().transmission_off, 1);
    }

    #[test]
    fn test_open_unknown_and_busy_devices() {
        let driver = driver();
        assert_eq!(
            CameraSource::open(driver.clone(), DeviceId(7)).unwrap_err(),
            DeviceInitError::DeviceNotFound(DeviceId(7))
        );

        let _held = CameraSource::open(driver.clone(), CAM).unwrap();
        assert_eq!(
            CameraSource::open(driver.clone(), CAM).unwrap_err(),
            DeviceInitError::DeviceBusy(CAM)
        );
    }

    #[test]
    fn test_configure_while_streaming_fails() {
        let driver = driver();
        let source = streaming(&driver);
        assert!(matches!(
            source.configure(&CaptureMode::new(4, 2)),
            Err(DeviceInitError::Configuration { .. })
        ));
    }

    #[test]
    fn test_captured_frame_is_independent_copy() {
        let driver = driver();
        let source = streaming(&driver);

        driver.push_frame(CAM, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        driver.push_frame(CAM, vec![9; 8]);

        let first = source.capture_frame().unwrap();
        let second = source.capture_frame().unwrap();

        // The driver reuses one ring slot; the first copy must not change.
        assert_eq!(first.pixels(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(second.pixels(), &[9; 8]);
        assert_eq!(first.stride(), 4);
        assert_eq!((first.sequence(), second.sequence()), (0, 1));
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn test_capture_timeout_is_not_fatal() {
        let driver = driver();
        let source = streaming(&driver);

        let err = source.capture_frame().unwrap_err();
        assert_eq!(err, CaptureError::Timeout(CAM));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_capture_after_disconnect_is_fatal() {
        let driver = driver();
        let source = streaming(&driver);
        driver.disconnect(CAM);

        let err = source.capture_frame().unwrap_err();
        assert!(matches!(err, CaptureError::DeviceLost { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_capture_requires_streaming() {
        let driver = driver();
        let source = CameraSource::open(driver.clone(), CAM).unwrap();
        assert_eq!(
            source.capture_frame().unwrap_err(),
            CaptureError::NotStreaming(CAM)
        );
    }

    #[test]
    fn test_close_twice_is_noop() {
        let driver = driver();
        let source = streaming(&driver);

        assert!(source.close());
        let after_first = (source.state(), driver.stats(CAM).unwrap());

        assert!(!source.close());
        let after_second = (source.state(), driver.stats(CAM).unwrap());

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.0, CameraState::Closed);
        assert_eq!(after_second.1.releases, 1);
        assert_eq!(after_second.1.capture_stops, 1);
        assert_eq!(after_second.1.transmission_off, 1);
    }

    #[test]
    fn test_drop_releases_device() {
        let driver = driver();
        drop(streaming(&driver));
        assert_eq!(driver.stats(CAM).unwrap().releases, 1);

        // Released device can be claimed again
        assert!(CameraSource::open(driver.clone(), CAM).is_ok());
    }

    #[test]
    fn test_start_after_close_fails() {
        let driver = driver();
        let source = CameraSource::open(driver.clone(), CAM).unwrap();
        source.close();
        assert!(source.start_streaming().is_err());
    }
}
