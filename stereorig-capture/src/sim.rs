//! In-process simulated camera driver.
//!
//! Behaves like a ring-buffer driver: every dequeue copies the next queued
//! (or generated) image into a single stride-padded slot that is reused by the
//! following dequeue, so callers that keep a reference into the slot would see
//! it change. Fault injection covers busy devices, configuration failures and
//! disconnects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::source::{
    BorrowedFrame, CameraDriver, CaptureError, CaptureMode, DeviceId, DeviceInitError, DriverError,
};

/// Byte used for row padding in the ring slot.
const PADDING: u8 = 0xEE;

type FrameGenerator = Box<dyn FnMut(u64) -> Vec<u8> + Send>;

/// Per-device call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub resets: u32,
    pub opens: u32,
    pub transmission_on: u32,
    pub transmission_off: u32,
    pub capture_stops: u32,
    pub releases: u32,
    pub frames_delivered: u64,
}

struct SimDevice {
    width: u32,
    height: u32,
    stride: u32,
    claimed: bool,
    configured: bool,
    transmitting: bool,
    busy: bool,
    lost: bool,
    fail_configure: bool,
    fail_reset: bool,
    queue: VecDeque<Vec<u8>>,
    generator: Option<FrameGenerator>,
    ring: Vec<u8>,
    generated: u64,
    stats: DeviceStats,
}

impl SimDevice {
    fn new(width: u32, height: u32, stride: u32) -> Self {
        Self {
            width,
            height,
            stride,
            claimed: false,
            configured: false,
            transmitting: false,
            busy: false,
            lost: false,
            fail_configure: false,
            fail_reset: false,
            queue: VecDeque::new(),
            generator: None,
            ring: vec![PADDING; stride as usize * height as usize],
            generated: 0,
            stats: DeviceStats::default(),
        }
    }

    fn next_image(&mut self) -> Option<Vec<u8>> {
        if let Some(image) = self.queue.pop_front() {
            return Some(image);
        }
        let generator = self.generator.as_mut()?;
        let image = generator(self.generated);
        self.generated += 1;
        Some(image)
    }

    /// Lay a packed image out in the padded ring slot.
    fn load_ring(&mut self, image: &[u8]) {
        let width = self.width as usize;
        let stride = self.stride as usize;
        self.ring.fill(PADDING);
        for (row, src) in self.ring.chunks_mut(stride).zip(image.chunks(width)) {
            row[..src.len()].copy_from_slice(src);
        }
    }
}

#[derive(Default)]
struct SimState {
    devices: HashMap<DeviceId, SimDevice>,
}

/// Simulated ring-buffer camera driver.
pub struct SimulatedDriver {
    state: Mutex<SimState>,
    frame_ready: Condvar,
    frame_interval: Option<Duration>,
    contexts_freed: AtomicUsize,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            frame_ready: Condvar::new(),
            frame_interval: None,
            contexts_freed: AtomicUsize::new(0),
        }
    }

    /// Two cameras generating a textured scene with a constant disparity.
    pub fn stereo_rig(devices: [DeviceId; 2], width: u32, height: u32, disparity: u32) -> Self {
        let driver = Self::new()
            .with_device(devices[0], width, height, width)
            .with_device(devices[1], width, height, width);

        driver.set_generator(devices[0], move |n| synthetic_pair(width, height, disparity, n).0);
        driver.set_generator(devices[1], move |n| synthetic_pair(width, height, disparity, n).1);
        driver
    }

    /// Add a device with the given geometry.
    pub fn with_device(self, device: DeviceId, width: u32, height: u32, stride: u32) -> Self {
        self.lock()
            .devices
            .insert(device, SimDevice::new(width, height, stride.max(width)));
        self
    }

    /// Pace generated frames at a fixed interval.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Queue one packed `width * height` image.
    pub fn push_frame(&self, device: DeviceId, pixels: Vec<u8>) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.queue.push_back(pixels);
        }
        self.frame_ready.notify_all();
    }

    /// Produce frames on demand once the queue is empty.
    pub fn set_generator<F>(&self, device: DeviceId, generator: F)
    where
        F: FnMut(u64) -> Vec<u8> + Send + 'static,
    {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.generator = Some(Box::new(generator));
        }
        self.frame_ready.notify_all();
    }

    /// Make the next open of this device fail as busy.
    pub fn mark_busy(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.busy = true;
        }
    }

    /// Make the next configure of this device fail.
    pub fn fail_next_configure(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.fail_configure = true;
        }
    }

    /// Make the next bus reset of this device fail.
    pub fn fail_next_reset(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.fail_reset = true;
        }
    }

    /// Simulate the device dropping off the bus.
    pub fn disconnect(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.lost = true;
        }
        self.frame_ready.notify_all();
    }

    pub fn stats(&self, device: DeviceId) -> Option<DeviceStats> {
        self.lock().devices.get(&device).map(|dev| dev.stats)
    }

    pub fn contexts_freed(&self) -> usize {
        self.contexts_freed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn reset(&self, device: DeviceId) -> Result<(), DriverError> {
        let mut state = self.lock();
        let dev = state.devices.get_mut(&device).ok_or_else(|| DriverError {
            device,
            reason: "unknown device".to_string(),
        })?;

        if std::mem::take(&mut dev.fail_reset) {
            return Err(DriverError {
                device,
                reason: "injected bus reset failure".to_string(),
            });
        }
        dev.lost = false;
        dev.stats.resets += 1;
        Ok(())
    }

    fn open(&self, device: DeviceId) -> Result<(), DeviceInitError> {
        let mut state = self.lock();
        let dev = state
            .devices
            .get_mut(&device)
            .ok_or(DeviceInitError::DeviceNotFound(device))?;

        if dev.busy || dev.claimed {
            dev.busy = false;
            return Err(DeviceInitError::DeviceBusy(device));
        }

        dev.claimed = true;
        dev.lost = false;
        dev.stats.opens += 1;
        Ok(())
    }

    fn configure(&self, device: DeviceId, mode: &CaptureMode) -> Result<(), DeviceInitError> {
        let mut state = self.lock();
        let dev = state
            .devices
            .get_mut(&device)
            .ok_or(DeviceInitError::DeviceNotFound(device))?;

        if std::mem::take(&mut dev.fail_configure) {
            return Err(DeviceInitError::Configuration {
                device,
                reason: "injected configuration failure".to_string(),
            });
        }
        if (mode.width, mode.height) != (dev.width, dev.height) {
            return Err(DeviceInitError::Configuration {
                device,
                reason: format!(
                    "unsupported region {}x{}, sensor delivers {}x{}",
                    mode.width, mode.height, dev.width, dev.height
                ),
            });
        }

        dev.configured = true;
        Ok(())
    }

    fn set_transmission(&self, device: DeviceId, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.lock();
        let dev = state.devices.get_mut(&device).ok_or_else(|| DriverError {
            device,
            reason: "unknown device".to_string(),
        })?;

        if !dev.claimed {
            return Err(DriverError {
                device,
                reason: "device not claimed".to_string(),
            });
        }
        if enabled && !dev.configured {
            return Err(DriverError {
                device,
                reason: "device not configured".to_string(),
            });
        }

        dev.transmitting = enabled;
        if enabled {
            dev.stats.transmission_on += 1;
        } else {
            dev.stats.transmission_off += 1;
        }
        drop(state);
        self.frame_ready.notify_all();
        Ok(())
    }

    fn dequeue(
        &self,
        device: DeviceId,
        timeout: Duration,
        consume: &mut dyn FnMut(BorrowedFrame<'_>),
    ) -> Result<(), CaptureError> {
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            {
                let dev = state.devices.get_mut(&device).ok_or_else(|| CaptureError::DeviceLost {
                    device,
                    reason: "unknown device".to_string(),
                })?;

                if dev.lost {
                    return Err(CaptureError::DeviceLost {
                        device,
                        reason: "device disconnected".to_string(),
                    });
                }
                if !dev.claimed || !dev.transmitting {
                    return Err(CaptureError::NotStreaming(device));
                }

                if let Some(image) = dev.next_image() {
                    dev.load_ring(&image);
                    dev.stats.frames_delivered += 1;
                    consume(BorrowedFrame {
                        data: &dev.ring,
                        width: dev.width,
                        height: dev.height,
                        stride: dev.stride,
                        timestamp_us: now_us(),
                    });
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::Timeout(device));
            }
            state = self
                .frame_ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn stop_capture(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.queue.clear();
            dev.stats.capture_stops += 1;
        }
        self.frame_ready.notify_all();
    }

    fn release(&self, device: DeviceId) {
        if let Some(dev) = self.lock().devices.get_mut(&device) {
            dev.claimed = false;
            dev.configured = false;
            dev.transmitting = false;
            dev.stats.releases += 1;
        }
        self.frame_ready.notify_all();
    }

    fn free_context(&self) {
        self.contexts_freed.fetch_add(1, Ordering::AcqRel);
        debug!("Simulated driver context freed");
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Texture value for scene column `x`, row `y` at frame `n`.
fn texture(x: u32, y: u32, n: u64) -> u8 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ n.wrapping_mul(0x1656_67B1_9E37_79F9);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    (h >> 56) as u8
}

/// Synthetic rectified pair: a textured scene seen by the left camera and the
/// same scene shifted left by `disparity` pixels in the right camera.
pub fn synthetic_pair(width: u32, height: u32, disparity: u32, n: u64) -> (Vec<u8>, Vec<u8>) {
    let mut left = Vec::with_capacity(width as usize * height as usize);
    let mut right = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            left.push(texture(x, y, n));
            right.push(texture(x + disparity, y, n));
        }
    }
    (left, right)
}
