//! Webcam capture using nokhwa.
//!
//! Every opened webcam gets a capture thread that owns its `nokhwa::Camera`;
//! the driver talks to it over channels so teardown never has to share the
//! camera object across threads. Device ids are webcam indices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nokhwa::Camera;
use nokhwa::pixel_format::LumaFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use tracing::{debug, info, warn};

use crate::source::{
    BorrowedFrame, CameraDriver, CaptureError, CaptureMode, DeviceId, DeviceInitError, DriverError,
};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = SyncSender<Result<(), String>>;

enum Command {
    Configure(CaptureMode, Reply),
    Transmit(bool, Reply),
    Shutdown,
}

struct CapturedImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    timestamp_us: u64,
}

struct Worker {
    commands: Sender<Command>,
    frames: Mutex<Receiver<Result<CapturedImage, String>>>,
    released: AtomicBool,
}

/// Webcam driver backed by nokhwa.
#[derive(Default)]
pub struct WebcamDriver {
    workers: Mutex<HashMap<DeviceId, Arc<Worker>>>,
}

impl WebcamDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Webcams the platform backend can see, keyed by the id `open` takes.
    pub fn list_devices() -> Result<Vec<(DeviceId, String)>, String> {
        let cameras = nokhwa::query(ApiBackend::Auto).map_err(|e| e.to_string())?;
        Ok(cameras
            .into_iter()
            .filter_map(|info| {
                let index = info.index().as_index().ok()?;
                Some((DeviceId(index as u64), info.human_name()))
            })
            .collect())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self, device: DeviceId) -> Option<Arc<Worker>> {
        self.lock().get(&device).cloned()
    }

    fn request(
        &self,
        device: DeviceId,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<(), String> {
        let worker = self
            .worker(device)
            .ok_or_else(|| "device not open".to_string())?;
        let (reply, response) = mpsc::sync_channel(1);
        worker
            .commands
            .send(command(reply))
            .map_err(|_| "capture thread exited".to_string())?;
        response
            .recv()
            .map_err(|_| "capture thread exited".to_string())?
    }
}

impl CameraDriver for WebcamDriver {
    fn name(&self) -> &str {
        "webcam"
    }

    fn open(&self, device: DeviceId) -> Result<(), DeviceInitError> {
        let index = u32::try_from(device.0).map_err(|_| DeviceInitError::DeviceNotFound(device))?;
        if self.lock().contains_key(&device) {
            return Err(DeviceInitError::DeviceBusy(device));
        }

        let (commands, command_rx) = mpsc::channel();
        let (frame_tx, frames) = mpsc::sync_channel(1);
        let (opened_tx, opened) = mpsc::sync_channel(1);

        std::thread::Builder::new()
            .name(format!("webcam-{}", index))
            .spawn(move || run_worker(index, command_rx, frame_tx, opened_tx))
            .map_err(|e| DeviceInitError::Configuration {
                device,
                reason: format!("failed to spawn capture thread: {}", e),
            })?;

        match opened.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                warn!("Failed to open webcam {}: {}", index, reason);
                return Err(DeviceInitError::DeviceNotFound(device));
            }
            Err(_) => return Err(DeviceInitError::DeviceBusy(device)),
        }

        self.lock().insert(
            device,
            Arc::new(Worker {
                commands,
                frames: Mutex::new(frames),
                released: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    fn configure(&self, device: DeviceId, mode: &CaptureMode) -> Result<(), DeviceInitError> {
        if mode.left != 0 || mode.top != 0 {
            warn!("Webcams cannot crop on the sensor; ignoring region offset");
        }
        if mode.auto_exposure {
            debug!("Webcam exposure is automatic by default");
        }

        let mode = *mode;
        self.request(device, |reply| Command::Configure(mode, reply))
            .map_err(|reason| DeviceInitError::Configuration { device, reason })
    }

    fn set_transmission(&self, device: DeviceId, enabled: bool) -> Result<(), DriverError> {
        self.request(device, |reply| Command::Transmit(enabled, reply))
            .map_err(|reason| DriverError { device, reason })
    }

    fn dequeue(
        &self,
        device: DeviceId,
        timeout: Duration,
        consume: &mut dyn FnMut(BorrowedFrame<'_>),
    ) -> Result<(), CaptureError> {
        let worker = self.worker(device).ok_or(CaptureError::NotStreaming(device))?;
        let frames = worker.frames.lock().unwrap_or_else(PoisonError::into_inner);

        match frames.recv_timeout(timeout) {
            Ok(Ok(image)) => {
                consume(BorrowedFrame {
                    data: &image.pixels,
                    width: image.width,
                    height: image.height,
                    stride: image.width,
                    timestamp_us: image.timestamp_us,
                });
                Ok(())
            }
            Ok(Err(reason)) => Err(CaptureError::Device { device, reason }),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(device)),
            Err(RecvTimeoutError::Disconnected) if worker.released.load(Ordering::Acquire) => {
                Err(CaptureError::NotStreaming(device))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::DeviceLost {
                device,
                reason: "capture thread exited".to_string(),
            }),
        }
    }

    fn stop_capture(&self, device: DeviceId) {
        debug!("Webcam {} capture stops with its stream", device);
    }

    fn release(&self, device: DeviceId) {
        if let Some(worker) = self.lock().remove(&device) {
            worker.released.store(true, Ordering::Release);
            let _ = worker.commands.send(Command::Shutdown);
        }
    }
}

fn run_worker(
    index: u32,
    commands: Receiver<Command>,
    frames: SyncSender<Result<CapturedImage, String>>,
    opened: Reply,
) {
    let requested =
        RequestedFormat::new::<LumaFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => {
            let _ = opened.send(Ok(()));
            camera
        }
        Err(e) => {
            let _ = opened.send(Err(e.to_string()));
            return;
        }
    };
    info!("Webcam {} opened", index);

    let mut streaming = false;
    loop {
        let command = if streaming {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Configure(mode, reply)) => {
                let result = camera
                    .set_resolution(Resolution::new(mode.width, mode.height))
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            Some(Command::Transmit(enabled, reply)) => {
                let result = if enabled {
                    camera.open_stream()
                } else {
                    camera.stop_stream()
                }
                .map_err(|e| e.to_string());
                if result.is_ok() {
                    streaming = enabled;
                }
                let _ = reply.send(result);
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        if streaming {
            let captured = camera
                .frame()
                .and_then(|buffer| buffer.decode_image::<LumaFormat>())
                .map(|decoded| CapturedImage {
                    width: decoded.width(),
                    height: decoded.height(),
                    pixels: decoded.into_raw(),
                    timestamp_us: now_us(),
                })
                .map_err(|e| e.to_string());

            // Drop the new frame if the loop has not taken the previous one.
            match frames.try_send(captured) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }

    if streaming {
        let _ = camera.stop_stream();
    }
    info!("Webcam {} capture thread stopped", index);
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
