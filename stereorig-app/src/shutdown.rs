//! Interrupt-safe, exactly-once camera teardown.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use stereorig_capture::CameraManager;

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownReason {
    Quit = 1,
    FrameLimit = 2,
    Interrupt = 3,
    DeviceLost = 4,
}

impl ShutdownReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Quit),
            2 => Some(Self::FrameLimit),
            3 => Some(Self::Interrupt),
            4 => Some(Self::DeviceLost),
            _ => None,
        }
    }
}

/// Owns the "shutdown in progress" flag and tears the cameras down once.
///
/// Both the loop thread and the interrupt handler call
/// [`ShutdownController::shutdown`]; whichever wins the flag closes the
/// cameras, the other returns without touching hardware.
#[derive(Default)]
pub struct ShutdownController {
    in_progress: AtomicBool,
    reason: AtomicU8,
    cameras: OnceLock<Arc<CameraManager>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over the opened cameras.
    ///
    /// If a shutdown already started the cameras are closed here. Returns
    /// `false` when cameras were already attached.
    pub fn attach(&self, cameras: Arc<CameraManager>) -> bool {
        if self.cameras.set(cameras).is_err() {
            return false;
        }
        if self.is_shutting_down() {
            if let Some(cameras) = self.cameras.get() {
                cameras.close_all();
            }
        }
        true
    }

    pub fn has_cameras(&self) -> bool {
        self.cameras.get().is_some()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Reason given by the call that started the shutdown.
    pub fn reason(&self) -> Option<ShutdownReason> {
        ShutdownReason::from_u8(self.reason.load(Ordering::SeqCst))
    }

    /// Close every camera and free the driver context.
    ///
    /// Returns `true` for the single call that claimed the flag. The
    /// controller takes no locks of its own; what the driver does on release
    /// is up to [`CameraDriver`](stereorig_capture::CameraDriver).
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.reason.store(reason as u8, Ordering::SeqCst);

        if let Some(cameras) = self.cameras.get() {
            cameras.close_all();
        }
        true
    }

    /// Interrupt shutdown. Returns `true` when the process should exit now.
    ///
    /// Before cameras are attached this only raises the flag; the loop
    /// thread then closes them on attach and exits itself. A call that
    /// loses the flag to another shutdown leaves the exit to that caller.
    pub fn on_interrupt(&self) -> bool {
        let attached = self.has_cameras();
        self.shutdown(ShutdownReason::Interrupt) && attached
    }

    /// Route Ctrl-C / SIGTERM to [`on_interrupt`](Self::on_interrupt) and
    /// exit with code 1 when it says so.
    pub fn install_interrupt_handler(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let controller = Arc::clone(self);
        ctrlc::set_handler(move || {
            if controller.on_interrupt() {
                std::process::exit(1);
            }
        })
    }
}
