//! Command line and rig configuration.
//!
//! A JSON file (`--config`) provides the base [`RigConfig`]; any flag given
//! on the command line overrides the file value.

use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use stereorig_bus::{DEFAULT_CHANNEL, DEFAULT_GROUP};
use stereorig_capture::{CaptureMode, DeviceId, ParseDeviceIdError};
use stereorig_match::StereoParameters;
use thiserror::Error;

/// Left camera of the reference rig.
pub const DEFAULT_LEFT_DEVICE: DeviceId = DeviceId(0x00b09d0100af04d8);
/// Right camera of the reference rig.
pub const DEFAULT_RIGHT_DEVICE: DeviceId = DeviceId(0x00b09d0100a01ac5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    DeviceId(#[from] ParseDeviceIdError),
}

/// Stereorig - stereo point-cloud capture
#[derive(Parser, Debug, Default)]
#[command(name = "stereorig")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON rig configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Calibration directory holding Q, mx1, my1, mx2 and my2
    #[arg(long)]
    pub calib: Option<PathBuf>,

    /// Left camera id (hex 0x... or decimal)
    #[arg(long)]
    pub left: Option<DeviceId>,

    /// Right camera id (hex 0x... or decimal)
    #[arg(long)]
    pub right: Option<DeviceId>,

    /// Multicast group and port to publish on
    #[arg(long)]
    pub group: Option<SocketAddrV4>,

    /// Publish channel name
    #[arg(long)]
    pub channel: Option<String>,

    /// Publish points in body axes (x forward, y right, z up)
    #[arg(long)]
    pub body_axes: bool,

    /// Read tuning keys from stdin
    #[arg(short, long)]
    pub tuning: bool,

    /// Use the simulated camera pair instead of hardware
    #[arg(long)]
    pub simulate: bool,

    /// Stop after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the cameras the webcam driver can see and exit
    #[arg(long)]
    pub list_cameras: bool,
}

/// Everything needed to assemble and run the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub left_device: String,
    pub right_device: String,
    pub calibration_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Sensor region offset of the capture window.
    pub region_left: u32,
    pub region_top: u32,
    pub frame_timeout_ms: u64,
    pub group: SocketAddrV4,
    pub channel: String,
    pub frame_id: String,
    pub body_axes: bool,
    pub params: StereoParameters,
    pub tuning: bool,
    pub simulate: bool,
    /// Disparity of the simulated scene.
    pub sim_disparity: u32,
    pub max_frames: Option<u64>,
    /// Frames between info-level rate reports.
    pub report_interval: u64,
    pub log_level: String,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            left_device: DEFAULT_LEFT_DEVICE.to_string(),
            right_device: DEFAULT_RIGHT_DEVICE.to_string(),
            calibration_dir: PathBuf::from("calib"),
            width: 376,
            height: 240,
            region_left: 0,
            region_top: 0,
            frame_timeout_ms: 500,
            group: DEFAULT_GROUP,
            channel: DEFAULT_CHANNEL.to_string(),
            frame_id: "stereo_camera".to_string(),
            body_axes: false,
            params: StereoParameters::default(),
            tuning: false,
            simulate: false,
            sim_disparity: 8,
            max_frames: None,
            report_interval: 100,
            log_level: "info".to_string(),
        }
    }
}

impl RigConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File config (or defaults) with command-line overrides applied.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.devices()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(dir) = &args.calib {
            self.calibration_dir = dir.clone();
        }
        if let Some(id) = args.left {
            self.left_device = id.to_string();
        }
        if let Some(id) = args.right {
            self.right_device = id.to_string();
        }
        if let Some(group) = args.group {
            self.group = group;
        }
        if let Some(channel) = &args.channel {
            self.channel = channel.clone();
        }
        if let Some(max) = args.max_frames {
            self.max_frames = Some(max);
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        self.body_axes |= args.body_axes;
        self.tuning |= args.tuning;
        self.simulate |= args.simulate;
    }

    /// Left and right camera ids.
    pub fn devices(&self) -> Result<[DeviceId; 2], ConfigError> {
        Ok([self.left_device.parse()?, self.right_device.parse()?])
    }

    pub fn capture_mode(&self) -> CaptureMode {
        CaptureMode::new(self.width, self.height)
            .with_offset(self.region_left, self.region_top)
            .with_frame_timeout(Duration::from_millis(self.frame_timeout_ms))
    }
}
