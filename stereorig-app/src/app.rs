//! Startup wiring.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use stereorig_bus::{AxisConvention, PointCloudPublisher, Transport, UdpMulticastTransport};
use stereorig_capture::{CameraDriver, CameraManager, DeviceId, SimulatedDriver};
use stereorig_data::{CalibrationSet, stereo_reprojection};
use stereorig_match::{BlockProbe, ParameterStore};
use tracing::{info, warn};

use crate::config::RigConfig;
use crate::pipeline::{Pipeline, PipelineOptions, RunOutcome};
use crate::shutdown::ShutdownController;
use crate::tuning;

/// Frame pacing of the simulated rig.
const SIMULATED_FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// Baseline assumed for the simulated rig, in metres.
const SIMULATED_BASELINE: f64 = 0.12;

/// Run the rig until it stops, publishing over UDP multicast.
pub fn run(config: &RigConfig) -> Result<RunOutcome, Box<dyn Error>> {
    let controller = Arc::new(ShutdownController::new());
    controller.install_interrupt_handler()?;

    let transport = UdpMulticastTransport::new(config.group)?;
    run_with(config, controller, transport)
}

/// Run the rig with the given shutdown controller and transport.
pub fn run_with<T: Transport>(
    config: &RigConfig,
    controller: Arc<ShutdownController>,
    transport: T,
) -> Result<RunOutcome, Box<dyn Error>> {
    let devices = config.devices()?;
    let calibration = Arc::new(load_calibration(config)?);

    let mode = config.capture_mode();
    let resolution = calibration.resolution();
    if (mode.width, mode.height) != resolution {
        return Err(format!(
            "Capture mode {}x{} does not match calibration {}x{}",
            mode.width, mode.height, resolution.0, resolution.1
        )
        .into());
    }

    let driver = camera_driver(config, devices)?;
    let cameras = Arc::new(CameraManager::open_pair(driver, devices, &mode)?);

    let axes = if config.body_axes {
        AxisConvention::Body
    } else {
        AxisConvention::Optical
    };
    let publisher = PointCloudPublisher::new(transport)
        .with_channel(config.channel.clone())
        .with_axes(axes);

    let mut pipeline = Pipeline::new(
        cameras,
        calibration,
        BlockProbe::new(),
        ParameterStore::new(config.params),
        publisher,
        controller,
    )
    .with_options(PipelineOptions {
        frame_id: config.frame_id.clone(),
        max_frames: config.max_frames,
        report_interval: config.report_interval,
    });

    info!("Parameters: {}", pipeline.parameters().snapshot());
    if config.tuning {
        pipeline = pipeline.with_tuning(tuning::spawn_stdin_reader()?);
        info!("Tuning keys: R/T disparity, w/s sobel limit, g/b block size, y/h SAD threshold, q quit");
    }

    Ok(pipeline.run())
}

/// Cameras the hardware driver can see, as id and name.
pub fn list_cameras() -> Result<Vec<(DeviceId, String)>, Box<dyn Error>> {
    #[cfg(feature = "webcam")]
    let cameras: Result<Vec<(DeviceId, String)>, Box<dyn Error>> =
        stereorig_capture::WebcamDriver::list_devices().map_err(Into::into);

    #[cfg(not(feature = "webcam"))]
    let cameras: Result<Vec<(DeviceId, String)>, Box<dyn Error>> =
        Err("No camera driver built in: enable the `webcam` feature".into());

    cameras
}

fn load_calibration(config: &RigConfig) -> Result<CalibrationSet, Box<dyn Error>> {
    if config.simulate && !config.calibration_dir.exists() {
        warn!(
            "No calibration at {}, using an undistorted simulated rig",
            config.calibration_dir.display()
        );
        let (width, height) = (config.width as f64, config.height as f64);
        return Ok(CalibrationSet::identity(
            config.width,
            config.height,
            stereo_reprojection(width, width / 2.0, height / 2.0, SIMULATED_BASELINE),
        ));
    }

    Ok(CalibrationSet::load(&config.calibration_dir)?)
}

fn camera_driver(
    config: &RigConfig,
    devices: [DeviceId; 2],
) -> Result<Arc<dyn CameraDriver>, Box<dyn Error>> {
    if config.simulate {
        info!("Using simulated cameras, scene disparity {} px", config.sim_disparity);
        let driver =
            SimulatedDriver::stereo_rig(devices, config.width, config.height, config.sim_disparity)
                .with_frame_interval(SIMULATED_FRAME_INTERVAL);
        return Ok(Arc::new(driver));
    }

    #[cfg(feature = "webcam")]
    let driver: Result<Arc<dyn CameraDriver>, Box<dyn Error>> =
        Ok(Arc::new(stereorig_capture::WebcamDriver::new()));

    #[cfg(not(feature = "webcam"))]
    let driver: Result<Arc<dyn CameraDriver>, Box<dyn Error>> =
        Err("No camera driver built in: enable the `webcam` feature or pass --simulate".into());

    driver
}
