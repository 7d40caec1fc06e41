//! The capture → rectify → match → publish loop.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

use stereorig_bus::{PointCloudPublisher, Transport};
use stereorig_capture::{CameraManager, Side};
use stereorig_data::{CalibrationSet, Frame, RectifiedFramePair, rectify};
use stereorig_match::{ParameterStore, StereoEngine, StereoEngineAdapter, TuningCommand, TuningOutcome};
use tracing::{debug, error, info, warn};

use crate::rate::FrameRateMonitor;
use crate::shutdown::{ShutdownController, ShutdownReason};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Quit,
    FrameLimit,
    Interrupted,
    DeviceLost,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Quit | Self::FrameLimit => 0,
            Self::Interrupted | Self::DeviceLost => 1,
        }
    }

    fn shutdown_reason(self) -> ShutdownReason {
        match self {
            Self::Quit => ShutdownReason::Quit,
            Self::FrameLimit => ShutdownReason::FrameLimit,
            Self::Interrupted => ShutdownReason::Interrupt,
            Self::DeviceLost => ShutdownReason::DeviceLost,
        }
    }
}

/// Loop settings that are not owned by a component.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Reference frame tag on published clouds.
    pub frame_id: String,
    pub max_frames: Option<u64>,
    /// Frames between info-level rate reports.
    pub report_interval: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            frame_id: "stereo_camera".to_string(),
            max_frames: None,
            report_interval: 100,
        }
    }
}

enum Step {
    /// Drop this cycle and carry on.
    Skip,
    Stop(RunOutcome),
}

/// Owns every component of one running rig.
pub struct Pipeline<E, T> {
    cameras: Arc<CameraManager>,
    calibration: Arc<CalibrationSet>,
    adapter: StereoEngineAdapter<E>,
    parameters: ParameterStore,
    publisher: PointCloudPublisher<T>,
    controller: Arc<ShutdownController>,
    tuning: Option<Receiver<TuningCommand>>,
    monitor: FrameRateMonitor,
    options: PipelineOptions,
}

impl<E: StereoEngine, T: Transport> Pipeline<E, T> {
    /// Assemble the loop and attach the cameras to the shutdown controller.
    pub fn new(
        cameras: Arc<CameraManager>,
        calibration: Arc<CalibrationSet>,
        engine: E,
        parameters: ParameterStore,
        publisher: PointCloudPublisher<T>,
        controller: Arc<ShutdownController>,
    ) -> Self {
        controller.attach(cameras.clone());
        Self {
            adapter: StereoEngineAdapter::new(engine, calibration.clone()),
            cameras,
            calibration,
            parameters,
            publisher,
            controller,
            tuning: None,
            monitor: FrameRateMonitor::new(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_tuning(mut self, commands: Receiver<TuningCommand>) -> Self {
        self.tuning = Some(commands);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn publisher(&self) -> &PointCloudPublisher<T> {
        &self.publisher
    }

    pub fn frames(&self) -> u64 {
        self.monitor.frames()
    }

    /// Run cycles until quit, frame limit, interrupt or device loss.
    ///
    /// Every outcome leaves the cameras closed.
    pub fn run(&mut self) -> RunOutcome {
        info!("Pipeline running with {} engine", self.adapter.engine().name());
        self.monitor = FrameRateMonitor::new();

        let outcome = loop {
            if self.controller.is_shutting_down() {
                break RunOutcome::Interrupted;
            }
            if self
                .options
                .max_frames
                .is_some_and(|max| self.monitor.frames() >= max)
            {
                break RunOutcome::FrameLimit;
            }

            match self.cycle() {
                Ok(()) | Err(Step::Skip) => {}
                Err(Step::Stop(outcome)) => break outcome,
            }
        };

        if !self.controller.shutdown(outcome.shutdown_reason()) {
            debug!("Cameras already torn down by {:?}", self.controller.reason());
        }
        info!(
            "Pipeline stopped: {:?} after {} frames, {} clouds published",
            outcome,
            self.monitor.frames(),
            self.publisher.published()
        );
        outcome
    }

    fn cycle(&mut self) -> Result<(), Step> {
        let left = self.capture(Side::Left)?;
        let right = self.capture(Side::Right)?;

        let left = rectify(&left, self.calibration.left_map()).map_err(|e| {
            warn!("Skipping cycle: left rectification failed: {}", e);
            Step::Skip
        })?;
        let right = rectify(&right, self.calibration.right_map()).map_err(|e| {
            warn!("Skipping cycle: right rectification failed: {}", e);
            Step::Skip
        })?;
        let pair = RectifiedFramePair::new(left, right).map_err(|e| {
            warn!("Skipping cycle: {}", e);
            Step::Skip
        })?;

        let params = self.parameters.snapshot();
        let points = self.adapter.compute(&pair, &params);
        debug!("{} points from frame pair at {} us", points.len(), pair.timestamp_us());

        if self.controller.is_shutting_down() {
            return Err(Step::Stop(RunOutcome::Interrupted));
        }
        if let Err(e) = self
            .publisher
            .publish(&points, &self.options.frame_id, pair.timestamp_us())
        {
            warn!("Dropped point cloud: {}", e);
        }
        // An interrupt during publish already closed the cameras.
        if self.controller.is_shutting_down() {
            return Err(Step::Stop(RunOutcome::Interrupted));
        }

        let quit = self.drain_tuning();

        let sample = self.monitor.tick();
        debug!("{} (instant {:.2} fps)", sample, sample.instant_fps);
        if self.options.report_interval > 0 && sample.frames % self.options.report_interval == 0 {
            info!("{}", sample);
        }

        if quit {
            return Err(Step::Stop(RunOutcome::Quit));
        }
        Ok(())
    }

    fn capture(&self, side: Side) -> Result<Frame, Step> {
        let camera = self.cameras.get(side);
        camera.capture_frame().map_err(|e| {
            if self.controller.is_shutting_down() {
                Step::Stop(RunOutcome::Interrupted)
            } else if e.is_fatal() {
                error!("{:?} camera lost: {}", side, e);
                Step::Stop(RunOutcome::DeviceLost)
            } else {
                warn!("Skipping cycle: {:?} camera: {}", side, e);
                Step::Skip
            }
        })
    }

    /// Apply every pending command. Returns `true` if quit was requested.
    fn drain_tuning(&mut self) -> bool {
        let Some(commands) = &self.tuning else {
            return false;
        };

        let mut quit = false;
        let mut closed = false;
        loop {
            match commands.try_recv() {
                Ok(command) => match self.parameters.apply(command) {
                    TuningOutcome::Changed => info!("{}", self.parameters.snapshot()),
                    TuningOutcome::Unchanged => debug!("{:?} ignored at bound", command),
                    TuningOutcome::Quit => {
                        info!("Quit requested");
                        quit = true;
                    }
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            debug!("Tuning input closed");
            self.tuning = None;
        }
        quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use stereorig_bus::{RecordingTransport, TransmitError};
    use stereorig_capture::{CaptureMode, DeviceId, SimulatedDriver};
    use stereorig_data::stereo_reprojection;
    use stereorig_match::{BlockProbe, StereoParameters};

    const LEFT: DeviceId = DeviceId(1);
    const RIGHT: DeviceId = DeviceId(2);

    struct Rig {
        driver: Arc<SimulatedDriver>,
        transport: RecordingTransport,
        pipeline: Pipeline<BlockProbe, RecordingTransport>,
    }

    fn rig(max_frames: Option<u64>) -> Rig {
        let driver = Arc::new(SimulatedDriver::stereo_rig([LEFT, RIGHT], 32, 16, 4));
        let cameras = CameraManager::open_pair(driver.clone(), [LEFT, RIGHT], &CaptureMode::new(32, 16))
            .unwrap();
        let calibration = Arc::new(CalibrationSet::identity(
            32,
            16,
            stereo_reprojection(100.0, 16.0, 8.0, 0.1),
        ));
        let transport = RecordingTransport::new();
        let params = StereoParameters {
            disparity: 4,
            block_size: 8,
            sobel_limit: 0,
            sad_threshold: 0,
        };

        let pipeline = Pipeline::new(
            Arc::new(cameras),
            calibration,
            BlockProbe,
            ParameterStore::new(params),
            PointCloudPublisher::new(transport.clone()),
            Arc::new(ShutdownController::new()),
        )
        .with_options(PipelineOptions {
            max_frames,
            ..PipelineOptions::default()
        });

        Rig {
            driver,
            transport,
            pipeline,
        }
    }

    #[test]
    fn test_frame_limit_publishes_each_cycle() {
        let mut rig = rig(Some(3));
        assert_eq!(rig.pipeline.run(), RunOutcome::FrameLimit);

        let messages = rig.transport.messages().unwrap();
        assert_eq!(messages.len(), 3);
        for message in &messages {
            assert!(!message.is_empty());
            assert!(message.points.iter().all(|p| (p.z - 2.5).abs() < 1e-4));
        }
        assert_eq!(rig.driver.stats(LEFT).unwrap().releases, 1);
        assert_eq!(rig.driver.contexts_freed(), 1);
    }

    #[test]
    fn test_quit_command_stops_with_code_zero() {
        let mut rig = rig(Some(100));
        let (sender, receiver) = mpsc::channel();
        sender.send(TuningCommand::IncreaseDisparity).unwrap();
        sender.send(TuningCommand::Quit).unwrap();
        rig.pipeline = rig.pipeline.with_tuning(receiver);

        let outcome = rig.pipeline.run();
        assert_eq!(outcome, RunOutcome::Quit);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(rig.pipeline.frames(), 1);
        assert_eq!(rig.pipeline.parameters().snapshot().disparity, 5);
        assert_eq!(rig.driver.stats(RIGHT).unwrap().releases, 1);
    }

    #[test]
    fn test_device_loss_is_fatal() {
        let mut rig = rig(None);
        rig.driver.disconnect(RIGHT);

        let outcome = rig.pipeline.run();
        assert_eq!(outcome, RunOutcome::DeviceLost);
        assert_eq!(outcome.exit_code(), 1);
        assert!(rig.transport.is_empty());
        assert_eq!(rig.driver.stats(LEFT).unwrap().releases, 1);
        assert_eq!(rig.driver.stats(RIGHT).unwrap().releases, 1);
    }

    #[test]
    fn test_transmit_failure_is_not_fatal() {
        let mut rig = rig(Some(2));
        rig.transport.set_failing(true);

        assert_eq!(rig.pipeline.run(), RunOutcome::FrameLimit);
        assert_eq!(rig.pipeline.frames(), 2);
        assert_eq!(rig.pipeline.publisher().failed(), 2);
        assert!(rig.transport.is_empty());
    }

    /// Records like [`RecordingTransport`] and fires an interrupt mid-send.
    struct InterruptingTransport {
        inner: RecordingTransport,
        controller: Arc<ShutdownController>,
    }

    impl Transport for InterruptingTransport {
        fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransmitError> {
            let result = self.inner.send(channel, payload);
            self.controller.on_interrupt();
            result
        }
    }

    #[test]
    fn test_interrupt_during_publish_stops_the_cycle() {
        let driver = Arc::new(SimulatedDriver::stereo_rig([LEFT, RIGHT], 32, 16, 4));
        let cameras = CameraManager::open_pair(driver.clone(), [LEFT, RIGHT], &CaptureMode::new(32, 16))
            .unwrap();
        let controller = Arc::new(ShutdownController::new());
        let recorded = RecordingTransport::new();
        let transport = InterruptingTransport {
            inner: recorded.clone(),
            controller: controller.clone(),
        };
        let (sender, receiver) = mpsc::channel();
        sender.send(TuningCommand::IncreaseDisparity).unwrap();

        let mut pipeline = Pipeline::new(
            Arc::new(cameras),
            Arc::new(CalibrationSet::identity(32, 16, stereo_reprojection(100.0, 16.0, 8.0, 0.1))),
            BlockProbe,
            ParameterStore::new(StereoParameters {
                disparity: 4,
                block_size: 8,
                sobel_limit: 0,
                sad_threshold: 0,
            }),
            PointCloudPublisher::new(transport),
            controller.clone(),
        )
        .with_tuning(receiver);

        let outcome = pipeline.run();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(recorded.len(), 1);
        assert_eq!(pipeline.frames(), 0);
        assert_eq!(pipeline.parameters().snapshot().disparity, 4);
        assert_eq!(controller.reason(), Some(ShutdownReason::Interrupt));
        assert_eq!(driver.stats(LEFT).unwrap().releases, 1);
        assert_eq!(driver.contexts_freed(), 1);
    }

    #[test]
    fn test_closed_tuning_channel_is_dropped() {
        let mut rig = rig(Some(2));
        let (sender, receiver) = mpsc::channel();
        drop(sender);
        rig.pipeline = rig.pipeline.with_tuning(receiver);

        assert_eq!(rig.pipeline.run(), RunOutcome::FrameLimit);
        assert!(rig.pipeline.tuning.is_none());
    }
}
