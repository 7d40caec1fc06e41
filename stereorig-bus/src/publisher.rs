//! Best-effort point-cloud publishing.

use glam::Vec3;
use stereorig_data::{DisparityPoint, PointCloudMessage};
use tracing::trace;

use crate::codec::WireFormat;
use crate::transport::{TransmitError, Transport};

/// Channel point clouds are published on unless configured otherwise.
pub const DEFAULT_CHANNEL: &str = "stereo-points";

/// Axis layout of published points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisConvention {
    /// Camera optical frame: x right, y down, z forward.
    #[default]
    Optical,
    /// Vehicle body frame: x forward, y right, z up.
    Body,
}

impl AxisConvention {
    pub fn apply(self, p: Vec3) -> Vec3 {
        match self {
            Self::Optical => p,
            Self::Body => Vec3::new(p.z, p.x, -p.y),
        }
    }
}

/// Sends one message per cycle on a fixed channel.
///
/// Sending is synchronous. A failed send loses that cycle's cloud and is
/// never retried.
pub struct PointCloudPublisher<T> {
    transport: T,
    channel: String,
    axes: AxisConvention,
    published: u64,
    failed: u64,
}

impl<T: Transport> PointCloudPublisher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: DEFAULT_CHANNEL.to_string(),
            axes: AxisConvention::default(),
            published: 0,
            failed: 0,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_axes(mut self, axes: AxisConvention) -> Self {
        self.axes = axes;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages sent successfully so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Messages lost to transmit errors so far.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Build, encode and send one cloud, preserving point order.
    pub fn publish(
        &mut self,
        points: &[DisparityPoint],
        reference_frame: &str,
        timestamp_us: u64,
    ) -> Result<(), TransmitError> {
        let message = PointCloudMessage::new(
            points.iter().map(|p| self.axes.apply(p.point)).collect(),
            timestamp_us,
            reference_frame,
        );

        let result = message
            .encode()
            .map_err(TransmitError::from)
            .and_then(|payload| self.transport.send(&self.channel, &payload));

        match &result {
            Ok(()) => {
                self.published += 1;
                trace!("Published {} points on {}", message.len(), self.channel);
            }
            Err(_) => self.failed += 1,
        }
        result
    }
}
