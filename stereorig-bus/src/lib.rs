//! Stereorig Bus Crate
//!
//! Publishes point clouds to subscribers on a named channel.
//!
//! ## Modules
//!
//! - [`codec`]: binary wire format for [`PointCloudMessage`](stereorig_data::PointCloudMessage)
//! - [`fragment`]: splitting messages across datagrams and reassembling them
//! - [`transport`]: the [`Transport`] seam, UDP multicast and in-memory transports
//! - [`publisher`]: best-effort [`PointCloudPublisher`]

pub mod codec;
pub mod fragment;
pub mod publisher;
pub mod transport;

pub use codec::{CodecError, MAGIC, WireFormat};
pub use publisher::{AxisConvention, DEFAULT_CHANNEL, PointCloudPublisher};
pub use fragment::{Fragment, MAX_FRAGMENT, MAX_PAYLOAD, Reassembler};
pub use transport::{DEFAULT_GROUP, RecordingTransport, TransmitError, Transport, UdpMulticastTransport};
