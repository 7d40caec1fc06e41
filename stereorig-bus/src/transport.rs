//! Message transports.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use stereorig_data::PointCloudMessage;
use thiserror::Error;
use tracing::{info, trace};

use crate::codec::{CodecError, WireFormat};
use crate::fragment::{MAX_PAYLOAD, fragment};

/// Default multicast group and port.
pub const DEFAULT_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 76, 67), 7667);

/// Errors sending a message. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Channel name {0:?} is empty or longer than 255 bytes")]
    InvalidChannel(String),

    #[error("Encoding failed: {0}")]
    Encode(#[from] CodecError),

    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport rejected message: {0}")]
    Rejected(String),
}

/// Delivers encoded payloads to subscribers of a channel.
pub trait Transport: Send {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransmitError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransmitError> {
        (**self).send(channel, payload)
    }
}

/// UDP multicast transport.
///
/// Payloads larger than one datagram are split with [`fragment`]; receivers
/// join them back with a [`Reassembler`](crate::fragment::Reassembler).
pub struct UdpMulticastTransport {
    socket: UdpSocket,
    target: SocketAddr,
    sequence: AtomicU32,
}

impl UdpMulticastTransport {
    /// Send to `group` with a TTL of 1, so traffic stays on the local network.
    pub fn new(group: SocketAddrV4) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(true)?;
        info!("Publishing to multicast group {}", group);
        Ok(Self::with_socket(socket, SocketAddr::V4(group)))
    }

    /// Send to a plain unicast address instead of a group.
    pub fn unicast(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self::with_socket(socket, target))
    }

    fn with_socket(socket: UdpSocket, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            sequence: AtomicU32::new(0),
        }
    }
}

impl Transport for UdpMulticastTransport {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransmitError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let datagrams = fragment(channel, sequence, payload)?;
        if datagrams.len() > 1 {
            trace!("Message {} split into {} datagrams", sequence, datagrams.len());
        }
        for datagram in &datagrams {
            self.socket.send_to(datagram, self.target)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    failing: AtomicBool,
}

/// In-memory transport that keeps every payload it is given.
///
/// Clones share the same record, so a test can keep one handle while the
/// publisher owns another.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Recorded>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Channel and payload of every accepted send, oldest first.
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decoded point-cloud messages, oldest first.
    pub fn messages(&self) -> Result<Vec<PointCloudMessage>, CodecError> {
        self.sent()
            .iter()
            .map(|(_, payload)| PointCloudMessage::decode(payload))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for RecordingTransport {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransmitError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(TransmitError::Rejected("recording transport set to fail".to_string()));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(TransmitError::TooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD,
            });
        }
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel.to_string(), payload.to_vec()));
        Ok(())
    }
}
