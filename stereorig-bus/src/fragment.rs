//! Splitting messages across datagrams and joining them back.
//!
//! Every datagram carries `u8 len | channel | u32 sequence | u16 index |
//! u16 count | chunk`, integers little-endian. All fragments of one message
//! share its sequence number; a message that fits one datagram is sent as
//! fragment 0 of 1.

use std::collections::HashMap;

use tracing::debug;

use crate::transport::TransmitError;

/// Largest chunk of payload carried by one datagram.
pub const MAX_FRAGMENT: usize = 60_000;

/// Most fragments one message may be split into.
pub const MAX_FRAGMENTS: usize = u16::MAX as usize;

/// Largest payload one message may carry.
pub const MAX_PAYLOAD: usize = MAX_FRAGMENT * MAX_FRAGMENTS;

const FRAGMENT_HEADER: usize = 4 + 2 + 2;

/// Partially received messages kept before the oldest is dropped.
const MAX_PENDING: usize = 8;

/// One received datagram, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub channel: &'a str,
    pub sequence: u32,
    pub index: u16,
    pub count: u16,
    pub data: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Parse a datagram. `None` for anything malformed.
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        let (&len, rest) = datagram.split_first()?;
        let len = len as usize;
        if len == 0 || rest.len() < len + FRAGMENT_HEADER {
            return None;
        }
        let channel = std::str::from_utf8(&rest[..len]).ok()?;
        let (header, data) = rest[len..].split_at(FRAGMENT_HEADER);

        let sequence = u32::from_le_bytes(header[0..4].try_into().ok()?);
        let index = u16::from_le_bytes(header[4..6].try_into().ok()?);
        let count = u16::from_le_bytes(header[6..8].try_into().ok()?);
        if count == 0 || index >= count {
            return None;
        }

        Some(Self {
            channel,
            sequence,
            index,
            count,
            data,
        })
    }
}

/// Split `payload` into datagrams tagged with `channel` and `sequence`.
pub fn fragment(channel: &str, sequence: u32, payload: &[u8]) -> Result<Vec<Vec<u8>>, TransmitError> {
    fragment_with(channel, sequence, payload, MAX_FRAGMENT)
}

fn fragment_with(
    channel: &str,
    sequence: u32,
    payload: &[u8],
    chunk: usize,
) -> Result<Vec<Vec<u8>>, TransmitError> {
    let name = channel.as_bytes();
    let len = u8::try_from(name.len())
        .ok()
        .filter(|&len| len > 0)
        .ok_or_else(|| TransmitError::InvalidChannel(channel.to_string()))?;

    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(chunk).collect()
    };
    let count = u16::try_from(chunks.len()).map_err(|_| TransmitError::TooLarge {
        size: payload.len(),
        limit: chunk * MAX_FRAGMENTS,
    })?;

    let datagrams = chunks
        .into_iter()
        .enumerate()
        .map(|(index, data)| {
            let mut datagram = Vec::with_capacity(1 + name.len() + FRAGMENT_HEADER + data.len());
            datagram.push(len);
            datagram.extend_from_slice(name);
            datagram.extend_from_slice(&sequence.to_le_bytes());
            datagram.extend_from_slice(&(index as u16).to_le_bytes());
            datagram.extend_from_slice(&count.to_le_bytes());
            datagram.extend_from_slice(data);
            datagram
        })
        .collect();
    Ok(datagrams)
}

struct Partial {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    arrival: u64,
}

/// Collects fragments until every piece of a message has arrived.
///
/// Fragments may arrive in any order and messages may interleave. When more
/// than a handful of messages are incomplete the oldest is dropped, so a
/// lost datagram only costs its own message.
#[derive(Default)]
pub struct Reassembler {
    pending: HashMap<(String, u32), Partial>,
    arrivals: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one datagram. Returns the channel and full payload once the
    /// last missing fragment of a message arrives.
    pub fn push(&mut self, datagram: &[u8]) -> Option<(String, Vec<u8>)> {
        let fragment = Fragment::parse(datagram)?;
        if fragment.count == 1 {
            return Some((fragment.channel.to_string(), fragment.data.to_vec()));
        }

        self.arrivals += 1;
        let key = (fragment.channel.to_string(), fragment.sequence);
        let count = fragment.count as usize;
        let partial = self.pending.entry(key.clone()).or_insert_with(|| Partial {
            chunks: vec![None; count],
            received: 0,
            arrival: 0,
        });
        if partial.chunks.len() != count {
            debug!("Fragment count changed for sequence {}, restarting", fragment.sequence);
            partial.chunks = vec![None; count];
            partial.received = 0;
        }
        partial.arrival = self.arrivals;

        let slot = &mut partial.chunks[fragment.index as usize];
        if slot.is_none() {
            *slot = Some(fragment.data.to_vec());
            partial.received += 1;
        }

        if partial.received == count {
            let partial = self.pending.remove(&key)?;
            let payload = partial.chunks.into_iter().flatten().flatten().collect();
            return Some((key.0, payload));
        }

        self.evict();
        None
    }

    /// Messages still missing fragments.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn evict(&mut self) {
        while self.pending.len() > MAX_PENDING {
            let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, partial)| partial.arrival)
                .map(|(key, _)| key.clone())
            else {
                return;
            };
            debug!("Dropping incomplete message {} on {}", oldest.1, oldest.0);
            self.pending.remove(&oldest);
        }
    }
}
