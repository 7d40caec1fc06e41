//! Point-cloud wire format.
//!
//! All integers and coordinates are little-endian:
//!
//! ```text
//! "SPC1" | u64 timestamp_us | u16 id_len | frame id | u32 count | count x [f32; 3]
//! ```

use glam::Vec3;
use stereorig_data::PointCloudMessage;
use thiserror::Error;

/// Leading bytes of every encoded message.
pub const MAGIC: &[u8; 4] = b"SPC1";

const HEADER_LEN: usize = MAGIC.len() + 8 + 2;
const POINT_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame id is {0} bytes, at most 65535 allowed")]
    FrameIdTooLong(usize),

    #[error("Point count {0} does not fit the wire format")]
    TooManyPoints(usize),

    #[error("Not a point-cloud message")]
    BadMagic,

    #[error("Message truncated: {needed} bytes needed, {actual} present")]
    Truncated { needed: usize, actual: usize },

    #[error("Frame id is not valid UTF-8")]
    FrameId,

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Binary encoding for bus payloads.
pub trait WireFormat: Sized {
    fn encode(&self) -> Result<Vec<u8>, CodecError>;
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl WireFormat for PointCloudMessage {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let id = self.frame_id.as_bytes();
        let id_len = u16::try_from(id.len()).map_err(|_| CodecError::FrameIdTooLong(id.len()))?;
        let count =
            u32::try_from(self.points.len()).map_err(|_| CodecError::TooManyPoints(self.points.len()))?;

        let coords: Vec<[u32; 3]> = self
            .points
            .iter()
            .map(|p| p.to_array().map(|c| c.to_bits().to_le()))
            .collect();

        let mut out = Vec::with_capacity(HEADER_LEN + id.len() + 4 + coords.len() * POINT_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.timestamp_us.to_le_bytes());
        out.extend_from_slice(&id_len.to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(bytemuck::cast_slice(&coords));
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader { bytes, offset: 0 };

        if reader.take(MAGIC.len())? != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let timestamp_us = u64::from_le_bytes(reader.array()?);
        let id_len = u16::from_le_bytes(reader.array()?) as usize;
        let frame_id = std::str::from_utf8(reader.take(id_len)?)
            .map_err(|_| CodecError::FrameId)?
            .to_string();
        let count = u32::from_le_bytes(reader.array()?) as usize;

        let raw = reader.take(count * POINT_LEN)?;
        let points = raw
            .chunks_exact(POINT_LEN)
            .map(|chunk| {
                let bits: [u32; 3] = bytemuck::pod_read_unaligned(chunk);
                Vec3::from_array(bits.map(|b| f32::from_bits(u32::from_le(b))))
            })
            .collect();

        let rest = bytes.len() - reader.offset;
        if rest != 0 {
            return Err(CodecError::TrailingBytes(rest));
        }

        Ok(PointCloudMessage::new(points, timestamp_us, frame_id))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or(CodecError::Truncated {
            needed: end,
            actual: self.bytes.len(),
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> PointCloudMessage {
        PointCloudMessage::new(
            vec![Vec3::new(0.25, 0.0, 2.5), Vec3::new(-1.0, 3.5, 1.25)],
            1_700_000_000_123_456,
            "stereo",
        )
    }

    #[test]
    fn test_encoded_layout() {
        let bytes = message().encode().unwrap();

        assert_eq!(&bytes[..4], b"SPC1");
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 1_700_000_000_123_456);
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 6);
        assert_eq!(&bytes[14..20], b"stereo");
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 2);
        assert_eq!(f32::from_le_bytes(bytes[24..28].try_into().unwrap()), 0.25);
        assert_eq!(f32::from_le_bytes(bytes[32..36].try_into().unwrap()), 2.5);
        assert_eq!(bytes.len(), 24 + 2 * 12);
    }

    #[test]
    fn test_decode_restores_message() {
        let original = message();
        let decoded = PointCloudMessage::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_cloud() {
        let empty = PointCloudMessage::new(Vec::new(), 7, "");
        let bytes = empty.encode().unwrap();
        assert_eq!(bytes.len(), 18);
        assert!(PointCloudMessage::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        let bytes = message().encode().unwrap();

        assert_eq!(PointCloudMessage::decode(b"XXXX").unwrap_err(), CodecError::BadMagic);
        assert!(matches!(
            PointCloudMessage::decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        assert_eq!(PointCloudMessage::decode(&padded).unwrap_err(), CodecError::TrailingBytes(1));
    }

    #[test]
    fn test_frame_id_too_long() {
        let long = PointCloudMessage::new(Vec::new(), 0, "x".repeat(70_000));
        assert_eq!(long.encode().unwrap_err(), CodecError::FrameIdTooLong(70_000));
    }
}
