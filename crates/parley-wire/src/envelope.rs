//! Envelope framing.
//!
//! # Frame Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Magic (0x50) |    Version    |     Type      |    Flags      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Payload length (u32, big endian)             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload                            |
//! ```
//!
//! `HandshakeInit` carries the RSA-OAEP wrapped session key, `Data` carries
//! `IV || AES-CBC ciphertext`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic byte identifying Parley frames.
pub const FRAME_MAGIC: u8 = 0x50; // 'P'

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

/// Header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a frame can describe: the range of the length field.
pub const FRAME_MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Initiator handing a wrapped session key to the responder.
    HandshakeInit = 0x01,
    /// Application data under an established session key.
    Data = 0x10,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::HandshakeInit),
            0x10 => Ok(Self::Data),
            _ => Err(WireError::UnknownFrameType(value)),
        }
    }
}

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("invalid magic byte: 0x{0:02x}, expected 0x{1:02x}")]
    InvalidMagic(u8, u8),

    #[error("unsupported version: {0}, expected {1}")]
    UnsupportedVersion(u8, u8),

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("payload length mismatch: header says {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large: {0} bytes, maximum {1}")]
    PayloadTooLarge(usize, usize),
}

/// Frame header (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame version.
    pub version: u8,
    /// Frame type.
    pub frame_type: FrameType,
    /// Reserved flags.
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(frame_type: FrameType, payload_len: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            frame_type,
            flags: 0,
            payload_len,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WireError::TooShort(buf.len(), FRAME_HEADER_SIZE));
        }

        buf[0] = FRAME_MAGIC;
        buf[1] = self.version;
        buf[2] = self.frame_type as u8;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());

        Ok(FRAME_HEADER_SIZE)
    }

    /// Decode header from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WireError::TooShort(buf.len(), FRAME_HEADER_SIZE));
        }

        if buf[0] != FRAME_MAGIC {
            return Err(WireError::InvalidMagic(buf[0], FRAME_MAGIC));
        }

        let version = buf[1];
        if version != FRAME_VERSION {
            return Err(WireError::UnsupportedVersion(version, FRAME_VERSION));
        }

        let frame_type = FrameType::try_from(buf[2])?;
        let flags = buf[3];
        let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        Ok(Self {
            version,
            frame_type,
            flags,
            payload_len,
        })
    }
}

/// A message carried by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// First and only handshake leg: session key wrapped for the responder.
    HandshakeInit { wrapped_key: Bytes },
    /// Codec output for an established session.
    Data { payload: Bytes },
}

impl Envelope {
    pub fn handshake_init(wrapped_key: impl Into<Bytes>) -> Self {
        Self::HandshakeInit {
            wrapped_key: wrapped_key.into(),
        }
    }

    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::Data {
            payload: payload.into(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::HandshakeInit { .. } => FrameType::HandshakeInit,
            Self::Data { .. } => FrameType::Data,
        }
    }

    /// The opaque body, whichever variant this is.
    pub fn payload(&self) -> &Bytes {
        match self {
            Self::HandshakeInit { wrapped_key } => wrapped_key,
            Self::Data { payload } => payload,
        }
    }

    /// Encode header and payload into a single frame.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let payload = self.payload();
        if payload.len() > FRAME_MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge(
                payload.len(),
                FRAME_MAX_PAYLOAD_SIZE,
            ));
        }

        let header = FrameHeader::new(self.frame_type(), payload.len() as u32);
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        header.encode(&mut header_buf)?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_slice(&header_buf);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    /// Decode a complete frame. The payload is sliced, not copied.
    ///
    /// The declared length must match the bytes actually present, so a
    /// hostile header never drives an allocation.
    pub fn decode(frame: Bytes) -> Result<Self, WireError> {
        let header = FrameHeader::decode(&frame)?;

        let declared = header.payload_len as usize;
        let actual = frame.len() - FRAME_HEADER_SIZE;
        if declared != actual {
            return Err(WireError::LengthMismatch { declared, actual });
        }

        let payload = frame.slice(FRAME_HEADER_SIZE..);
        Ok(match header.frame_type {
            FrameType::HandshakeInit => Self::HandshakeInit {
                wrapped_key: payload,
            },
            FrameType::Data => Self::Data { payload },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(FrameType::Data, 48);

        let mut buf = [0u8; 16];
        header.encode(&mut buf).unwrap();

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded.version, FRAME_VERSION);
        assert_eq!(decoded.frame_type, FrameType::Data);
        assert_eq!(decoded.payload_len, 48);
    }

    #[test]
    fn test_handshake_envelope() {
        let envelope = Envelope::handshake_init(vec![0xaa; 256]);
        let frame = envelope.encode().unwrap();

        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 256);
        assert_eq!(frame[2], FrameType::HandshakeInit as u8);
        assert_eq!(Envelope::decode(frame).unwrap(), envelope);
    }

    #[test]
    fn test_empty_data_envelope() {
        let envelope = Envelope::data(Bytes::new());
        let frame = envelope.encode().unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE);
        assert_eq!(Envelope::decode(frame).unwrap(), envelope);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x50, 1, 0x10])),
            Err(WireError::TooShort(3, FRAME_HEADER_SIZE))
        );
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x51, 1, 0x10, 0, 0, 0, 0, 0])),
            Err(WireError::InvalidMagic(0x51, FRAME_MAGIC))
        );
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x50, 2, 0x10, 0, 0, 0, 0, 0])),
            Err(WireError::UnsupportedVersion(2, FRAME_VERSION))
        );
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x50, 1, 0x02, 0, 0, 0, 0, 0])),
            Err(WireError::UnknownFrameType(0x02))
        );
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x50, 1, 0x10, 0, 0, 0, 0, 4, 1])),
            Err(WireError::LengthMismatch {
                declared: 4,
                actual: 1
            })
        );
        assert_eq!(
            Envelope::decode(Bytes::from_static(&[0x50, 1, 0x10, 0, 0xff, 0xff, 0xff, 0xff])),
            Err(WireError::LengthMismatch {
                declared: u32::MAX as usize,
                actual: 0
            })
        );
    }

    #[test]
    fn test_large_payload_roundtrip() {
        let payload = vec![0x5a; (1 << 20) + 32];
        let envelope = Envelope::data(payload.clone());
        let frame = envelope.encode().unwrap();

        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.payload_len as usize, payload.len());
        assert_eq!(Envelope::decode(frame).unwrap().payload(), &payload[..]);
    }
}
