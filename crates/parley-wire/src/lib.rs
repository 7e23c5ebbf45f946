//! Parley wire envelope.
//!
//! Everything a peer hands to the relay is a framed [`Envelope`]: either the
//! first leg of a handshake (a wrapped session key) or application data
//! encrypted under an established session key. The relay reads the header to
//! route and observe traffic but cannot read either payload.

#![forbid(unsafe_code)]

pub mod envelope;

pub use envelope::{
    Envelope, FrameHeader, FrameType, WireError, FRAME_HEADER_SIZE, FRAME_MAGIC,
    FRAME_MAX_PAYLOAD_SIZE, FRAME_VERSION,
};
