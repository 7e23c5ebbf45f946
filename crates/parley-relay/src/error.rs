//! Protocol errors raised by peers and the relay.

use std::time::Duration;

use parley_crypto::{CodecError, KeyError};
use parley_wire::WireError;
use thiserror::Error;

use crate::address::Address;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The relay has no peer linked under this address.
    #[error("unknown address: {0}")]
    UnknownAddress(Address),

    /// A data frame arrived from an address we never shook hands with.
    #[error("no session key for {0}")]
    MissingSession(Address),

    #[error("handshake with {target} timed out after {after:?}")]
    HandshakeTimeout { target: Address, after: Duration },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
