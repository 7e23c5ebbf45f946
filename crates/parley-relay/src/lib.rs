//! Parley peers and relay.
//!
//! A [`Relay`] keeps an address book of linked [`Peer`]s and moves framed
//! envelopes between them. Peers establish a session key on first contact:
//!
//! ```text
//! Initiator                  Relay                    Responder
//!     |  public_key(target)    |                           |
//!     |----------------------->|                           |
//!     |  HandshakeInit{RSA-OAEP(session key)}              |
//!     |----------------------->|-------------------------->|  unwrap, store
//!     |  store session key     |                           |
//!     |  Data{AES-CBC(msg)}    |                           |
//!     |----------------------->|-------------------------->|  decrypt, log
//! ```
//!
//! No reply travels back during the handshake: the initiator already knows
//! the key it generated. The relay sees wrapped keys and ciphertext only.

#![forbid(unsafe_code)]

pub mod address;
pub mod error;
pub mod peer;
pub mod relay;

pub use address::Address;
pub use error::{ProtocolError, Result};
pub use peer::Peer;
pub use relay::{Relay, RelayStats};
