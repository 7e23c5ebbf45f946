//! Cryptographic primitives for Parley.
//!
//! This crate provides:
//! - 16-byte symmetric session keys
//! - The message codec: PKCS#7 padding + AES-128-CBC with a random IV
//! - RSA-OAEP (SHA-256) wrapping of session keys for a recipient
//!
//! # Design
//!
//! A session key is generated by the initiating peer, wrapped under the
//! responder's RSA public key and carried through the relay. Both sides then
//! use the same key for every message in either direction.
//!
//! The codec provides confidentiality only. There is no MAC, so ciphertext
//! is malleable and integrity must come from somewhere else.

#![forbid(unsafe_code)]

pub mod codec;
pub mod keys;
pub mod session_key;

pub use codec::{decrypt, encrypt, CodecError};
pub use keys::{generate_key_pair, unwrap, wrap, KeyError, KeyPair, PublicKey};
pub use session_key::{SessionKey, SESSION_KEY_SIZE};
