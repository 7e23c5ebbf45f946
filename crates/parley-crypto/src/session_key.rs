//! Symmetric session keys.

use std::fmt;

use parley_common::helpers::constant_time_eq;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::KeyError;

/// Session key size in bytes (AES-128).
pub const SESSION_KEY_SIZE: usize = 16;

/// A 16-byte symmetric secret shared by two peers.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from an unwrapped secret, which must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; SESSION_KEY_SIZE] = bytes.try_into().map_err(|_| {
            KeyError::Unwrap(format!(
                "session key must be {SESSION_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// First 8 bytes of SHA-256 over the key, hex encoded.
    ///
    /// Lets two peers compare keys in logs without printing them.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0)[..8])
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_slice_length() {
        assert!(SessionKey::from_slice(&[7u8; 16]).is_ok());
        assert!(matches!(
            SessionKey::from_slice(&[7u8; 15]),
            Err(KeyError::Unwrap(_))
        ));
        assert!(SessionKey::from_slice(&[7u8; 32]).is_err());
    }

    #[test]
    fn test_fingerprint() {
        let key = SessionKey::from_bytes([0xab; 16]);
        assert_eq!(key.fingerprint().len(), 16);
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_ne!(key.fingerprint(), SessionKey::generate().fingerprint());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SessionKey::from_bytes([0xab; 16]);
        let printed = format!("{key:?}");
        assert_eq!(printed, "SessionKey(..)");
        assert!(!printed.contains("ab"));
    }
}
