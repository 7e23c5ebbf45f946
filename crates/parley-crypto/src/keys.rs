//! RSA key pairs and OAEP wrapping of session keys.
//!
//! A peer's public key is handed out by the relay. An initiator wraps a fresh
//! [`SessionKey`] under it; only the matching private key can unwrap it.
//!
//! # Example
//!
//! ```no_run
//! use parley_crypto::{generate_key_pair, unwrap, wrap, SessionKey};
//!
//! let keypair = generate_key_pair().unwrap();
//! let session_key = SessionKey::generate();
//!
//! let wrapped = wrap(&session_key, &keypair.public_key()).unwrap();
//! assert_eq!(unwrap(&wrapped, &keypair).unwrap(), session_key);
//! ```

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs1::{EncodeRsaPublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::session_key::SessionKey;

/// Default RSA modulus size.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// OAEP overhead for SHA-256: two digests plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Key generation and wrapping errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generate(String),

    #[error("wrap failed: {0}")]
    Wrap(String),

    #[error("unwrap failed: {0}")]
    Unwrap(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// RSA public key of a peer.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Modulus size in bytes, which is also the wrapped key size.
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Largest secret that fits in one OAEP block under this key.
    pub fn max_wrap_len(&self) -> usize {
        self.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    /// Wrap a session key for the holder of this public key.
    pub fn wrap(&self, session_key: &SessionKey) -> Result<Vec<u8>, KeyError> {
        self.wrap_secret(session_key.as_bytes())
    }

    /// Wrap an arbitrary short secret with RSA-OAEP (SHA-256).
    pub fn wrap_secret(&self, secret: &[u8]) -> Result<Vec<u8>, KeyError> {
        if secret.len() > self.max_wrap_len() {
            return Err(KeyError::Wrap(format!(
                "secret of {} bytes exceeds OAEP limit of {} bytes",
                secret.len(),
                self.max_wrap_len()
            )));
        }

        self.0
            .encrypt(&mut OsRng, oaep(), secret)
            .map_err(|e| KeyError::Wrap(e.to_string()))
    }

    /// Hex SHA-256 of the PKCS#1 DER encoding.
    pub fn fingerprint(&self) -> Result<String, KeyError> {
        let der = self
            .0
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(der.as_bytes())))
    }

    /// PKCS#1 PEM encoding.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.0
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bits)", self.size() * 8)
    }
}

/// RSA key pair owned by a peer.
///
/// Cloning is allowed so that tests can hand the same pair to two peers.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh 2048-bit key pair using the OS CSPRNG.
    pub fn generate() -> Result<Self, KeyError> {
        Self::generate_with_bits(DEFAULT_KEY_BITS)
    }

    /// Generate a key pair with a specific modulus size.
    pub fn generate_with_bits(bits: usize) -> Result<Self, KeyError> {
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyError::Generate(e.to_string()))?;
        let public = PublicKey(RsaPublicKey::from(&private));
        Ok(Self { private, public })
    }

    /// The shareable half.
    pub fn public_key(&self) -> PublicKey {
        self.public.clone()
    }

    /// Recover a session key wrapped under this pair's public key.
    pub fn unwrap(&self, wrapped: &[u8]) -> Result<SessionKey, KeyError> {
        let secret = self.unwrap_secret(wrapped)?;
        SessionKey::from_slice(&secret)
    }

    /// Recover an arbitrary wrapped secret.
    pub fn unwrap_secret(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        self.private
            .decrypt(oaep(), wrapped)
            .map(Zeroizing::new)
            .map_err(|e| KeyError::Unwrap(e.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh 2048-bit key pair.
pub fn generate_key_pair() -> Result<KeyPair, KeyError> {
    KeyPair::generate()
}

/// Wrap `session_key` under `recipient`'s public key.
pub fn wrap(session_key: &SessionKey, recipient: &PublicKey) -> Result<Vec<u8>, KeyError> {
    recipient.wrap(session_key)
}

/// Unwrap a session key with our own key pair.
pub fn unwrap(wrapped: &[u8], own: &KeyPair) -> Result<SessionKey, KeyError> {
    own.unwrap(wrapped)
}
