//! Message codec: PKCS#7 padding and AES-128-CBC.
//!
//! # Wire Format
//!
//! ```text
//! [16 bytes: IV] [AES-128-CBC ciphertext, whole 16-byte blocks]
//! ```
//!
//! Passing no key turns the codec into a plain UTF-8 passthrough. Peers never
//! do this; it exists for bootstrapping and for exercising the relay's
//! traffic log with readable payloads.
//!
//! # Integrity
//!
//! None. Flipping bit `i` of the IV flips bit `i` of the first plaintext
//! block and the result still decrypts cleanly. Callers that need tamper
//! detection must add it themselves.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::session_key::SessionKey;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size, also the IV size.
pub const BLOCK_SIZE: usize = 16;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is not valid UTF-8: {0}")]
    Decode(String),

    #[error("malformed ciphertext: {0}")]
    Format(String),

    #[error("invalid padding: {0}")]
    Padding(String),
}

/// Append PKCS#7 padding. Always adds between 1 and 16 bytes.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Strip PKCS#7 padding, rejecting anything non-canonical.
pub fn unpad(data: &[u8]) -> Result<&[u8], CodecError> {
    let last = *data
        .last()
        .ok_or_else(|| CodecError::Padding("empty plaintext".into()))?;
    let pad_len = last as usize;

    if pad_len == 0 || pad_len > BLOCK_SIZE {
        return Err(CodecError::Padding(format!("pad byte {pad_len} out of range")));
    }
    if pad_len > data.len() {
        return Err(CodecError::Padding(format!(
            "pad length {pad_len} exceeds plaintext length {}",
            data.len()
        )));
    }

    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b != last) {
        return Err(CodecError::Padding("inconsistent pad bytes".into()));
    }

    Ok(body)
}

/// Encrypt `plaintext` under `key`, or pass it through as UTF-8 if `key` is `None`.
///
/// Returns `IV || ciphertext`. A fresh IV is drawn for every call, so the
/// same plaintext never encrypts to the same bytes twice.
pub fn encrypt(plaintext: &str, key: Option<&SessionKey>) -> Vec<u8> {
    let Some(key) = key else {
        return plaintext.as_bytes().to_vec();
    };

    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let padded = pad(plaintext.as_bytes());
    let ciphertext = Aes128CbcEnc::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(&iv),
    )
    .encrypt_padded_vec_mut::<NoPadding>(&padded);

    let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt `IV || ciphertext` produced by [`encrypt`].
///
/// With `key == None` the bytes are only UTF-8 decoded.
pub fn decrypt(data: &[u8], key: Option<&SessionKey>) -> Result<String, CodecError> {
    let Some(key) = key else {
        return utf8(data.to_vec());
    };

    if data.len() < BLOCK_SIZE {
        return Err(CodecError::Format(format!(
            "{} bytes is shorter than the {BLOCK_SIZE}-byte IV",
            data.len()
        )));
    }

    let (iv, body) = data.split_at(BLOCK_SIZE);
    if body.is_empty() || body.len() % BLOCK_SIZE != 0 {
        return Err(CodecError::Format(format!(
            "ciphertext body of {} bytes is not a positive multiple of {BLOCK_SIZE}",
            body.len()
        )));
    }

    let padded = Aes128CbcDec::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .decrypt_padded_vec_mut::<NoPadding>(body)
    .map_err(|e| CodecError::Format(e.to_string()))?;

    let plaintext = unpad(&padded)?;
    utf8(plaintext.to_vec())
}

fn utf8(bytes: Vec<u8>) -> Result<String, CodecError> {
    String::from_utf8(bytes).map_err(|e| CodecError::Decode(e.utf8_error().to_string()))
}
