//! Node configuration shared by the relay, peers and the CLI.
//!
//! Values come from defaults, then `PARLEY_*` environment variables, then
//! command-line flags (applied by the binaries).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::parse_bool;

/// RSA modulus size used when nothing else is configured.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Smallest modulus accepted. OAEP-SHA256 needs 66 bytes of overhead on top
/// of the 16-byte session key, and anything under 1024 bits is not worth having.
pub const MIN_KEY_BITS: usize = 1024;

/// Default upper bound on a single handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

pub const ENV_KEY_BITS: &str = "PARLEY_KEY_BITS";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "PARLEY_HANDSHAKE_TIMEOUT_MS";
pub const ENV_RECORD_TRAFFIC: &str = "PARLEY_RECORD_TRAFFIC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// RSA modulus size for generated peer key pairs.
    pub key_bits: usize,
    /// Handshake deadline in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Whether the relay keeps a log of readable payloads.
    pub record_traffic: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            record_traffic: true,
        }
    }
}

impl NodeConfig {
    /// Build a config from defaults overridden by `PARLEY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config using an arbitrary variable lookup.
    ///
    /// Booleans follow [`parse_bool`]; unrecognised spellings read as false.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_KEY_BITS) {
            config.key_bits = raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{ENV_KEY_BITS}={raw:?}: {e}")))?;
        }

        if let Some(raw) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
            config.handshake_timeout_ms = raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{ENV_HANDSHAKE_TIMEOUT_MS}={raw:?}: {e}")))?;
        }

        if let Some(raw) = lookup(ENV_RECORD_TRAFFIC) {
            config.record_traffic = parse_bool(&raw);
        }

        Ok(config)
    }

    /// Reject values that would make the protocol unusable.
    pub fn validate(&self) -> Result<()> {
        if self.key_bits < MIN_KEY_BITS {
            return Err(Error::config(format!(
                "key_bits must be at least {MIN_KEY_BITS}, got {}",
                self.key_bits
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Error::config("handshake_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
