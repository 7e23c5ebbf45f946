//! Peers: key pair, session key table and message log.
//!
//! Each counterpart address moves through three states:
//! - NO SESSION: nothing stored for the address
//! - PENDING: we generated a key and our `HandshakeInit` is still being
//!   routed; the key may decrypt an early reply but is never sent under
//! - ESTABLISHED: the key is reused for every later message in either
//!   direction and never rotated
//!
//! The initiator moves PENDING -> ESTABLISHED once the relay has delivered
//! its `HandshakeInit`. The responder goes straight to ESTABLISHED when it
//! accepts one.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parley_common::NodeConfig;
use parley_crypto::{codec, KeyPair, PublicKey, SessionKey};
use parley_wire::Envelope;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::error::{ProtocolError, Result};
use crate::relay::Relay;

/// Session table entry.
enum Session {
    Pending(SessionKey),
    Established(SessionKey),
}

impl Session {
    fn key(&self) -> &SessionKey {
        match self {
            Self::Pending(key) | Self::Established(key) => key,
        }
    }

    fn established(&self) -> Option<&SessionKey> {
        match self {
            Self::Established(key) => Some(key),
            Self::Pending(_) => None,
        }
    }

    fn is_pending(&self, key: &SessionKey) -> bool {
        matches!(self, Self::Pending(pending) if pending == key)
    }
}

pub struct Peer {
    address: Address,
    key_pair: KeyPair,
    sessions: RwLock<HashMap<Address, Session>>,
    messages: RwLock<Vec<String>>,
    handshake_timeout: Duration,
}

impl Peer {
    /// Create a peer with a freshly generated 2048-bit key pair.
    pub fn new(address: impl Into<Address>) -> Result<Self> {
        Ok(Self::with_key_pair(address, KeyPair::generate()?))
    }

    /// Create a peer around an existing key pair.
    ///
    /// Two peers may be given the same pair. That is only meant for tests.
    pub fn with_key_pair(address: impl Into<Address>, key_pair: KeyPair) -> Self {
        Self {
            address: address.into(),
            key_pair,
            sessions: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            handshake_timeout: NodeConfig::default().handshake_timeout(),
        }
    }

    /// Create a peer using the configured key size and handshake timeout.
    pub fn from_config(address: impl Into<Address>, config: &NodeConfig) -> Result<Self> {
        let key_pair = KeyPair::generate_with_bits(config.key_bits)?;
        Ok(Self::with_key_pair(address, key_pair).with_handshake_timeout(config.handshake_timeout()))
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// The established session key for `counterpart`, if any.
    pub async fn session_key(&self, counterpart: &Address) -> Option<SessionKey> {
        self.sessions
            .read()
            .await
            .get(counterpart)
            .and_then(Session::established)
            .cloned()
    }

    pub async fn has_session(&self, counterpart: &Address) -> bool {
        self.session_key(counterpart).await.is_some()
    }

    /// Messages received so far, oldest first.
    pub async fn message_log(&self) -> Vec<String> {
        self.messages.read().await.clone()
    }

    /// Encrypt `plaintext` for `target` and hand it to the relay,
    /// shaking hands first if no session exists yet.
    pub async fn send(&self, relay: &Relay, target: &Address, plaintext: &str) -> Result<()> {
        self.ensure_session(relay, target).await?;

        let key = self
            .session_key(target)
            .await
            .ok_or_else(|| ProtocolError::MissingSession(target.clone()))?;
        let ciphertext = codec::encrypt(plaintext, Some(&key));

        relay.forward(&self.address, target, ciphertext).await
    }

    /// Make sure a session with `target` exists, running at most one
    /// handshake per address pair at a time.
    ///
    /// The timeout bounds the wait for the pair's handshake slot. Once the
    /// slot is held the handshake runs to completion, so a timeout can never
    /// leave only one side holding the key.
    async fn ensure_session(&self, relay: &Relay, target: &Address) -> Result<()> {
        if self.has_session(target).await {
            return Ok(());
        }

        let gate = tokio::time::timeout(
            self.handshake_timeout,
            relay.handshake_gate(&self.address, target),
        )
        .await
        .map_err(|_| {
            warn!("Handshake {} -> {} timed out", self.address, target);
            ProtocolError::HandshakeTimeout {
                target: target.clone(),
                after: self.handshake_timeout,
            }
        })?;

        // Another sender, or the counterpart, may have shaken hands while we waited.
        let result = if self.has_session(target).await {
            debug!("Session {} <-> {} already established", self.address, target);
            Ok(())
        } else {
            self.initiate_handshake(relay, target, None).await
        };

        relay.release_gate(&self.address, target, gate).await;
        result
    }

    /// Run one side of the handshake with `target`.
    ///
    /// Without `wrapped_key` this peer initiates: it generates a session key,
    /// wraps it under `target`'s public key and routes a `HandshakeInit`
    /// frame through the relay. With `wrapped_key` this peer responds: it
    /// unwraps the key and stores it under `target`, the initiator.
    pub async fn initiate_handshake(
        &self,
        relay: &Relay,
        target: &Address,
        wrapped_key: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(wrapped_key) = wrapped_key {
            return self.accept_handshake(target, wrapped_key).await;
        }

        let session_key = SessionKey::generate();
        let recipient = relay.public_key(target).await?;
        let frame = Envelope::handshake_init(recipient.wrap(&session_key)?).encode()?;

        // Pending while routed: the responder may reply before `route` returns.
        self.sessions
            .write()
            .await
            .insert(target.clone(), Session::Pending(session_key.clone()));

        let routed = relay.route(&self.address, target, frame).await;

        let mut sessions = self.sessions.write().await;
        let still_ours = sessions
            .get(target)
            .is_some_and(|session| session.is_pending(&session_key));
        if let Err(e) = routed {
            if still_ours {
                sessions.remove(target);
            }
            return Err(e);
        }
        if still_ours {
            sessions.insert(target.clone(), Session::Established(session_key));
        }
        drop(sessions);

        info!("Session {} -> {} established", self.address, target);
        Ok(())
    }

    async fn accept_handshake(&self, initiator: &Address, wrapped_key: &[u8]) -> Result<()> {
        let session_key = self.key_pair.unwrap(wrapped_key)?;
        let replaced = self
            .sessions
            .write()
            .await
            .insert(initiator.clone(), Session::Established(session_key))
            .is_some_and(|previous| previous.established().is_some());

        if replaced {
            warn!("Session key for {} replaced by new handshake", initiator);
        } else {
            info!("Session {} <- {} accepted", self.address, initiator);
        }
        Ok(())
    }

    /// Decrypt a data payload from `source` and append it to the message log.
    ///
    /// A pending key is accepted here: it is ours, and the responder may
    /// answer before our handshake call has returned.
    pub async fn receive(&self, ciphertext: &[u8], source: &Address) -> Result<()> {
        let key = self
            .sessions
            .read()
            .await
            .get(source)
            .map(|session| session.key().clone())
            .ok_or_else(|| ProtocolError::MissingSession(source.clone()))?;

        let plaintext = codec::decrypt(ciphertext, Some(&key))?;
        self.messages.write().await.push(plaintext);
        Ok(())
    }

    /// Entry point for frames routed by the relay.
    pub async fn deliver(&self, frame: Bytes, source: &Address) -> Result<()> {
        match Envelope::decode(frame)? {
            Envelope::HandshakeInit { wrapped_key } => {
                self.accept_handshake(source, &wrapped_key).await
            }
            Envelope::Data { payload } => self.receive(&payload, source).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use parley_crypto::KeyPair;

    pub fn shared_keypair() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| KeyPair::generate().unwrap())
    }

    pub fn other_keypair() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| KeyPair::generate().unwrap())
    }
}
