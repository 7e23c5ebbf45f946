//! The relay: address book plus blind frame forwarding.
//!
//! The relay:
//! 1. Keeps a registry of linked peers by address
//! 2. Hands out peers' public keys on request
//! 3. Routes framed envelopes between peers without holding any session key
//!
//! Public keys handed out here are trusted as-is. The relay is assumed to be
//! honest-but-curious; it could substitute keys and nothing here would notice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parley_common::NodeConfig;
use parley_crypto::PublicKey;
use parley_wire::{Envelope, FrameHeader, FrameType, FRAME_HEADER_SIZE};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{ProtocolError, Result};
use crate::peer::Peer;

/// Snapshot of relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub handshakes_routed: u64,
    pub data_forwarded: u64,
    pub bytes_forwarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handshakes_routed: AtomicU64,
    data_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
}

/// One lock per unordered pair of addresses.
type GateMap = HashMap<(Address, Address), Arc<Mutex<()>>>;

fn gate_key(a: &Address, b: &Address) -> (Address, Address) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

pub struct Relay {
    peers: RwLock<HashMap<Address, Arc<Peer>>>,
    traffic: RwLock<Vec<String>>,
    gates: Mutex<GateMap>,
    counters: Counters,
    record_traffic: bool,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            traffic: RwLock::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            record_traffic: true,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            record_traffic: config.record_traffic,
            ..Self::new()
        }
    }

    /// Register `peer` under its own address, replacing any previous entry.
    pub async fn link(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        let address = peer.address().clone();
        let previous = self.peers.write().await.insert(address.clone(), peer);
        if previous.is_some() {
            info!("Re-linked peer {}", address);
        } else {
            info!("Linked peer {}", address);
        }
        previous
    }

    pub async fn resolve(&self, address: &Address) -> Result<Arc<Peer>> {
        self.peers
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownAddress(address.clone()))
    }

    /// Public half of the key pair registered under `address`.
    pub async fn public_key(&self, address: &Address) -> Result<PublicKey> {
        Ok(self.resolve(address).await?.public_key())
    }

    /// Deliver application ciphertext from `source` to `target`.
    pub async fn forward(
        &self,
        source: &Address,
        target: &Address,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = Envelope::data(payload).encode()?;
        self.route(source, target, frame).await
    }

    /// Route a complete frame. Only the header is parsed here.
    pub async fn route(&self, source: &Address, target: &Address, frame: Bytes) -> Result<()> {
        let header = FrameHeader::decode(&frame)?;

        if header.frame_type == FrameType::Data && self.record_traffic {
            self.observe(source, target, &frame[FRAME_HEADER_SIZE..]).await;
        }

        let peer = self.resolve(target).await?;
        let payload_len = frame.len() - FRAME_HEADER_SIZE;
        peer.deliver(frame, source).await?;

        match header.frame_type {
            FrameType::HandshakeInit => {
                self.counters.handshakes_routed.fetch_add(1, Ordering::Relaxed);
                debug!("Routed handshake {} -> {}", source, target);
            }
            FrameType::Data => {
                self.counters.data_forwarded.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_forwarded
                    .fetch_add(payload_len as u64, Ordering::Relaxed);
                debug!("Forwarded {} bytes {} -> {}", payload_len, source, target);
            }
        }

        Ok(())
    }

    /// Record readable payloads. Encrypted traffic normally is not readable.
    async fn observe(&self, source: &Address, target: &Address, payload: &[u8]) {
        match std::str::from_utf8(payload) {
            Ok(text) => self.traffic.write().await.push(text.to_string()),
            Err(_) => debug!("Can't read payload {} -> {}", source, target),
        }
    }

    /// Serialize handshakes between `a` and `b`, in either direction.
    ///
    /// Callers should hand the guard back through [`Relay::release_gate`] so
    /// the per-pair entry does not outlive the handshake.
    pub async fn handshake_gate(&self, a: &Address, b: &Address) -> OwnedMutexGuard<()> {
        let gate = self
            .gates
            .lock()
            .await
            .entry(gate_key(a, b))
            .or_default()
            .clone();
        gate.lock_owned().await
    }

    /// Unlock the pair's gate and drop its entry if nobody else holds or
    /// waits on it.
    pub async fn release_gate(&self, a: &Address, b: &Address, guard: OwnedMutexGuard<()>) {
        drop(guard);

        let key = gate_key(a, b);
        let mut gates = self.gates.lock().await;
        // Holders and waiters each keep a clone; only the map's copy is left when idle.
        if gates.get(&key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(&key);
        }
    }

    /// Number of address pairs with a live handshake gate.
    pub async fn gate_count(&self) -> usize {
        self.gates.lock().await.len()
    }

    pub async fn traffic_log(&self) -> Vec<String> {
        self.traffic.read().await.clone()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            handshakes_routed: self.counters.handshakes_routed.load(Ordering::Relaxed),
            data_forwarded: self.counters.data_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.counters.bytes_forwarded.load(Ordering::Relaxed),
        }
    }

    pub async fn contains(&self, address: &Address) -> bool {
        self.peers.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::shared_keypair;

    fn peer(address: &str) -> Arc<Peer> {
        Arc::new(Peer::with_key_pair(address, shared_keypair().clone()))
    }

    #[tokio::test]
    async fn test_link_and_resolve() {
        let relay = Relay::new();
        assert!(relay.is_empty().await);

        let a = peer("1.1.1.1");
        assert!(relay.link(a.clone()).await.is_none());

        let resolved = relay.resolve(&"1.1.1.1".into()).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &a));
        assert!(relay.contains(&"1.1.1.1".into()).await);
        assert_eq!(relay.len().await, 1);
    }

    #[tokio::test]
    async fn test_relink_replaces() {
        let relay = Relay::new();
        let first = peer("1.1.1.1");
        let second = peer("1.1.1.1");

        relay.link(first.clone()).await;
        let previous = relay.link(second.clone()).await.unwrap();

        assert!(Arc::ptr_eq(&previous, &first));
        let resolved = relay.resolve(&"1.1.1.1".into()).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        assert_eq!(relay.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let relay = Relay::new();
        let missing: Address = "9.9.9.9".into();

        assert!(matches!(
            relay.resolve(&missing).await,
            Err(ProtocolError::UnknownAddress(a)) if a == missing
        ));
        assert!(matches!(
            relay.public_key(&missing).await,
            Err(ProtocolError::UnknownAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_public_key_is_peers() {
        let relay = Relay::new();
        let a = peer("1.1.1.1");
        relay.link(a.clone()).await;

        assert_eq!(
            relay.public_key(&"1.1.1.1".into()).await.unwrap(),
            a.public_key()
        );
    }

    #[tokio::test]
    async fn test_forward_logs_readable_payload_before_delivery() {
        let relay = Relay::new();
        relay.link(peer("2.2.2.2")).await;

        // No session exists, so delivery fails, but the relay still saw the text.
        let result = relay
            .forward(&"1.1.1.1".into(), &"2.2.2.2".into(), "plain hello")
            .await;
        assert!(matches!(result, Err(ProtocolError::MissingSession(_))));
        assert_eq!(relay.traffic_log().await, vec!["plain hello".to_string()]);
        assert_eq!(relay.stats(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_forward_skips_binary_payload() {
        let relay = Relay::new();

        let result = relay
            .forward(&"1.1.1.1".into(), &"9.9.9.9".into(), vec![0xff, 0xfe, 0x00])
            .await;
        assert!(matches!(result, Err(ProtocolError::UnknownAddress(_))));
        assert!(relay.traffic_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_traffic_log_can_be_disabled() {
        let config = NodeConfig {
            record_traffic: false,
            ..NodeConfig::default()
        };
        let relay = Relay::from_config(&config);

        let _ = relay
            .forward(&"1.1.1.1".into(), &"9.9.9.9".into(), "plain hello")
            .await;
        assert!(relay.traffic_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_rejects_garbage_frame() {
        let relay = Relay::new();
        relay.link(peer("2.2.2.2")).await;

        let result = relay
            .route(
                &"1.1.1.1".into(),
                &"2.2.2.2".into(),
                Bytes::from_static(b"not a frame"),
            )
            .await;
        assert!(matches!(result, Err(ProtocolError::Wire(_))));
    }

    #[tokio::test]
    async fn test_handshake_gate_is_direction_independent() {
        let relay = Relay::new();
        let a: Address = "1.1.1.1".into();
        let b: Address = "2.2.2.2".into();

        let _held = relay.handshake_gate(&a, &b).await;

        let reverse = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            relay.handshake_gate(&b, &a),
        )
        .await;
        assert!(reverse.is_err(), "reverse direction must share the gate");

        // Unrelated pairs are not blocked.
        let c: Address = "3.3.3.3".into();
        let _other = relay.handshake_gate(&a, &c).await;
    }

    #[tokio::test]
    async fn test_release_gate_prunes_idle_entry() {
        let relay = Relay::new();
        let a: Address = "1.1.1.1".into();
        let b: Address = "2.2.2.2".into();

        let guard = relay.handshake_gate(&a, &b).await;
        assert_eq!(relay.gate_count().await, 1);

        relay.release_gate(&b, &a, guard).await;
        assert_eq!(relay.gate_count().await, 0);
    }

    #[tokio::test]
    async fn test_release_gate_keeps_contended_entry() {
        let relay = Arc::new(Relay::new());
        let a: Address = "1.1.1.1".into();
        let b: Address = "2.2.2.2".into();

        let guard = relay.handshake_gate(&a, &b).await;

        let waiter = {
            let relay = relay.clone();
            let (a, b) = (a.clone(), b.clone());
            tokio::spawn(async move {
                let guard = relay.handshake_gate(&b, &a).await;
                relay.release_gate(&b, &a, guard).await;
            })
        };
        // Let the waiter queue up on the gate.
        while relay.gates.lock().await.get(&gate_key(&a, &b)).map(Arc::strong_count) != Some(3) {
            tokio::task::yield_now().await;
        }

        relay.release_gate(&a, &b, guard).await;
        assert_eq!(relay.gate_count().await, 1, "waiter still needs the gate");

        waiter.await.unwrap();
        assert_eq!(relay.gate_count().await, 0);
    }
}
