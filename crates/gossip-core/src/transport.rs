//! Transport trait for delivering membership datagrams.
//!
//! The protocol needs only unreliable, unordered, fire-and-forget delivery.
//! Implementations:
//! - `EmulatedNetwork`: in-memory datagram network for tests and simulation

use crate::PeerId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Address already in use: {0}")]
    AddressInUse(PeerId),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Datagram transport between membership nodes.
///
/// Delivery is best-effort: a successful `send` does not mean the payload
/// will ever be received.
pub trait Transport {
    /// Register an inbox for a local address.
    fn bind(&self, address: PeerId) -> Result<()>;

    /// Queue a payload for `to`.
    fn send(&self, from: PeerId, to: PeerId, payload: &[u8]) -> Result<()>;

    /// Drain everything pending for `address`, in arrival order.
    fn receive(&self, address: PeerId) -> Vec<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn bind(&self, address: PeerId) -> Result<()> {
        (**self).bind(address)
    }

    fn send(&self, from: PeerId, to: PeerId, payload: &[u8]) -> Result<()> {
        (**self).send(from, to, payload)
    }

    fn receive(&self, address: PeerId) -> Vec<Vec<u8>> {
        (**self).receive(address)
    }
}

/// Delivery counters of an [`EmulatedNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Send attempts
    pub sent: u64,
    /// Payloads lost to the drop rate, disconnection or unknown addresses
    pub dropped: u64,
    /// Payloads placed in an inbox
    pub delivered: u64,
}

/// In-memory datagram network.
///
/// Every bound address owns a FIFO inbox. Payloads can be dropped at random
/// with a fixed probability, and addresses can be disconnected to emulate a
/// crashed host.
pub struct EmulatedNetwork {
    inboxes: RwLock<HashMap<PeerId, VecDeque<Vec<u8>>>>,
    disconnected: RwLock<HashSet<PeerId>>,
    drop_rate: f64,
    rng: Mutex<StdRng>,
    sent: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl EmulatedNetwork {
    /// Create a lossless network.
    pub fn new() -> Self {
        Self::with_drop_rate(0.0, rand::random())
    }

    /// Create a network that loses each payload with probability `drop_rate`.
    ///
    /// The same seed reproduces the same losses for the same send sequence.
    pub fn with_drop_rate(drop_rate: f64, seed: u64) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            disconnected: RwLock::new(HashSet::new()),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    /// Take an address off the network.
    ///
    /// Its pending payloads are discarded and later sends to it are lost.
    pub fn disconnect(&self, address: PeerId) {
        self.inboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&address);
        self.disconnected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address);
    }

    pub fn is_disconnected(&self, address: PeerId) -> bool {
        self.disconnected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&address)
    }

    /// Number of payloads waiting for `address`.
    pub fn pending(&self, address: PeerId) -> usize {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address)
            .map_or(0, VecDeque::len)
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    fn should_drop(&self) -> bool {
        if self.drop_rate <= 0.0 {
            return false;
        }
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random_bool(self.drop_rate)
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for EmulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for EmulatedNetwork {
    /// Binding a disconnected address reconnects it with an empty inbox.
    fn bind(&self, address: PeerId) -> Result<()> {
        if address.is_null() {
            return Err(TransportError::BindFailed(format!(
                "cannot bind null address {address}"
            )));
        }

        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        if inboxes.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }
        inboxes.insert(address, VecDeque::new());

        self.disconnected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&address);
        Ok(())
    }

    fn send(&self, _from: PeerId, to: PeerId, payload: &[u8]) -> Result<()> {
        self.sent.fetch_add(1, Ordering::Relaxed);

        if self.is_disconnected(to) || self.should_drop() {
            self.count_drop();
            return Ok(());
        }

        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        match inboxes.get_mut(&to) {
            Some(inbox) => {
                inbox.push_back(payload.to_vec());
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                self.count_drop();
                Err(TransportError::PeerNotFound(to))
            }
        }
    }

    fn receive(&self, address: PeerId) -> Vec<Vec<u8>> {
        self.inboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&address)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}
