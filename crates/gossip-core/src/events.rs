//! Membership events and the bus that delivers them.
//!
//! Nodes publish a `MembershipEvent` for every observable change of their
//! view. Events are plain values; nothing is buffered globally. Hold the
//! bus in an `Arc` and share it across nodes to collect a cluster-wide log.

use crate::PeerId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Observable membership change, as seen by `local`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MembershipEvent {
    /// A peer entered the local table.
    MemberAdded {
        /// Node whose table changed
        local: PeerId,
        /// Peer that was added
        peer: PeerId,
        /// Local clock reading
        at: u64,
    },
    /// A peer was evicted from the local table.
    MemberRemoved {
        local: PeerId,
        peer: PeerId,
        at: u64,
    },
    /// A peer went silent and is now suspected.
    MemberSuspected {
        local: PeerId,
        peer: PeerId,
        at: u64,
    },
    /// The local node became active.
    Joined {
        local: PeerId,
        /// Introducer that admitted us (ourselves when bootstrapping)
        via: PeerId,
        at: u64,
    },
}

impl MembershipEvent {
    /// Node that emitted the event.
    pub fn local(&self) -> PeerId {
        match self {
            Self::MemberAdded { local, .. }
            | Self::MemberRemoved { local, .. }
            | Self::MemberSuspected { local, .. }
            | Self::Joined { local, .. } => *local,
        }
    }

    /// Emitter's clock reading.
    pub fn at(&self) -> u64 {
        match self {
            Self::MemberAdded { at, .. }
            | Self::MemberRemoved { at, .. }
            | Self::MemberSuspected { at, .. }
            | Self::Joined { at, .. } => *at,
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&MembershipEvent) + Send + Sync>;

/// Fan-out of membership events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to all current subscribers.
    pub fn emit(&self, event: MembershipEvent) {
        // Snapshot callbacks so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}
