//! Heartbeat-based failure detection.
//!
//! Turns silence into suspicion, then into eviction:
//! 1. A peer whose heartbeat has not increased for more than `t_fail` is
//!    marked suspected and stamped with the failure sentinel, so the
//!    suspicion spreads with the next gossip round
//! 2. A peer silent for `t_remove` or longer is evicted from the table
//!
//! The local node's own entry is never checked.

use super::MembershipTable;
use crate::PeerId;

/// Event emitted by the failure detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureEvent {
    /// Peer stopped refreshing its heartbeat and is now suspected
    PeerSuspected { peer_id: PeerId },
    /// Peer stayed silent past the removal window and was evicted
    PeerRemoved { peer_id: PeerId },
}

/// Failure detector over a membership table.
///
/// Stateless between scans: all timing lives in the table's
/// `last_updated` stamps. The caller is responsible for:
/// - Calling `scan()` once per protocol tick
/// - Acting on emitted events (logging, notifying observers)
#[derive(Debug, Clone)]
pub struct FailureDetector {
    /// Silence after which a peer is suspected (exclusive)
    t_fail: u64,
    /// Silence after which a peer is evicted (inclusive)
    t_remove: u64,
}

impl FailureDetector {
    /// Create a new failure detector.
    pub fn new(t_fail: u64, t_remove: u64) -> Self {
        Self { t_fail, t_remove }
    }

    pub fn t_fail(&self) -> u64 {
        self.t_fail
    }

    pub fn t_remove(&self) -> u64 {
        self.t_remove
    }

    /// Check every peer entry for staleness.
    ///
    /// Returns events for any state transitions, suspicions first.
    pub fn scan(&self, table: &mut MembershipTable, now: u64) -> Vec<FailureEvent> {
        let mut suspect = Vec::new();
        let mut remove = Vec::new();

        for entry in table.peers() {
            let age = entry.age(now);
            if age >= self.t_remove {
                remove.push(entry.peer);
            } else if age > self.t_fail && !entry.suspect {
                suspect.push(entry.peer);
            }
        }

        let mut events = Vec::with_capacity(suspect.len() + remove.len());

        for peer_id in suspect {
            if table.mark_suspect(peer_id) {
                events.push(FailureEvent::PeerSuspected { peer_id });
            }
        }

        for peer_id in remove {
            if table.remove(peer_id).is_some() {
                events.push(FailureEvent::PeerRemoved { peer_id });
            }
        }

        events
    }
}
