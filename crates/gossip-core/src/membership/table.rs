//! Membership table: the authoritative local view of the group.
//!
//! The table tracks, per known peer:
//! - The highest heartbeat we have seen for it
//! - When (local clock) that heartbeat last increased
//! - Whether we currently suspect it of having failed
//!
//! Heartbeats are reconciled last-writer-wins: a received heartbeat is only
//! accepted when it is strictly greater than the stored one.

use crate::PeerId;
use serde::Serialize;

/// Heartbeat value marking a peer as failed.
///
/// Written by the failure detector when it suspects a peer, so that the
/// suspicion itself travels with gossip.
pub const FAILURE_SENTINEL: i64 = -1;

/// Check whether a heartbeat carries the failure marker.
///
/// Live nodes only ever emit non-negative heartbeats, so every negative
/// value is treated as the marker.
pub fn is_failure_marker(heartbeat: i64) -> bool {
    heartbeat < 0
}

/// A single row of the membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEntry {
    /// Which peer this row describes
    pub peer: PeerId,
    /// Highest heartbeat seen (or the failure sentinel once suspected)
    pub heartbeat: i64,
    /// Local time at which the heartbeat last increased
    pub last_updated: u64,
    /// Locally believed to have failed
    pub suspect: bool,
}

impl MembershipEntry {
    /// Create a live entry.
    pub fn new(peer: PeerId, heartbeat: i64, last_updated: u64) -> Self {
        Self {
            peer,
            heartbeat,
            last_updated,
            suspect: false,
        }
    }

    /// Time elapsed since the entry was last refreshed.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_updated)
    }
}

/// Ordered membership table with an explicit local identity.
///
/// Entries keep insertion order. At most one entry exists per peer. The
/// local node's entry is inserted during join and is never evicted,
/// suspected or overwritten by merge.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    /// Our own peer ID
    local_peer_id: PeerId,
    /// All entries, ourselves included once joined
    entries: Vec<MembershipEntry>,
}

impl MembershipTable {
    /// Create an empty table for the given local node.
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            entries: Vec::new(),
        }
    }

    /// Get our local peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Drop every entry, ourselves included.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Insert (or reset) our own entry.
    pub fn insert_self(&mut self, heartbeat: i64, now: u64) {
        let local = self.local_peer_id;
        match self.position(&local) {
            Some(i) => self.entries[i] = MembershipEntry::new(local, heartbeat, now),
            None => self.entries.push(MembershipEntry::new(local, heartbeat, now)),
        }
    }

    /// Record a new local heartbeat on our own entry.
    ///
    /// Returns false if we have not joined yet (no self-entry).
    pub fn refresh_self(&mut self, heartbeat: i64, now: u64) -> bool {
        let local = self.local_peer_id;
        match self.get_mut(&local) {
            Some(entry) => {
                entry.heartbeat = heartbeat;
                entry.last_updated = now;
                true
            }
            None => false,
        }
    }

    /// Get our own entry, if we have joined.
    pub fn self_entry(&self) -> Option<&MembershipEntry> {
        self.get(&self.local_peer_id)
    }

    /// Check if a peer is this node.
    pub fn is_self(&self, peer_id: &PeerId) -> bool {
        *peer_id == self.local_peer_id
    }

    fn position(&self, peer_id: &PeerId) -> Option<usize> {
        self.entries.iter().position(|e| e.peer == *peer_id)
    }

    /// Get an entry by peer ID.
    pub fn get(&self, peer_id: &PeerId) -> Option<&MembershipEntry> {
        self.entries.iter().find(|e| e.peer == *peer_id)
    }

    fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut MembershipEntry> {
        self.entries.iter_mut().find(|e| e.peer == *peer_id)
    }

    /// Check if a peer is in the table.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.position(peer_id).is_some()
    }

    /// All entries in table order, ourselves included.
    pub fn entries(&self) -> impl Iterator<Item = &MembershipEntry> {
        self.entries.iter()
    }

    /// All entries except our own.
    pub fn peers(&self) -> impl Iterator<Item = &MembershipEntry> {
        let local = self.local_peer_id;
        self.entries.iter().filter(move |e| e.peer != local)
    }

    /// Peers not currently suspected.
    pub fn live_peers(&self) -> impl Iterator<Item = &MembershipEntry> {
        self.peers().filter(|e| !e.suspect)
    }

    /// Number of entries, ourselves included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy the current table for sending.
    ///
    /// The returned entries are detached values; later mutation of the
    /// table never affects them.
    pub fn snapshot(&self) -> Vec<MembershipEntry> {
        self.entries.clone()
    }

    /// Insert or refresh a peer that contacted us directly (join request).
    ///
    /// A new peer starts at heartbeat 0. An existing entry is refreshed and
    /// cleared of suspicion; its heartbeat is kept unless it holds the
    /// failure sentinel, which is raised back to 0.
    ///
    /// Returns true if the peer was not known before.
    pub fn refresh_direct(&mut self, peer_id: PeerId, now: u64) -> bool {
        if self.is_self(&peer_id) {
            return false;
        }

        if let Some(existing) = self.get_mut(&peer_id) {
            existing.heartbeat = existing.heartbeat.max(0);
            existing.last_updated = now;
            existing.suspect = false;
            return false;
        }

        self.entries.push(MembershipEntry::new(peer_id, 0, now));
        true
    }

    /// Fold received entries into the table.
    ///
    /// Per received entry:
    /// - Our own entry is never touched
    /// - A known, suspected peer is left alone (no resurrection via gossip)
    /// - A known peer is updated only by a strictly higher heartbeat
    /// - An unknown peer is inserted, unless it already carries the failure
    ///   marker
    ///
    /// Returns the peers that were newly inserted.
    pub fn merge(&mut self, received: &[MembershipEntry], now: u64) -> Vec<PeerId> {
        let mut added = Vec::new();

        for r in received {
            if self.is_self(&r.peer) {
                continue;
            }

            if let Some(local) = self.get_mut(&r.peer) {
                if local.suspect {
                    continue;
                }
                if r.heartbeat > local.heartbeat {
                    local.heartbeat = r.heartbeat;
                    local.last_updated = now;
                }
                continue;
            }

            if is_failure_marker(r.heartbeat) {
                continue;
            }

            self.entries
                .push(MembershipEntry::new(r.peer, r.heartbeat, now));
            added.push(r.peer);
        }

        added
    }

    /// Mark a peer as suspected and stamp it with the failure sentinel.
    ///
    /// Returns true if state changed.
    pub fn mark_suspect(&mut self, peer_id: PeerId) -> bool {
        if self.is_self(&peer_id) {
            return false;
        }

        if let Some(entry) = self.get_mut(&peer_id)
            && !entry.suspect
        {
            entry.suspect = true;
            entry.heartbeat = FAILURE_SENTINEL;
            return true;
        }
        false
    }

    /// Remove a peer from the table.
    ///
    /// Returns the removed entry if it existed. Our own entry cannot be
    /// removed.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<MembershipEntry> {
        if self.is_self(&peer_id) {
            return None;
        }
        let i = self.position(&peer_id)?;
        Some(self.entries.remove(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_id() -> PeerId {
        PeerId::new(1, 0)
    }

    fn peer_a() -> PeerId {
        PeerId::new(2, 0)
    }

    fn peer_b() -> PeerId {
        PeerId::new(3, 0)
    }

    fn peer_c() -> PeerId {
        PeerId::new(4, 0)
    }

    fn entry(peer: PeerId, heartbeat: i64) -> MembershipEntry {
        MembershipEntry::new(peer, heartbeat, 0)
    }

    fn joined_table() -> MembershipTable {
        let mut table = MembershipTable::new(local_id());
        table.insert_self(0, 0);
        table
    }

    // ==================== Basic table operations ====================

    #[test]
    fn test_new_table_is_empty() {
        let table = MembershipTable::new(local_id());

        assert_eq!(table.local_peer_id(), local_id());
        assert!(table.is_empty());
        assert!(table.self_entry().is_none());
    }

    #[test]
    fn test_insert_self() {
        let mut table = MembershipTable::new(local_id());
        table.insert_self(0, 10);

        let me = table.self_entry().unwrap();
        assert_eq!(me.heartbeat, 0);
        assert_eq!(me.last_updated, 10);
        assert!(!me.suspect);
        assert_eq!(table.len(), 1);
        assert_eq!(table.peers().count(), 0);
    }

    #[test]
    fn test_insert_self_twice_keeps_one_entry() {
        let mut table = MembershipTable::new(local_id());
        table.insert_self(3, 1);
        table.insert_self(4, 2);

        assert_eq!(table.len(), 1);
        assert_eq!(table.self_entry().unwrap().heartbeat, 4);
    }

    #[test]
    fn test_refresh_self() {
        let mut table = MembershipTable::new(local_id());
        assert!(!table.refresh_self(1, 1));

        table.insert_self(0, 0);
        assert!(table.refresh_self(1, 5));

        let me = table.self_entry().unwrap();
        assert_eq!(me.heartbeat, 1);
        assert_eq!(me.last_updated, 5);
    }

    #[test]
    fn test_clear() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 1)], 0);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_member() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 1), entry(peer_b(), 1)], 0);

        let removed = table.remove(peer_a());
        assert!(removed.is_some());
        assert!(!table.contains(&peer_a()));
        assert!(table.contains(&peer_b()));
    }

    #[test]
    fn test_remove_nonexistent() {
        let mut table = joined_table();
        assert!(table.remove(peer_a()).is_none());
    }

    #[test]
    fn test_remove_self_ignored() {
        let mut table = joined_table();
        assert!(table.remove(local_id()).is_none());
        assert!(table.self_entry().is_some());
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut table = joined_table();
        table.merge(&[entry(peer_c(), 1), entry(peer_a(), 1)], 0);
        table.refresh_direct(peer_b(), 0);

        let order: Vec<_> = table.entries().map(|e| e.peer).collect();
        assert_eq!(order, vec![local_id(), peer_c(), peer_a(), peer_b()]);
    }

    // ==================== Merge ====================

    #[test]
    fn test_merge_inserts_unknown_peer() {
        let mut table = joined_table();

        let added = table.merge(&[MembershipEntry::new(peer_a(), 7, 999)], 42);

        assert_eq!(added, vec![peer_a()]);
        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 7);
        // Wire timestamp is ignored, we stamp our own clock
        assert_eq!(e.last_updated, 42);
        assert!(!e.suspect);
    }

    #[test]
    fn test_merge_higher_heartbeat_updates() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 1)], 10);

        let added = table.merge(&[entry(peer_a(), 5)], 20);

        assert!(added.is_empty());
        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 5);
        assert_eq!(e.last_updated, 20);
    }

    #[test]
    fn test_merge_equal_heartbeat_no_change() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 5)], 10);

        table.merge(&[entry(peer_a(), 5)], 20);

        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 5);
        assert_eq!(e.last_updated, 10);
    }

    #[test]
    fn test_merge_lower_heartbeat_ignored() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 5)], 10);

        table.merge(&[entry(peer_a(), 3)], 20);

        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 5);
        assert_eq!(e.last_updated, 10);
    }

    #[test]
    fn test_merge_never_touches_self() {
        let mut table = joined_table();

        let added = table.merge(&[entry(local_id(), 100)], 5);

        assert!(added.is_empty());
        let me = table.self_entry().unwrap();
        assert_eq!(me.heartbeat, 0);
        assert_eq!(me.last_updated, 0);
    }

    #[test]
    fn test_merge_discards_unknown_sentinel() {
        let mut table = joined_table();

        let added = table.merge(&[entry(peer_a(), FAILURE_SENTINEL)], 5);

        assert!(added.is_empty());
        assert!(!table.contains(&peer_a()));
    }

    #[test]
    fn test_merge_sentinel_for_known_live_peer_no_change() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 4)], 1);

        table.merge(&[entry(peer_a(), FAILURE_SENTINEL)], 2);

        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 4);
        assert!(!e.suspect);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snapshot = vec![entry(peer_a(), 3), entry(peer_b(), 9), entry(peer_c(), -1)];

        let mut once = joined_table();
        once.merge(&snapshot, 7);

        let mut twice = joined_table();
        twice.merge(&snapshot, 7);
        twice.merge(&snapshot, 7);

        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn test_merge_duplicate_in_one_batch_keeps_one_entry() {
        let mut table = joined_table();

        let added = table.merge(&[entry(peer_a(), 1), entry(peer_a(), 2)], 0);

        assert_eq!(added, vec![peer_a()]);
        assert_eq!(table.peers().count(), 1);
        assert_eq!(table.get(&peer_a()).unwrap().heartbeat, 2);
    }

    // ==================== Suspicion ====================

    #[test]
    fn test_mark_suspect_sets_sentinel() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 4)], 0);

        assert!(table.mark_suspect(peer_a()));

        let e = table.get(&peer_a()).unwrap();
        assert!(e.suspect);
        assert_eq!(e.heartbeat, FAILURE_SENTINEL);
    }

    #[test]
    fn test_mark_suspect_already_suspect() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 4)], 0);
        table.mark_suspect(peer_a());

        assert!(!table.mark_suspect(peer_a()));
    }

    #[test]
    fn test_mark_suspect_self_ignored() {
        let mut table = joined_table();
        assert!(!table.mark_suspect(local_id()));
        assert!(!table.self_entry().unwrap().suspect);
    }

    #[test]
    fn test_suspect_not_resurrected_by_gossip() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 4)], 0);
        table.mark_suspect(peer_a());

        // Higher heartbeat arrives via gossip
        table.merge(&[entry(peer_a(), 50)], 10);

        let e = table.get(&peer_a()).unwrap();
        assert!(e.suspect);
        assert_eq!(e.heartbeat, FAILURE_SENTINEL);
        assert_eq!(e.last_updated, 0);
    }

    #[test]
    fn test_evicted_peer_can_be_relearned() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 4)], 0);
        table.mark_suspect(peer_a());
        table.remove(peer_a());

        let added = table.merge(&[entry(peer_a(), 9)], 30);

        assert_eq!(added, vec![peer_a()]);
        assert!(!table.get(&peer_a()).unwrap().suspect);
    }

    // ==================== Direct refresh ====================

    #[test]
    fn test_refresh_direct_inserts_at_zero() {
        let mut table = joined_table();

        assert!(table.refresh_direct(peer_a(), 5));

        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 0);
        assert_eq!(e.last_updated, 5);
    }

    #[test]
    fn test_refresh_direct_keeps_higher_heartbeat() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 8)], 1);

        assert!(!table.refresh_direct(peer_a(), 5));

        let e = table.get(&peer_a()).unwrap();
        assert_eq!(e.heartbeat, 8);
        assert_eq!(e.last_updated, 5);
    }

    #[test]
    fn test_refresh_direct_clears_suspicion() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 8)], 1);
        table.mark_suspect(peer_a());

        table.refresh_direct(peer_a(), 9);

        let e = table.get(&peer_a()).unwrap();
        assert!(!e.suspect);
        assert_eq!(e.heartbeat, 0);
        assert_eq!(e.last_updated, 9);

        // Gossip is accepted again afterwards
        table.merge(&[entry(peer_a(), 12)], 10);
        assert_eq!(table.get(&peer_a()).unwrap().heartbeat, 12);
    }

    #[test]
    fn test_refresh_direct_self_ignored() {
        let mut table = joined_table();
        assert!(!table.refresh_direct(local_id(), 3));
        assert_eq!(table.len(), 1);
    }

    // ==================== Snapshots ====================

    #[test]
    fn test_snapshot_is_detached() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 1)], 0);

        let snapshot = table.snapshot();
        table.mark_suspect(peer_a());
        table.remove(peer_a());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].peer, peer_a());
        assert_eq!(snapshot[1].heartbeat, 1);
        assert!(!snapshot[1].suspect);
    }

    #[test]
    fn test_live_peers_excludes_suspects_and_self() {
        let mut table = joined_table();
        table.merge(&[entry(peer_a(), 1), entry(peer_b(), 1)], 0);
        table.mark_suspect(peer_a());

        let live: Vec<_> = table.live_peers().map(|e| e.peer).collect();
        assert_eq!(live, vec![peer_b()]);
    }

    #[test]
    fn test_entry_age() {
        let e = MembershipEntry::new(peer_a(), 0, 10);
        assert_eq!(e.age(15), 5);
        assert_eq!(e.age(5), 0);
    }
}
