//! Gossip target selection.
//!
//! Each tick a node pings a bounded random subset of the peers it knows,
//! carrying a full copy of its table. Selection is uniform and stateless:
//! the same peer may be picked on consecutive ticks.

use super::MembershipTable;
use crate::PeerId;
use rand::Rng;
use rand::seq::SliceRandom;

/// Default number of peers pinged per tick.
pub const DEFAULT_GOSSIP_FANOUT: usize = 3;

/// Picks the peers to gossip to on each tick.
#[derive(Debug, Clone)]
pub struct GossipDisseminator {
    fanout: usize,
}

impl Default for GossipDisseminator {
    fn default() -> Self {
        Self::new(DEFAULT_GOSSIP_FANOUT)
    }
}

impl GossipDisseminator {
    pub fn new(fanout: usize) -> Self {
        Self { fanout }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Pick up to `fanout` distinct peers uniformly at random.
    ///
    /// Candidates are every non-self entry, suspected peers included.
    /// Returns all of them when fewer than `fanout` are known.
    pub fn select_targets<R: Rng + ?Sized>(
        &self,
        table: &MembershipTable,
        rng: &mut R,
    ) -> Vec<PeerId> {
        let mut candidates: Vec<PeerId> = table.peers().map(|e| e.peer).collect();

        let (chosen, _) = candidates.partial_shuffle(rng, self.fanout);
        chosen.to_vec()
    }
}
