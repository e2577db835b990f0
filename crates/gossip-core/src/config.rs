//! Protocol configuration.
//!
//! All durations are in clock units (see [`crate::clock`]).

use crate::PeerId;
use crate::membership::DEFAULT_GOSSIP_FANOUT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("t_remove ({t_remove}) must exceed t_fail + gossip_interval ({t_fail} + {gossip_interval})")]
    RemovalWindowTooShort {
        t_fail: u64,
        t_remove: u64,
        gossip_interval: u64,
    },

    #[error("gossip_fanout must be at least 1")]
    ZeroFanout,

    #[error("gossip_interval must be at least 1")]
    ZeroInterval,

    #[error("Introducer must not be the null address")]
    NullIntroducer,
}

/// Tunables for a membership node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MembershipConfig {
    /// Silence after which a peer is suspected
    pub t_fail: u64,
    /// Silence after which a peer is evicted
    pub t_remove: u64,
    /// Peers pinged per tick
    pub gossip_fanout: usize,
    /// Clock units between ticks
    pub gossip_interval: u64,
    /// Well-known peer answering join requests
    pub introducer: PeerId,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            t_fail: 5,
            t_remove: 20,
            gossip_fanout: DEFAULT_GOSSIP_FANOUT,
            gossip_interval: 1,
            introducer: PeerId::new(1, 0),
        }
    }
}

impl MembershipConfig {
    pub fn with_t_fail(mut self, t_fail: u64) -> Self {
        self.t_fail = t_fail;
        self
    }

    pub fn with_t_remove(mut self, t_remove: u64) -> Self {
        self.t_remove = t_remove;
        self
    }

    pub fn with_gossip_fanout(mut self, fanout: usize) -> Self {
        self.gossip_fanout = fanout;
        self
    }

    pub fn with_gossip_interval(mut self, interval: u64) -> Self {
        self.gossip_interval = interval;
        self
    }

    pub fn with_introducer(mut self, introducer: PeerId) -> Self {
        self.introducer = introducer;
        self
    }

    /// Check the timing and fanout constraints.
    ///
    /// The removal window must leave room for at least one gossip round
    /// after suspicion, otherwise the sentinel never spreads before peers
    /// drop the entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gossip_fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        if self.gossip_interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.t_remove <= self.t_fail.saturating_add(self.gossip_interval) {
            return Err(ConfigError::RemovalWindowTooShort {
                t_fail: self.t_fail,
                t_remove: self.t_remove,
                gossip_interval: self.gossip_interval,
            });
        }
        if self.introducer.is_null() {
            return Err(ConfigError::NullIntroducer);
        }
        Ok(())
    }
}
