//! Heartbeat gossip membership.
//!
//! Every node keeps a table of the peers it knows about together with the
//! highest heartbeat seen for each. Once per tick a node:
//! 1. Increments its own heartbeat
//! 2. Suspects peers whose heartbeat stopped increasing, evicts long-silent ones
//! 3. Sends its whole table to a few random peers
//!
//! Receivers fold the table into their own, keeping the higher heartbeat per
//! peer. Suspicion travels as a sentinel heartbeat and is never undone by
//! gossip, only by eviction or a direct join request.

pub mod failure;
pub mod gossip;
pub mod table;

pub use failure::{FailureDetector, FailureEvent};
pub use gossip::{DEFAULT_GOSSIP_FANOUT, GossipDisseminator};
pub use table::{FAILURE_SENTINEL, MembershipEntry, MembershipTable, is_failure_marker};
