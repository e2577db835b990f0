//! gossip-core: heartbeat gossip membership with failure detection.
//!
//! This crate provides:
//! - A membership table reconciled by last-writer-wins heartbeat merge
//! - Timeout-based failure detection (suspect, then evict)
//! - Random-fanout gossip of full table snapshots
//! - A bounds-checked wire codec
//! - The per-node protocol state machine, over pluggable transport and clock
//! - An in-memory emulated network for tests and simulation

pub mod clock;
pub mod config;
pub mod events;
pub mod membership;
pub mod node;
pub mod peer_id;
pub mod protocol;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MembershipConfig};
pub use events::{EventBus, MembershipEvent, Subscription};
pub use membership::{MembershipEntry, MembershipTable};
pub use node::{Node, NodeError, NodeState};
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{DecodeError, EncodeError, Message, MessageKind};
pub use transport::{EmulatedNetwork, NetworkStats, Transport, TransportError};
