//! Membership protocol message types.
//!
//! Three messages drive the protocol:
//! - `JoinReq`: a new node asks the introducer to let it in
//! - `JoinRep`: the introducer answers with its full table
//! - `Ping`: periodic gossip carrying the sender's full table

use crate::PeerId;
use crate::membership::MembershipEntry;

/// Discriminant of a protocol message, as written in the first wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinReq,
    JoinRep,
    Ping,
}

impl MessageKind {
    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            Self::JoinReq => 1,
            Self::JoinRep => 2,
            Self::Ping => 3,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::JoinReq),
            2 => Some(Self::JoinRep),
            3 => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinReq => "JOINREQ",
            Self::JoinRep => "JOINREP",
            Self::Ping => "PING",
        }
    }
}

/// A protocol message.
///
/// Every message names its sender and the sender's current heartbeat.
/// `JoinRep` and `Ping` carry a snapshot of the sender's table; the
/// snapshot is an owned copy taken at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request to join the group, sent to the introducer.
    JoinReq {
        /// Node asking to join
        sender: PeerId,
        /// Sender's heartbeat at send time
        heartbeat: i64,
    },

    /// Introducer's answer to a join request.
    JoinRep {
        /// Introducer
        sender: PeerId,
        /// Sender's heartbeat at send time
        heartbeat: i64,
        /// Full membership table of the introducer
        entries: Vec<MembershipEntry>,
    },

    /// Periodic gossip.
    Ping {
        /// Gossiping node
        sender: PeerId,
        /// Sender's heartbeat at send time
        heartbeat: i64,
        /// Full membership table of the sender
        entries: Vec<MembershipEntry>,
    },
}

impl Message {
    /// Create a join request.
    pub fn join_req(sender: PeerId, heartbeat: i64) -> Self {
        Self::JoinReq { sender, heartbeat }
    }

    /// Create a join reply carrying a table snapshot.
    pub fn join_rep(sender: PeerId, heartbeat: i64, entries: Vec<MembershipEntry>) -> Self {
        Self::JoinRep {
            sender,
            heartbeat,
            entries,
        }
    }

    /// Create a gossip ping carrying a table snapshot.
    pub fn ping(sender: PeerId, heartbeat: i64, entries: Vec<MembershipEntry>) -> Self {
        Self::Ping {
            sender,
            heartbeat,
            entries,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinReq { .. } => MessageKind::JoinReq,
            Self::JoinRep { .. } => MessageKind::JoinRep,
            Self::Ping { .. } => MessageKind::Ping,
        }
    }

    pub fn sender(&self) -> PeerId {
        match self {
            Self::JoinReq { sender, .. }
            | Self::JoinRep { sender, .. }
            | Self::Ping { sender, .. } => *sender,
        }
    }

    pub fn heartbeat(&self) -> i64 {
        match self {
            Self::JoinReq { heartbeat, .. }
            | Self::JoinRep { heartbeat, .. }
            | Self::Ping { heartbeat, .. } => *heartbeat,
        }
    }

    /// Table snapshot carried by this message (empty for join requests).
    pub fn entries(&self) -> &[MembershipEntry] {
        match self {
            Self::JoinRep { entries, .. } | Self::Ping { entries, .. } => entries,
            Self::JoinReq { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer_id() -> PeerId {
        PeerId::new(2, 0)
    }

    #[test]
    fn test_tags_roundtrip() {
        for kind in [MessageKind::JoinReq, MessageKind::JoinRep, MessageKind::Ping] {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_tags() {
        assert_eq!(MessageKind::from_tag(0), None);
        assert_eq!(MessageKind::from_tag(4), None);
        assert_eq!(MessageKind::from_tag(0xff), None);
    }

    #[test]
    fn test_accessors() {
        let entries = vec![MembershipEntry::new(PeerId::new(9, 9), 4, 1)];
        let msg = Message::ping(test_peer_id(), 12, entries.clone());

        assert_eq!(msg.kind(), MessageKind::Ping);
        assert_eq!(msg.sender(), test_peer_id());
        assert_eq!(msg.heartbeat(), 12);
        assert_eq!(msg.entries(), entries.as_slice());
    }

    #[test]
    fn test_join_req_carries_no_entries() {
        let msg = Message::join_req(test_peer_id(), 0);

        assert_eq!(msg.kind(), MessageKind::JoinReq);
        assert!(msg.entries().is_empty());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(MessageKind::JoinReq.as_str(), "JOINREQ");
        assert_eq!(MessageKind::JoinRep.as_str(), "JOINREP");
        assert_eq!(MessageKind::Ping.as_str(), "PING");
    }
}
