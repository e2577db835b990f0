//! PeerId: logical address of a node in the gossip group.
//!
//! A peer is identified by a 32-bit host identifier and a 16-bit port.
//! Displays as `host:port` for logs and config files, and travels as two
//! fixed-width integers on the wire.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: expected host:port")]
    InvalidFormat,
    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// Identity of a peer in the membership group.
///
/// Equality is structural: two ids are the same peer iff both the host and
/// the port match.
///
/// # Examples
/// ```
/// use gossip_core::PeerId;
///
/// let peer_id = PeerId::new(7, 9000);
/// assert_eq!(peer_id.to_string(), "7:9000");
///
/// let parsed: PeerId = "7:9000".parse().unwrap();
/// assert_eq!(parsed, peer_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    host: u32,
    port: u16,
}

impl PeerId {
    /// The all-zero address. Never a valid node identity.
    pub const NULL: PeerId = PeerId { host: 0, port: 0 };

    pub const fn new(host: u32, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> u32 {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if this is the null address.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.split_once(':').ok_or(PeerIdError::InvalidFormat)?;
        if host.is_empty() || port.is_empty() {
            return Err(PeerIdError::InvalidFormat);
        }
        Ok(Self {
            host: host.parse()?,
            port: port.parse()?,
        })
    }
}

impl From<(u32, u16)> for PeerId {
    fn from((host, port): (u32, u16)) -> Self {
        Self { host, port }
    }
}

// Human-readable formats (JSON config, events) get the "host:port" string;
// binary formats (the wire codec) get two fixed-width integers.
impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            (self.host, self.port).serialize(s)
        }
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            let s = String::deserialize(d)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let (host, port) = <(u32, u16)>::deserialize(d)?;
            Ok(Self { host, port })
        }
    }
}
