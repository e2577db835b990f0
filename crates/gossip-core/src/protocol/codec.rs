//! Wire codec for membership messages.
//!
//! Frame layout:
//!
//! ```text
//! [tag: u8][sender: u32 host, u16 port][heartbeat: i64][count: u64][entry]*
//! entry = [peer: u32 host, u16 port][heartbeat: i64][last_updated: u64]
//! ```
//!
//! The tag is read by hand so unknown message types can be told apart from
//! corrupt bodies. Everything after it is a fixed-width little-endian
//! Bincode encoding of the body, so every read is bounds-checked by the
//! decoder rather than by offset arithmetic.
//!
//! `last_updated` travels for provenance only. Receivers stamp their own
//! clock when merging; clocks are never compared across nodes.
//!
//! Frames are not size-capped: a snapshot always carries the whole table.
//! Decoding is bounded by the input instead, since the entry count is
//! checked against the bytes actually present before anything is allocated.

use super::{Message, MessageKind};
use crate::PeerId;
use crate::membership::{MembershipEntry, is_failure_marker};
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded size of a frame header (tag, sender, heartbeat, entry count).
pub const HEADER_SIZE: usize = 1 + 6 + 8 + 8;

/// Encoded size of one membership entry.
pub const ENTRY_SIZE: usize = 6 + 8 + 8;

/// Offset of the entry count within the body (after the tag).
const COUNT_OFFSET: usize = 6 + 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty message")]
    Empty,

    #[error("Unknown message tag: {0:#04x}")]
    UnknownMessageTag(u8),

    #[error("Truncated message")]
    Truncated,

    #[error("Join request must not carry a membership snapshot")]
    UnexpectedSnapshot,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    peer: PeerId,
    heartbeat: i64,
    last_updated: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBody {
    sender: PeerId,
    heartbeat: i64,
    entries: Vec<WireEntry>,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Encode a message into a fresh byte buffer.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let body = WireBody {
        sender: message.sender(),
        heartbeat: message.heartbeat(),
        entries: message
            .entries()
            .iter()
            .map(|e| WireEntry {
                peer: e.peer,
                heartbeat: e.heartbeat,
                last_updated: e.last_updated,
            })
            .collect(),
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.entries.len() * ENTRY_SIZE);
    buf.push(message.kind().tag());
    wire_options()
        .serialize_into(&mut buf, &body)
        .map_err(|e| EncodeError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Decode a message from a byte buffer.
///
/// Never reads past the end of `data`; truncated or trailing input is
/// rejected.
pub fn decode(data: &[u8]) -> Result<Message, DecodeError> {
    let (&tag, rest) = data.split_first().ok_or(DecodeError::Empty)?;
    let kind = MessageKind::from_tag(tag).ok_or(DecodeError::UnknownMessageTag(tag))?;
    check_entry_count(rest)?;

    let body: WireBody = wire_options()
        .reject_trailing_bytes()
        .deserialize(rest)
        .map_err(into_decode_error)?;

    let entries: Vec<MembershipEntry> = body
        .entries
        .into_iter()
        .map(|w| MembershipEntry {
            peer: w.peer,
            heartbeat: w.heartbeat,
            last_updated: w.last_updated,
            suspect: is_failure_marker(w.heartbeat),
        })
        .collect();

    match kind {
        MessageKind::JoinReq if !entries.is_empty() => Err(DecodeError::UnexpectedSnapshot),
        MessageKind::JoinReq => Ok(Message::join_req(body.sender, body.heartbeat)),
        MessageKind::JoinRep => Ok(Message::join_rep(body.sender, body.heartbeat, entries)),
        MessageKind::Ping => Ok(Message::ping(body.sender, body.heartbeat, entries)),
    }
}

/// Reject an entry count the remaining bytes cannot hold.
///
/// A body too short to contain the count is left to the decoder, which
/// reports it as truncated.
fn check_entry_count(body: &[u8]) -> Result<(), DecodeError> {
    let Some(count_bytes) = body.get(COUNT_OFFSET..COUNT_OFFSET + 8) else {
        return Ok(());
    };
    let mut raw = [0u8; 8];
    raw.copy_from_slice(count_bytes);
    let count = u64::from_le_bytes(raw);

    let available = (body.len() - COUNT_OFFSET - 8) / ENTRY_SIZE;
    if count > available as u64 {
        return Err(DecodeError::Truncated);
    }
    Ok(())
}

fn into_decode_error(err: bincode::Error) -> DecodeError {
    match *err {
        bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::Truncated
        }
        ref other => DecodeError::Malformed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::FAILURE_SENTINEL;

    fn sender() -> PeerId {
        PeerId::new(1, 0)
    }

    fn sample_entries() -> Vec<MembershipEntry> {
        vec![
            MembershipEntry::new(PeerId::new(1, 0), 7, 100),
            MembershipEntry::new(PeerId::new(2, 5000), 3, 98),
        ]
    }

    // ==================== Encoding ====================

    #[test]
    fn test_join_req_layout() {
        let bytes = encode(&Message::join_req(PeerId::new(2, 1), 0)).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[0], MessageKind::JoinReq.tag());
        // sender host, port
        assert_eq!(&bytes[1..7], &[2, 0, 0, 0, 1, 0]);
        // entry count
        assert_eq!(&bytes[15..23], &[0; 8]);
    }

    #[test]
    fn test_ping_size() {
        let bytes = encode(&Message::ping(sender(), 7, sample_entries())).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * ENTRY_SIZE);
        assert_eq!(bytes[0], MessageKind::Ping.tag());
    }

    #[test]
    fn test_large_table_is_not_capped() {
        let entries: Vec<_> = (1..=10_000u32)
            .map(|i| MembershipEntry::new(PeerId::new(i, 0), 1, 0))
            .collect();
        let msg = Message::ping(sender(), 1, entries);

        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 10_000 * ENTRY_SIZE);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    // ==================== Decoding ====================

    #[test]
    fn test_ping_roundtrip() {
        let msg = Message::ping(sender(), 7, sample_entries());
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_join_rep_roundtrip() {
        let msg = Message::join_rep(sender(), 0, sample_entries());
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_zero_entries_is_valid() {
        let msg = Message::join_req(PeerId::new(3, 0), 0);
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_sentinel_decodes_as_suspect() {
        let mut entries = sample_entries();
        entries[1].heartbeat = FAILURE_SENTINEL;
        entries[1].suspect = true;

        let decoded = decode(&encode(&Message::ping(sender(), 7, entries)).unwrap()).unwrap();

        assert!(!decoded.entries()[0].suspect);
        assert!(decoded.entries()[1].suspect);
        assert_eq!(decoded.entries()[1].heartbeat, FAILURE_SENTINEL);
    }

    #[test]
    fn test_empty_buffer() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = encode(&Message::join_req(sender(), 0)).unwrap();
        bytes[0] = 0x7f;

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnknownMessageTag(0x7f))
        ));
    }

    #[test]
    fn test_entry_count_larger_than_buffer() {
        let mut bytes = encode(&Message::ping(sender(), 7, sample_entries())).unwrap();
        bytes[15..23].copy_from_slice(&5u64.to_le_bytes());

        assert!(matches!(decode(&bytes), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_huge_entry_count_does_not_allocate() {
        let mut bytes = encode(&Message::ping(sender(), 7, vec![])).unwrap();
        bytes[15..23].copy_from_slice(&u64::MAX.to_le_bytes());

        assert_eq!(decode(&bytes), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_truncated_at_every_length() {
        let bytes = encode(&Message::ping(sender(), 7, sample_entries())).unwrap();

        for len in 1..bytes.len() {
            assert!(decode(&bytes[..len]).is_err(), "length {len} should fail");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Message::join_req(sender(), 0)).unwrap();
        bytes.push(0);

        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_join_req_with_entries_rejected() {
        let mut bytes = encode(&Message::ping(sender(), 0, sample_entries())).unwrap();
        bytes[0] = MessageKind::JoinReq.tag();

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnexpectedSnapshot)
        ));
    }
}
