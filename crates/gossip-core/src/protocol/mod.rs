//! Wire protocol for membership messages.
//!
//! This module defines what nodes say to each other and how it is framed:
//! - Message types (join request/reply, gossip ping)
//! - Binary codec with a one-byte tag and bounds-checked body

pub mod codec;
pub mod message;

pub use codec::{DecodeError, EncodeError, decode, encode};
pub use message::{Message, MessageKind};
