//! Wire-format data types shared across the protocol.
//!
//! Everything here serializes to the JSON shapes spoken on the network
//! and written to disk. Field names and their order are part of the wire
//! contract — renaming a field is a protocol change.

mod chain;
mod message;

pub use chain::{Amount, Block, ChainPayload, Hash, Transaction, Username};
pub use message::{GossipMessage, Peer, PexMessage, PexMessageType};
