//! Peer wire protocol
//!
//! Every message is a flat JSON object with a `type` discriminator and a
//! `timestamp` (Unix ms). There is no version negotiation: kinds a receiver does
//! not know are reported as [`DecodeError::UnknownType`] and dropped by the caller.

mod message;

pub use message::{
    decode, encode, DecodeError, FileChunk, FileComplete, FileMetadataMessage, SyncComplete,
    SyncData, SyncMessage, SyncRequest, KNOWN_MESSAGE_TYPES,
};
