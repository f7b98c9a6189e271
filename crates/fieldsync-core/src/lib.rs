//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the inventory entity model, the local store, the peer
//! protocol and transports, chunked file transfer and the merge engine used by
//! every fieldsync front end.

pub mod attachments;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod export;
pub mod merge;
pub mod models;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transfer;
pub mod transport;
mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use events::{EngineEvent, SessionStatus, TransferProgress};
pub use merge::{merge, MergeReport, MergeStrategy};
pub use models::{EntitySnapshot, EntityType, SyncEntities, SyncPackage};
pub use session::{SessionState, SyncEngine};
pub use store::{LocalStore, MemoryStore, SqliteStore};
