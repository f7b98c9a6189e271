//! Error types for fieldsync-core

use thiserror::Error;

use crate::models::EntityType;
use crate::protocol::DecodeError;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Advertise, discover, connect or send failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// An incoming child references a parent that is absent from the same batch
    #[error("Dependency violation: {child} {child_id} references missing {parent} {parent_id}")]
    DependencyViolation {
        child: EntityType,
        child_id: i64,
        parent: EntityType,
        parent_id: i64,
    },

    /// Malformed or unknown wire message
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Attachment could not be read, decoded or written
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Local store failure
    #[error("Store error: {0}")]
    Store(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error aborts a whole merge batch rather than a single record or message.
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::DependencyViolation { .. })
    }
}
