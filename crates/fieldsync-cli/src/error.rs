use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Package has {0} dangling parent reference(s); a validated merge would reject it")]
    PreviewRejected(usize),
    #[error("Sync with {peer} failed: {reason}")]
    SyncFailed { peer: String, reason: String },
    #[error("Sync with {0} timed out")]
    SyncTimedOut(String),
}
