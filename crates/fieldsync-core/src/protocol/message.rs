use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::models::{FileAttachment, FileMetadata, SyncEntities};

/// Wire names of every message kind this build understands.
pub const KNOWN_MESSAGE_TYPES: [&str; 6] = [
    "sync_request",
    "sync_data",
    "file_metadata",
    "file_chunk",
    "file_complete",
    "sync_complete",
];

/// Why an incoming payload could not be turned into a [`SyncMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no type discriminator")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid chunk payload: {0}")]
    InvalidChunk(String),
}

/// Asks the remote peer for its full snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub timestamp: i64,
    pub device_name: String,
    #[serde(default)]
    pub device_id: String,
}

/// Full snapshot reply, with inline attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub timestamp: i64,
    pub device_id: String,
    pub entities: SyncEntities,
    #[serde(default)]
    pub file_attachments: Vec<FileAttachment>,
}

/// Announces one file of the chunked path. The metadata fields sit at the top
/// level of the message next to `fileId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataMessage {
    pub timestamp: i64,
    pub file_id: String,
    /// Files the sender queued for this session, zero when unknown
    #[serde(default)]
    pub total_files: u32,
    #[serde(flatten)]
    pub metadata: FileMetadata,
}

/// One slice of a file; `data` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub timestamp: i64,
    pub file_id: String,
    pub chunk_index: u32,
    pub data: String,
}

impl FileChunk {
    pub fn new(timestamp: i64, file_id: impl Into<String>, chunk_index: u32, bytes: &[u8]) -> Self {
        Self {
            timestamp,
            file_id: file_id.into(),
            chunk_index,
            data: STANDARD.encode(bytes),
        }
    }

    pub fn decode_data(&self) -> std::result::Result<Vec<u8>, DecodeError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|error| DecodeError::InvalidChunk(format!("{}: {error}", self.file_id)))
    }
}

/// Receiver acknowledgement that a file was assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileComplete {
    pub timestamp: i64,
    pub file_id: String,
}

/// Sent by the responder once every queued file of the session went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncComplete {
    pub timestamp: i64,
    pub total_files: u32,
}

/// Envelope for every message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncData(SyncData),
    FileMetadata(FileMetadataMessage),
    FileChunk(FileChunk),
    FileComplete(FileComplete),
    SyncComplete(SyncComplete),
}

impl SyncMessage {
    /// Wire name of this message kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SyncRequest(_) => "sync_request",
            Self::SyncData(_) => "sync_data",
            Self::FileMetadata(_) => "file_metadata",
            Self::FileChunk(_) => "file_chunk",
            Self::FileComplete(_) => "file_complete",
            Self::SyncComplete(_) => "sync_complete",
        }
    }

    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::SyncRequest(message) => message.timestamp,
            Self::SyncData(message) => message.timestamp,
            Self::FileMetadata(message) => message.timestamp,
            Self::FileChunk(message) => message.timestamp,
            Self::FileComplete(message) => message.timestamp,
            Self::SyncComplete(message) => message.timestamp,
        }
    }
}

/// Serialize a message to its JSON wire bytes.
pub fn encode(message: &SyncMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse wire bytes, separating unknown kinds from malformed payloads.
pub fn decode(bytes: &[u8]) -> std::result::Result<SyncMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    if !KNOWN_MESSAGE_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}
