//! Chunked file streaming between connected peers
//!
//! The sender splits every file into `CHUNK_SIZE` slices and sends a
//! `file_metadata` message followed by one `file_chunk` per slice, one file at
//! a time per peer. The receiver buffers chunks by index, so arrival order does
//! not matter, and assembles the file once every index is present.

mod receiver;
mod sender;

pub use receiver::{ChunkOutcome, FileReceiver, ReceivedFile, MAX_INCOMING_FILE_SIZE};
pub use sender::{build_metadata, send_message, FileSender, FileTask};

use sha2::{Digest, Sha256};

/// Chunk size in bytes for the streaming path.
pub const CHUNK_SIZE: usize = 65_536;

/// Number of chunks needed for a file of `len` bytes. Empty files still take one chunk.
#[allow(clippy::cast_possible_truncation)]
pub fn total_chunks(len: usize, chunk_size: usize) -> u32 {
    if len == 0 || chunk_size == 0 {
        return 1;
    }
    len.div_ceil(chunk_size) as u32
}

/// Split file bytes into chunk slices.
pub fn split_chunks(bytes: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if bytes.is_empty() || chunk_size == 0 {
        return vec![bytes];
    }
    bytes.chunks(chunk_size).collect()
}

/// Hex SHA-256 of a whole file.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Integer progress percentage, clamped to 100.
#[allow(clippy::cast_possible_truncation)]
pub fn progress_percent(received: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    (u64::from(received) * 100 / u64::from(total)).min(100) as u8
}
