//! Incoming file assembly
//!
//! Chunks land in a per-file buffer indexed by `chunkIndex`. Once every index
//! is present the file is written to the temporary directory and moved into
//! the directory of its entity type.
//!
//! Headers come from the peer, so nothing is allocated from them up front:
//! chunk slots fill as chunks arrive and the byte count may never pass the
//! announced `fileSize`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{checksum, progress_percent};
use crate::attachments::StorageLayout;
use crate::error::{Error, Result};
use crate::models::FileMetadata;
use crate::protocol::{DecodeError, FileChunk, FileMetadataMessage};

/// Largest file a peer may announce.
pub const MAX_INCOMING_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Partially received file.
#[derive(Debug)]
struct ReceivingFile {
    metadata: FileMetadata,
    chunks: BTreeMap<u32, Vec<u8>>,
    received_bytes: u64,
    last_activity: Instant,
}

impl ReceivingFile {
    fn new(metadata: FileMetadata) -> Self {
        Self {
            metadata,
            chunks: BTreeMap::new(),
            received_bytes: 0,
            last_activity: Instant::now(),
        }
    }

    fn received_chunks(&self) -> u32 {
        u32::try_from(self.chunks.len()).unwrap_or(u32::MAX)
    }

    fn is_complete(&self) -> bool {
        self.received_chunks() >= self.metadata.total_chunks
    }
}

/// Reject headers whose size and chunk count cannot describe a real file.
fn validate_header(file_id: &str, metadata: &FileMetadata) -> Result<()> {
    if metadata.file_size > MAX_INCOMING_FILE_SIZE {
        return Err(DecodeError::InvalidChunk(format!(
            "{file_id}: announced size {} exceeds {MAX_INCOMING_FILE_SIZE} bytes",
            metadata.file_size
        ))
        .into());
    }
    let chunks = u64::from(metadata.total_chunks);
    if (metadata.file_size > 0 && chunks == 0) || chunks > metadata.file_size.max(1) {
        return Err(DecodeError::InvalidChunk(format!(
            "{file_id}: {} chunks cannot carry {} bytes",
            metadata.total_chunks, metadata.file_size
        ))
        .into());
    }
    Ok(())
}

/// A file that finished assembling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: String,
    pub metadata: FileMetadata,
    /// Final absolute location
    pub path: PathBuf,
    /// Location relative to the storage root
    pub relative_path: String,
}

/// Result of feeding one chunk to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk stored; file still incomplete
    Progress { file_name: String, progress: u8 },
    /// Last chunk arrived and the file was written
    Completed(ReceivedFile),
    /// Unknown file or a chunk index seen before
    Ignored,
}

/// Table of in-flight incoming files keyed by `fileId`.
#[derive(Debug)]
pub struct FileReceiver {
    layout: StorageLayout,
    files: DashMap<String, ReceivingFile>,
    idle_timeout: Option<Duration>,
}

impl FileReceiver {
    pub fn new(layout: StorageLayout, idle_timeout: Option<Duration>) -> Self {
        Self {
            layout,
            files: DashMap::new(),
            idle_timeout,
        }
    }

    /// Start receiving a file announced by `file_metadata`.
    ///
    /// A zero-chunk file completes immediately. Headers announcing more than
    /// [`MAX_INCOMING_FILE_SIZE`] bytes, or more chunks than bytes, are rejected.
    pub async fn begin(&self, message: FileMetadataMessage) -> Result<Option<ReceivedFile>> {
        validate_header(&message.file_id, &message.metadata)?;
        let file = ReceivingFile::new(message.metadata);
        if file.is_complete() {
            return self.assemble(&message.file_id, file).await.map(Some);
        }
        if self.files.insert(message.file_id.clone(), file).is_some() {
            tracing::debug!(file_id = %message.file_id, "Restarted incoming file");
        }
        Ok(None)
    }

    /// Store one chunk and assemble the file if it was the last one missing.
    pub async fn accept_chunk(&self, chunk: &FileChunk) -> Result<ChunkOutcome> {
        let bytes = chunk.decode_data()?;

        let finished = {
            let Some(mut entry) = self.files.get_mut(&chunk.file_id) else {
                tracing::warn!(file_id = %chunk.file_id, "Chunk for unknown file");
                return Ok(ChunkOutcome::Ignored);
            };
            let file = entry.value_mut();
            let index = chunk.chunk_index;
            if index >= file.metadata.total_chunks {
                return Err(DecodeError::InvalidChunk(format!(
                    "{}: index {index} out of {}",
                    chunk.file_id, file.metadata.total_chunks
                ))
                .into());
            }
            file.last_activity = Instant::now();
            if file.chunks.contains_key(&index) {
                tracing::debug!(file_id = %chunk.file_id, index, "Duplicate chunk");
                return Ok(ChunkOutcome::Ignored);
            }
            let received_bytes = file.received_bytes + bytes.len() as u64;
            if received_bytes > file.metadata.file_size {
                return Err(DecodeError::InvalidChunk(format!(
                    "{}: chunk {index} overruns the announced {} bytes",
                    chunk.file_id, file.metadata.file_size
                ))
                .into());
            }
            file.received_bytes = received_bytes;
            file.chunks.insert(index, bytes);

            if !file.is_complete() {
                return Ok(ChunkOutcome::Progress {
                    file_name: file.metadata.file_name.clone(),
                    progress: progress_percent(file.received_chunks(), file.metadata.total_chunks),
                });
            }
            drop(entry);
            self.files.remove(&chunk.file_id).map(|(_, file)| file)
        };

        match finished {
            Some(file) => self
                .assemble(&chunk.file_id, file)
                .await
                .map(ChunkOutcome::Completed),
            None => Ok(ChunkOutcome::Ignored),
        }
    }

    async fn assemble(&self, file_id: &str, file: ReceivingFile) -> Result<ReceivedFile> {
        let ReceivingFile {
            metadata, chunks, ..
        } = file;
        let mut contents = Vec::with_capacity(usize::try_from(metadata.file_size).unwrap_or(0));
        for chunk in chunks.into_values() {
            contents.extend_from_slice(&chunk);
        }

        if contents.len() as u64 != metadata.file_size {
            return Err(Error::Attachment(format!(
                "{file_id}: received {} of {} bytes",
                contents.len(),
                metadata.file_size
            )));
        }

        if !metadata.checksum.is_empty() && checksum(&contents) != metadata.checksum {
            return Err(Error::Attachment(format!("{file_id}: checksum mismatch")));
        }

        let temp_dir = self.layout.temp_dir();
        tokio::fs::create_dir_all(&temp_dir).await?;
        let temp_path = temp_dir.join(format!("{}.part", sanitize(file_id)));
        tokio::fs::write(&temp_path, &contents).await?;

        let (path, relative_path) = self
            .layout
            .target_for(&metadata.entity_type, &metadata.file_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::rename(&temp_path, &path).await.is_err() {
            tokio::fs::copy(&temp_path, &path).await?;
            tokio::fs::remove_file(&temp_path).await.ok();
        }

        tracing::info!(file_id = %file_id, path = %path.display(), size = contents.len(), "File received");
        Ok(ReceivedFile {
            file_id: file_id.to_string(),
            metadata,
            path,
            relative_path,
        })
    }

    /// Evict files whose last chunk arrived longer ago than the idle timeout.
    ///
    /// Does nothing when no timeout is configured.
    pub fn evict_stalled(&self) -> Vec<String> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };
        let stalled: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.last_activity.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for file_id in &stalled {
            self.files.remove(file_id);
            tracing::warn!(file_id = %file_id, "Evicted stalled incoming file");
        }
        stalled
    }

    /// Drop every in-flight file.
    pub fn clear(&self) {
        let dropped = self.files.len();
        self.files.clear();
        if dropped > 0 {
            tracing::info!(dropped, "Cleared incoming file table");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.files.len()
    }

    pub const fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

fn sanitize(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{split_chunks, total_chunks, CHUNK_SIZE};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn header(file_name: &str, bytes: &[u8], entity_type: &str) -> FileMetadataMessage {
        let metadata = FileMetadata {
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            total_chunks: total_chunks(bytes.len(), CHUNK_SIZE),
            entity_type: entity_type.to_string(),
            entity_id: 12,
            file_type: crate::models::FileType::Photo,
            original_path: String::new(),
            checksum: checksum(bytes),
            last_modified: 0,
        };
        FileMetadataMessage {
            timestamp: 0,
            file_id: metadata.file_id(),
            total_files: 1,
            metadata,
        }
    }

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn out_of_order_chunks_reassemble_exactly() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let bytes = sample_bytes(150_000);
        let header = header("nameplate.jpg", &bytes, "equipment");
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();

        let chunks = split_chunks(&bytes, CHUNK_SIZE);
        let mut outcomes = Vec::new();
        for index in [2_u32, 0, 1] {
            let chunk = FileChunk::new(0, &file_id, index, chunks[index as usize]);
            outcomes.push(receiver.accept_chunk(&chunk).await.unwrap());
        }

        assert_eq!(
            outcomes[0],
            ChunkOutcome::Progress {
                file_name: "nameplate.jpg".to_string(),
                progress: 33
            }
        );
        let ChunkOutcome::Completed(received) = &outcomes[2] else {
            panic!("expected completion");
        };
        assert_eq!(received.relative_path, "equipment/nameplate.jpg");
        let written = std::fs::read(&received.path).unwrap();
        assert_eq!(written.len(), 150_000);
        assert!(written == bytes);
        assert_eq!(receiver.in_flight(), 0);
    }

    #[tokio::test]
    async fn duplicate_chunk_is_not_counted_twice() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let bytes = sample_bytes(10);
        let mut header = header("a.pdf", &bytes, "remark");
        header.metadata.total_chunks = 2;
        header.metadata.checksum.clear();
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();

        let first = FileChunk::new(0, &file_id, 0, &bytes[..5]);
        receiver.accept_chunk(&first).await.unwrap();
        assert_eq!(receiver.accept_chunk(&first).await.unwrap(), ChunkOutcome::Ignored);
        assert_eq!(receiver.in_flight(), 1);

        let second = FileChunk::new(0, &file_id, 1, &bytes[5..]);
        let ChunkOutcome::Completed(received) = receiver.accept_chunk(&second).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(received.relative_path, "remarks/a.pdf");
    }

    #[tokio::test]
    async fn unknown_entity_type_uses_fallback_directory() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let bytes = sample_bytes(3);
        let header = header("x.bin", &bytes, "gauge");
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();
        let outcome = receiver
            .accept_chunk(&FileChunk::new(0, &file_id, 0, &bytes))
            .await
            .unwrap();
        let ChunkOutcome::Completed(received) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(received.relative_path, "files/x.bin");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_an_attachment_error() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let bytes = sample_bytes(3);
        let mut header = header("x.jpg", &bytes, "remark");
        header.metadata.checksum = checksum(b"other");
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();
        let error = receiver
            .accept_chunk(&FileChunk::new(0, &file_id, 0, &bytes))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Attachment(_)));
        assert_eq!(receiver.in_flight(), 0);
    }

    #[tokio::test]
    async fn chunks_for_unknown_files_and_bad_indices() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let stray = FileChunk::new(0, "1_nothing.jpg", 0, b"abc");
        assert_eq!(receiver.accept_chunk(&stray).await.unwrap(), ChunkOutcome::Ignored);

        let bytes = sample_bytes(3);
        let header = header("x.jpg", &bytes, "remark");
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();
        let out_of_range = FileChunk::new(0, &file_id, 5, &bytes);
        assert!(matches!(
            receiver.accept_chunk(&out_of_range).await.unwrap_err(),
            Error::Decode(DecodeError::InvalidChunk(_))
        ));
    }

    #[tokio::test]
    async fn implausible_headers_are_rejected_before_allocating() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);

        let mut many_chunks = header("x.jpg", &sample_bytes(3), "remark");
        many_chunks.metadata.total_chunks = u32::MAX;
        let mut oversized = header("y.jpg", &sample_bytes(3), "remark");
        oversized.metadata.file_size = MAX_INCOMING_FILE_SIZE + 1;
        let mut no_chunks = header("z.jpg", &sample_bytes(3), "remark");
        no_chunks.metadata.total_chunks = 0;

        for bad in [many_chunks, oversized, no_chunks] {
            assert!(matches!(
                receiver.begin(bad).await.unwrap_err(),
                Error::Decode(DecodeError::InvalidChunk(_))
            ));
        }
        assert_eq!(receiver.in_flight(), 0);
    }

    #[tokio::test]
    async fn chunks_past_the_announced_size_are_rejected() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(StorageLayout::new(dir.path()), None);
        let bytes = sample_bytes(4);
        let mut header = header("x.jpg", &bytes, "remark");
        header.metadata.total_chunks = 2;
        header.metadata.checksum.clear();
        let file_id = header.file_id.clone();
        receiver.begin(header).await.unwrap();

        let oversized = FileChunk::new(0, &file_id, 0, &sample_bytes(5));
        assert!(matches!(
            receiver.accept_chunk(&oversized).await.unwrap_err(),
            Error::Decode(DecodeError::InvalidChunk(_))
        ));
        assert_eq!(receiver.in_flight(), 1);
    }

    #[tokio::test]
    async fn stalled_files_are_only_evicted_with_a_timeout() {
        let dir = tempdir().unwrap();
        let bytes = sample_bytes(CHUNK_SIZE + 1);

        let patient = FileReceiver::new(StorageLayout::new(dir.path()), None);
        patient.begin(header("a.jpg", &bytes, "remark")).await.unwrap();
        assert!(patient.evict_stalled().is_empty());
        assert_eq!(patient.in_flight(), 1);

        let strict = FileReceiver::new(StorageLayout::new(dir.path()), Some(Duration::ZERO));
        strict.begin(header("a.jpg", &bytes, "remark")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(strict.evict_stalled(), vec!["12_a.jpg".to_string()]);
        assert_eq!(strict.in_flight(), 0);

        patient.clear();
        assert_eq!(patient.in_flight(), 0);
    }
}
