//! Outgoing file queue
//!
//! Tasks are queued per peer and drained by a single worker. The queue and the
//! "transfer in progress" flag share one lock so checking and claiming the
//! worker role is a single critical section.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{checksum, progress_percent, split_chunks, total_chunks};
use crate::error::{Error, Result};
use crate::events::{emit, EngineEvent, EventSender, TransferProgress};
use crate::models::{FileMetadata, FileType};
use crate::protocol::{
    encode, FileChunk, FileMetadataMessage, SyncComplete, SyncMessage,
};
use crate::transport::{PeerId, Transport};
use crate::util::now_millis;

/// One file waiting to be streamed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub peer_id: PeerId,
    /// Absolute path of the file on this device
    pub path: PathBuf,
    /// Wire entity type name of the owning record
    pub entity_type: String,
    pub entity_id: i64,
    /// Path relative to the storage root, as referenced by the record
    pub original_path: String,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<FileTask>,
    in_progress: bool,
    total_files: u32,
    current_file: u32,
}

/// Sequential file sender shared by every session of an engine.
#[derive(Debug)]
pub struct FileSender {
    state: Mutex<QueueState>,
    chunk_size: usize,
}

impl FileSender {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            chunk_size,
        }
    }

    /// Queue files and claim the worker role if no transfer is running.
    ///
    /// Returns `true` when the caller must start [`FileSender::run`].
    pub fn enqueue(&self, tasks: impl IntoIterator<Item = FileTask>) -> bool {
        let mut state = self.state.lock();
        let before = state.queue.len();
        state.queue.extend(tasks);
        let added = u32::try_from(state.queue.len() - before).unwrap_or(u32::MAX);
        state.total_files = state.total_files.saturating_add(added);
        if state.in_progress || state.queue.is_empty() {
            return false;
        }
        state.in_progress = true;
        true
    }

    /// Drop every queued task; the file currently being sent stops at its next send.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.total_files = state.current_file;
        if dropped > 0 {
            tracing::info!(dropped, "Cleared outgoing file queue");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().in_progress
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn next_task(&self) -> Option<(FileTask, u32, u32)> {
        let mut state = self.state.lock();
        if let Some(task) = state.queue.pop_front() {
            state.current_file += 1;
            Some((task, state.current_file, state.total_files))
        } else {
            state.in_progress = false;
            state.total_files = 0;
            state.current_file = 0;
            None
        }
    }

    /// Worker loop: send every queued file, one at a time, then a
    /// `sync_complete` to each peer that was served.
    pub async fn run(self: Arc<Self>, transport: Arc<dyn Transport>, events: EventSender) {
        let mut sent_per_peer: BTreeMap<PeerId, u32> = BTreeMap::new();

        while let Some((task, current_file, total_files)) = self.next_task() {
            let peer_id = task.peer_id.clone();
            let sent = sent_per_peer.entry(peer_id.clone()).or_default();
            match self
                .send_file(transport.as_ref(), &events, &task, current_file, total_files)
                .await
            {
                Ok(()) => *sent += 1,
                Err(error) => {
                    tracing::warn!(
                        peer = %peer_id,
                        path = %task.path.display(),
                        "File transfer abandoned: {error}"
                    );
                }
            }
        }

        for (peer_id, total_files) in sent_per_peer {
            let message = SyncMessage::SyncComplete(SyncComplete {
                timestamp: now_millis(),
                total_files,
            });
            if let Err(error) = send_message(transport.as_ref(), &peer_id, &message).await {
                tracing::warn!(peer = %peer_id, "Failed to send sync_complete: {error}");
            }
        }
    }

    async fn send_file(
        &self,
        transport: &dyn Transport,
        events: &EventSender,
        task: &FileTask,
        current_file: u32,
        total_files: u32,
    ) -> Result<()> {
        let bytes = tokio::fs::read(&task.path).await.map_err(|error| {
            Error::Attachment(format!("{}: {error}", task.path.display()))
        })?;
        let metadata = build_metadata(task, &bytes, self.chunk_size);
        let file_id = metadata.file_id();
        let file_name = metadata.file_name.clone();
        let chunk_count = metadata.total_chunks;

        tracing::debug!(
            peer = %task.peer_id,
            file_id = %file_id,
            size = bytes.len(),
            chunks = chunk_count,
            "Sending file"
        );

        let header = SyncMessage::FileMetadata(FileMetadataMessage {
            timestamp: now_millis(),
            file_id: file_id.clone(),
            total_files,
            metadata,
        });
        send_message(transport, &task.peer_id, &header).await?;
        report(events, &file_name, 0, total_files, current_file, false);

        for (index, chunk) in split_chunks(&bytes, self.chunk_size).into_iter().enumerate() {
            let chunk_index = u32::try_from(index)
                .map_err(|_| Error::InvalidInput(format!("{file_id} has too many chunks")))?;
            let message =
                SyncMessage::FileChunk(FileChunk::new(now_millis(), &file_id, chunk_index, chunk));
            send_message(transport, &task.peer_id, &message).await?;
            report(
                events,
                &file_name,
                progress_percent(chunk_index + 1, chunk_count),
                total_files,
                current_file,
                false,
            );
        }

        report(
            events,
            &file_name,
            100,
            total_files,
            current_file,
            current_file == total_files,
        );
        Ok(())
    }
}

/// Describe a file for the `file_metadata` header.
pub fn build_metadata(task: &FileTask, bytes: &[u8], chunk_size: usize) -> FileMetadata {
    let file_name = task
        .path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    FileMetadata {
        file_name,
        file_size: bytes.len() as u64,
        total_chunks: total_chunks(bytes.len(), chunk_size),
        entity_type: task.entity_type.clone(),
        entity_id: task.entity_id,
        file_type: FileType::from_path(&task.path),
        original_path: task.original_path.clone(),
        checksum: checksum(bytes),
        last_modified: now_millis(),
    }
}

/// Encode and send one protocol message.
pub async fn send_message(
    transport: &dyn Transport,
    peer_id: &str,
    message: &SyncMessage,
) -> Result<()> {
    let payload = encode(message)?;
    transport.send_payload(peer_id, Bytes::from(payload)).await
}

fn report(
    events: &EventSender,
    file_name: &str,
    progress: u8,
    total_files: u32,
    current_file: u32,
    is_complete: bool,
) {
    emit(
        events,
        EngineEvent::TransferProgress(TransferProgress {
            file_name: file_name.to_string(),
            progress,
            total_files,
            current_file,
            is_complete,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::transport::{MemoryNetwork, TransportEvent};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn task(peer: &str, path: PathBuf) -> FileTask {
        FileTask {
            peer_id: peer.to_string(),
            path,
            entity_type: "equipment".to_string(),
            entity_id: 7,
            original_path: "equipment/pump.jpg".to_string(),
        }
    }

    #[test]
    fn only_first_enqueue_claims_the_worker() {
        let sender = FileSender::new(4);
        assert!(sender.enqueue([task("b", PathBuf::from("a.jpg"))]));
        assert!(!sender.enqueue([task("b", PathBuf::from("b.jpg"))]));
        assert_eq!(sender.queued(), 2);
        sender.clear();
        assert_eq!(sender.queued(), 0);
        assert!(sender.is_busy());
    }

    #[test]
    fn empty_enqueue_does_not_start_a_worker() {
        let sender = FileSender::new(4);
        assert!(!sender.enqueue(Vec::new()));
        assert!(!sender.is_busy());
    }

    #[tokio::test]
    async fn sends_metadata_chunks_then_completion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pump.jpg");
        std::fs::write(&path, b"0123456789").unwrap();

        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join("a");
        let (b, mut b_rx) = network.join("b");
        b.start_advertising("svc").await.unwrap();
        a.request_connection("b").await.unwrap();
        a.accept_connection("b").await.unwrap();
        b.accept_connection("a").await.unwrap();

        let sender = Arc::new(FileSender::new(4));
        assert!(sender.enqueue([task("b", path)]));
        let (events, _rx) = crate::events::channel();
        Arc::clone(&sender).run(Arc::new(a), events).await;
        assert!(!sender.is_busy());

        let mut kinds = Vec::new();
        while let Ok(event) = b_rx.try_recv() {
            if let TransportEvent::PayloadReceived { payload, .. } = event {
                kinds.push(decode(&payload).unwrap());
            }
        }
        let names: Vec<&str> = kinds.iter().map(SyncMessage::kind).collect();
        assert_eq!(
            names,
            vec![
                "file_metadata",
                "file_chunk",
                "file_chunk",
                "file_chunk",
                "sync_complete"
            ]
        );
        let SyncMessage::FileMetadata(header) = &kinds[0] else {
            panic!("expected metadata first");
        };
        assert_eq!(header.file_id, "7_pump.jpg");
        assert_eq!(header.total_files, 1);
        assert_eq!(header.metadata.total_chunks, 3);
        assert_eq!(header.metadata.file_size, 10);
    }

    #[tokio::test]
    async fn missing_file_is_skipped() {
        let network = MemoryNetwork::new();
        let (a, _rx) = network.join("a");
        let sender = Arc::new(FileSender::new(4));
        sender.enqueue([task("b", PathBuf::from("/does/not/exist.jpg"))]);
        let (events, _events_rx) = crate::events::channel();
        Arc::clone(&sender).run(Arc::new(a), events).await;
        assert!(!sender.is_busy());
    }
}
