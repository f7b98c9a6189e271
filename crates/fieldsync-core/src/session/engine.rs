//! Sync engine: drives one device's peer sessions end to end
//!
//! The engine advertises and discovers at the same time, connects to the first
//! peer it sees, accepts every incoming connection and, after a settle delay,
//! asks the peer for its data. Answers go out as `sync_data` followed by every
//! referenced file on the chunked path and a closing `sync_complete`.
//! Incoming data is merged with the validated strategy; each streamed file is
//! then linked into the merged record that references it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::state::{PeerSession, SessionState};
use crate::attachments::{
    apply_attachments, collect_file_tasks, relink_received_file, StorageLayout,
};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::{self, emit, EngineEvent, EventSender, SessionStatus, TransferProgress};
use crate::export::{build_package, ExportOptions};
use crate::merge::{merge, MergeReport, MergeStrategy};
use crate::models::EntityType;
use crate::protocol::{
    decode, DecodeError, FileChunk, FileComplete, FileMetadataMessage, SyncComplete, SyncData,
    SyncMessage, SyncRequest,
};
use crate::store::{load_entities, LocalStore};
use crate::transfer::{send_message, ChunkOutcome, FileReceiver, FileSender, ReceivedFile};
use crate::transport::{ConnectionStatus, Transport, TransportEvent, TransportEvents};
use crate::util::now_millis;

/// Sweep interval used when no idle timeout is configured
const IDLE_SWEEP_FALLBACK: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Advertising,
    Discovery,
}

impl Presence {
    const fn label(self) -> &'static str {
        match self {
            Self::Advertising => "advertising",
            Self::Discovery => "discovery",
        }
    }
}

async fn run_blocking<R, F>(work: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| Error::Store(format!("store task failed: {error}")))?
}

/// Peer-to-peer sync engine for one device.
pub struct SyncEngine<S: LocalStore + 'static> {
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<dyn Transport>,
    layout: StorageLayout,
    sender: Arc<FileSender>,
    receiver: FileReceiver,
    session: Mutex<PeerSession>,
    events: EventSender,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: LocalStore + 'static> SyncEngine<S> {
    pub fn new(config: SyncConfig, store: Arc<S>, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let layout = StorageLayout::new(&config.storage_root);
        let (events, _) = events::channel();
        Ok(Self {
            sender: Arc::new(FileSender::new(config.chunk_size)),
            receiver: FileReceiver::new(layout.clone(), config.receive_idle_timeout()),
            layout,
            config,
            store,
            transport,
            session: Mutex::new(PeerSession::new()),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status(&self) -> SessionStatus {
        self.session.lock().status()
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    pub fn active_peer(&self) -> Option<String> {
        self.session.lock().active_peer().map(str::to_string)
    }

    /// Incoming files still waiting for chunks.
    pub fn incoming_files(&self) -> usize {
        self.receiver.in_flight()
    }

    fn publish_status(&self) {
        let status = self.session.lock().status();
        emit(&self.events, EngineEvent::SessionStatus(status));
    }

    fn report_failure(&self, error: &Error) {
        self.session.lock().set_error(error.to_string());
        self.publish_status();
        emit(&self.events, EngineEvent::SyncFailed(error.to_string()));
    }

    fn clear_transfers(&self) {
        self.sender.clear();
        self.receiver.clear();
    }

    /// Start advertising and discovery.
    pub fn start(self: &Arc<Self>) {
        self.start_advertising();
        self.start_discovery();
    }

    pub fn start_advertising(self: &Arc<Self>) {
        self.spawn_presence(Presence::Advertising);
    }

    pub fn start_discovery(self: &Arc<Self>) {
        self.spawn_presence(Presence::Discovery);
    }

    /// Start advertising or discovery, retrying after `retry_delay` until it works.
    fn spawn_presence(self: &Arc<Self>, presence: Presence) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let service_id = engine.config.service_id.clone();
            let delay = engine.config.retry_delay();
            loop {
                let result = match presence {
                    Presence::Advertising => engine.transport.start_advertising(&service_id).await,
                    Presence::Discovery => engine.transport.start_discovery(&service_id).await,
                };
                match result {
                    Ok(()) => {
                        {
                            let mut session = engine.session.lock();
                            match presence {
                                Presence::Advertising => session.set_advertising(true),
                                Presence::Discovery => session.set_discovering(true),
                            }
                        }
                        tracing::info!(service = %service_id, "Started {}", presence.label());
                        engine.publish_status();
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(
                            "Failed to start {}: {error}; retrying in {delay:?}",
                            presence.label()
                        );
                        engine.session.lock().set_error(error.to_string());
                        engine.publish_status();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Stop all activity and drop every connection and transfer.
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.transport.stop_advertising().await;
        self.transport.stop_discovery().await;
        self.transport.disconnect_all().await;
        self.clear_transfers();
        {
            let mut session = self.session.lock();
            if let Some(peer) = session.active_peer().map(str::to_string) {
                session.on_connection_lost(&peer, None);
            }
            session.set_advertising(false);
            session.set_discovering(false);
        }
        self.publish_status();
        tracing::info!("Sync engine stopped");
    }

    /// Process transport events until the stream ends or `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, mut transport_events: TransportEvents, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let sweep_every = self
            .receiver
            .idle_timeout()
            .map_or(IDLE_SWEEP_FALLBACK, |timeout| {
                timeout.max(Duration::from_millis(100))
            });
        let mut sweep = tokio::time::interval(sweep_every);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                event = transport_events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    self.receiver.evict_stalled();
                }
            }
        }
        self.stop().await;
    }

    /// Connect to a known peer directly.
    pub async fn connect(&self, peer_id: &str) -> Result<()> {
        let should_connect = self.session.lock().on_endpoint_found(peer_id);
        if !should_connect {
            return Err(Error::Transport("a connection is already active".to_string()));
        }
        if let Err(error) = self.transport.request_connection(peer_id).await {
            self.session.lock().on_request_failed(peer_id, &error.to_string());
            self.publish_status();
            return Err(error);
        }
        Ok(())
    }

    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::EndpointFound { peer_id, name } => {
                tracing::info!(peer = %peer_id, name = %name, "Endpoint found");
                let should_connect = self.session.lock().on_endpoint_found(&peer_id);
                if should_connect {
                    if let Err(error) = self.transport.request_connection(&peer_id).await {
                        tracing::warn!(peer = %peer_id, "Connection request failed: {error}");
                        self.session
                            .lock()
                            .on_request_failed(&peer_id, &error.to_string());
                    }
                }
                self.publish_status();
            }
            TransportEvent::EndpointLost { peer_id } => {
                tracing::info!(peer = %peer_id, "Endpoint lost");
                self.session.lock().on_endpoint_lost(&peer_id);
                self.publish_status();
            }
            TransportEvent::ConnectionInitiated { peer_id, name } => {
                tracing::info!(peer = %peer_id, name = %name, "Accepting connection");
                self.session.lock().on_connection_initiated(&peer_id);
                if let Err(error) = self.transport.accept_connection(&peer_id).await {
                    tracing::warn!(peer = %peer_id, "Failed to accept connection: {error}");
                }
            }
            TransportEvent::ConnectionResult { peer_id, status } => {
                self.on_connection_result(peer_id, status).await;
            }
            TransportEvent::Disconnected { peer_id } => {
                tracing::info!(peer = %peer_id, "Peer disconnected");
                let ours = self.session.lock().on_connection_lost(&peer_id, None);
                if ours {
                    self.clear_transfers();
                }
                self.publish_status();
            }
            TransportEvent::PayloadReceived { peer_id, payload } => {
                self.handle_payload(&peer_id, &payload).await;
            }
            TransportEvent::PayloadProgress {
                peer_id,
                bytes_transferred,
                total_bytes,
            } => {
                tracing::trace!(peer = %peer_id, bytes_transferred, total_bytes, "Payload progress");
            }
        }
    }

    async fn on_connection_result(self: &Arc<Self>, peer_id: String, status: ConnectionStatus) {
        let error = match status {
            ConnectionStatus::Ok => {
                let generation = self.session.lock().on_connected(&peer_id);
                let Some(generation) = generation else {
                    tracing::warn!(peer = %peer_id, "Already connected to another peer, dropping");
                    self.transport.disconnect(&peer_id).await;
                    return;
                };
                tracing::info!(peer = %peer_id, "Connected");
                self.publish_status();
                self.schedule_sync_request(peer_id, generation);
                return;
            }
            ConnectionStatus::Rejected => "connection rejected".to_string(),
            ConnectionStatus::Error(reason) => reason,
        };
        tracing::warn!(peer = %peer_id, "Connection failed: {error}");
        let ours = self.session.lock().on_connection_lost(&peer_id, Some(error));
        if ours {
            self.clear_transfers();
        }
        self.publish_status();
    }

    fn schedule_sync_request(self: &Arc<Self>, peer_id: String, generation: u64) {
        let engine = Arc::clone(self);
        let delay = self.config.settle_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = engine.session.lock().is_current(&peer_id, generation);
            if current {
                engine.send_sync_request(&peer_id).await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Ask the peer for its full snapshot.
    pub async fn send_sync_request(&self, peer_id: &str) {
        let message = SyncMessage::SyncRequest(SyncRequest {
            timestamp: now_millis(),
            device_name: self.config.device_name.clone(),
            device_id: self.config.device_id.clone(),
        });
        match send_message(self.transport.as_ref(), peer_id, &message).await {
            Ok(()) => tracing::info!(peer = %peer_id, "Sent sync_request"),
            Err(error) => tracing::warn!(peer = %peer_id, "Failed to send sync_request: {error}"),
        }
    }

    async fn handle_payload(self: &Arc<Self>, peer_id: &str, payload: &[u8]) {
        let message = match decode(payload) {
            Ok(message) => message,
            Err(DecodeError::UnknownType(kind)) => {
                tracing::warn!(peer = %peer_id, kind = %kind, "Ignoring unknown message type");
                return;
            }
            Err(error) => {
                tracing::warn!(peer = %peer_id, "Dropping malformed message: {error}");
                return;
            }
        };
        tracing::debug!(peer = %peer_id, kind = message.kind(), "Received message");

        match message {
            SyncMessage::SyncRequest(request) => self.serve_sync_request(peer_id, &request).await,
            SyncMessage::SyncData(data) => self.receive_sync_data(peer_id, data).await,
            SyncMessage::FileMetadata(header) => self.receive_file_header(peer_id, header).await,
            SyncMessage::FileChunk(chunk) => self.receive_chunk(peer_id, &chunk).await,
            SyncMessage::FileComplete(ack) => {
                tracing::debug!(peer = %peer_id, file_id = %ack.file_id, "Peer acknowledged file");
            }
            SyncMessage::SyncComplete(done) => self.receive_sync_complete(peer_id, &done),
        }
    }

    async fn serve_sync_request(self: &Arc<Self>, peer_id: &str, request: &SyncRequest) {
        tracing::info!(peer = %peer_id, device = %request.device_name, "Serving sync_request");

        let store = Arc::clone(&self.store);
        let entities = match run_blocking(move || load_entities(store.as_ref())).await {
            Ok(entities) => entities,
            Err(error) => {
                tracing::error!("Failed to read local store: {error}");
                self.report_failure(&error);
                return;
            }
        };

        let tasks = collect_file_tasks(&entities, &self.layout, peer_id).await;
        let package = build_package(
            entities,
            &self.layout,
            &self.config.device_id,
            ExportOptions {
                include_attachments: false,
            },
        )
        .await;
        let message = SyncMessage::SyncData(SyncData {
            timestamp: package.timestamp,
            device_id: package.device_id,
            entities: package.entities,
            file_attachments: package.file_attachments,
        });
        if let Err(error) = send_message(self.transport.as_ref(), peer_id, &message).await {
            tracing::warn!(peer = %peer_id, "Failed to send sync_data: {error}");
            return;
        }
        tracing::info!(peer = %peer_id, files = tasks.len(), "Sent sync_data");

        if tasks.is_empty() {
            let done = SyncMessage::SyncComplete(SyncComplete {
                timestamp: now_millis(),
                total_files: 0,
            });
            if let Err(error) = send_message(self.transport.as_ref(), peer_id, &done).await {
                tracing::warn!(peer = %peer_id, "Failed to send sync_complete: {error}");
            }
            self.finish_serving(peer_id);
            return;
        }

        if self.sender.enqueue(tasks) {
            let engine = Arc::clone(self);
            let peer_id = peer_id.to_string();
            tokio::spawn(async move {
                Arc::clone(&engine.sender)
                    .run(Arc::clone(&engine.transport), engine.events.clone())
                    .await;
                engine.finish_serving(&peer_id);
            });
        }
    }

    fn finish_serving(&self, peer_id: &str) {
        let both_done = {
            let mut session = self.session.lock();
            session.active_peer() == Some(peer_id) && session.mark_served()
        };
        if both_done {
            tracing::info!(peer = %peer_id, "Exchange complete");
            emit(
                &self.events,
                EngineEvent::ExchangeComplete {
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }

    async fn receive_sync_data(&self, peer_id: &str, data: SyncData) {
        let SyncData {
            mut entities,
            file_attachments,
            device_id,
            ..
        } = data;
        tracing::info!(
            peer = %peer_id,
            origin = %device_id,
            records = entities.total(),
            attachments = file_attachments.len(),
            "Received sync_data"
        );

        apply_attachments(&mut entities, &file_attachments, &self.layout).await;

        let store = Arc::clone(&self.store);
        let result: Result<MergeReport> =
            run_blocking(move || merge(store.as_ref(), &entities, MergeStrategy::Validated)).await;
        match result {
            Ok(report) => emit(&self.events, EngineEvent::MergeCompleted(report)),
            Err(error) => {
                tracing::warn!(peer = %peer_id, "Sync failed: {error}");
                self.report_failure(&error);
            }
        }
    }

    async fn receive_file_header(&self, peer_id: &str, header: FileMetadataMessage) {
        tracing::debug!(
            peer = %peer_id,
            file_id = %header.file_id,
            chunks = header.metadata.total_chunks,
            "Incoming file"
        );
        let total_files = header.total_files;
        match self.receiver.begin(header).await {
            Ok(Some(file)) => {
                self.session.lock().expect_files(total_files);
                self.complete_file(peer_id, file).await;
            }
            Ok(None) => {
                self.session.lock().expect_files(total_files);
            }
            Err(error) => tracing::warn!(peer = %peer_id, "Cannot receive file: {error}"),
        }
    }

    async fn receive_chunk(&self, peer_id: &str, chunk: &FileChunk) {
        match self.receiver.accept_chunk(chunk).await {
            Ok(ChunkOutcome::Progress {
                file_name,
                progress,
            }) => {
                let (current_file, total_files) = {
                    let session = self.session.lock();
                    let current_file = session.files_received() + 1;
                    (current_file, session.files_expected(current_file))
                };
                emit(
                    &self.events,
                    EngineEvent::TransferProgress(TransferProgress {
                        file_name,
                        progress,
                        total_files,
                        current_file,
                        is_complete: false,
                    }),
                );
            }
            Ok(ChunkOutcome::Completed(file)) => self.complete_file(peer_id, file).await,
            Ok(ChunkOutcome::Ignored) => {}
            Err(error @ Error::Attachment(_)) => {
                tracing::warn!(peer = %peer_id, file_id = %chunk.file_id, "Dropped received file: {error}");
                self.acknowledge(peer_id, &chunk.file_id).await;
            }
            Err(error) => {
                tracing::warn!(peer = %peer_id, file_id = %chunk.file_id, "Dropping chunk: {error}");
            }
        }
    }

    async fn complete_file(&self, peer_id: &str, file: ReceivedFile) {
        let (current_file, total_files) = {
            let mut session = self.session.lock();
            let current_file = session.record_file_received();
            (current_file, session.files_expected(current_file))
        };
        self.relink(&file).await;
        emit(
            &self.events,
            EngineEvent::TransferProgress(TransferProgress {
                file_name: file.metadata.file_name.clone(),
                progress: 100,
                total_files,
                current_file,
                is_complete: false,
            }),
        );
        self.acknowledge(peer_id, &file.file_id).await;
    }

    /// Point the merged record at the file's location on this device.
    async fn relink(&self, file: &ReceivedFile) {
        let metadata = &file.metadata;
        if metadata.original_path.is_empty() {
            return;
        }
        let Ok(entity_type) = metadata.entity_type.parse::<EntityType>() else {
            tracing::debug!(entity_type = %metadata.entity_type, "No record type to relink into");
            return;
        };
        let store = Arc::clone(&self.store);
        let entity_id = metadata.entity_id;
        let original_path = metadata.original_path.clone();
        let relative_path = file.relative_path.clone();
        let result = run_blocking(move || {
            relink_received_file(
                store.as_ref(),
                entity_type,
                entity_id,
                &original_path,
                &relative_path,
            )
        })
        .await;
        match result {
            Ok(true) => tracing::debug!(
                file_id = %file.file_id,
                path = %file.relative_path,
                "Linked received file"
            ),
            Ok(false) => tracing::debug!(
                file_id = %file.file_id,
                "Received file is not referenced by a stored record"
            ),
            Err(error) => tracing::warn!(file_id = %file.file_id, "Failed to link received file: {error}"),
        }
    }

    async fn acknowledge(&self, peer_id: &str, file_id: &str) {
        let ack = SyncMessage::FileComplete(FileComplete {
            timestamp: now_millis(),
            file_id: file_id.to_string(),
        });
        if let Err(error) = send_message(self.transport.as_ref(), peer_id, &ack).await {
            tracing::warn!(peer = %peer_id, file_id = %file_id, "Failed to send file_complete: {error}");
        }
    }

    fn receive_sync_complete(&self, peer_id: &str, done: &SyncComplete) {
        let (received, both_done) = {
            let mut session = self.session.lock();
            let received = session.files_received();
            let both_done = session.mark_received_complete();
            (received, both_done)
        };
        if received < done.total_files {
            tracing::warn!(
                peer = %peer_id,
                expected = done.total_files,
                received,
                "Peer finished with files missing"
            );
        }
        emit(
            &self.events,
            EngineEvent::TransferProgress(TransferProgress {
                file_name: String::new(),
                progress: 100,
                total_files: done.total_files,
                current_file: received,
                is_complete: true,
            }),
        );
        if both_done {
            tracing::info!(peer = %peer_id, "Exchange complete");
            emit(
                &self.events,
                EngineEvent::ExchangeComplete {
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }
}
