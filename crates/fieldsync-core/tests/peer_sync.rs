//! End-to-end peer sync between engines on an in-process network

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use tokio::sync::{broadcast, oneshot};

use fieldsync_core::config::SyncConfig;
use fieldsync_core::events::EngineEvent;
use fieldsync_core::models::{
    ControlPoint, EntitySnapshot, EntityType, FileMetadata, FileType, PhotoPaths, Remark, Tube,
};
use fieldsync_core::protocol::{encode, FileMetadataMessage, SyncMessage};
use fieldsync_core::session::{SessionState, SyncEngine};
use fieldsync_core::store::{LocalStore, MemoryStore};
use fieldsync_core::transport::{ConnectionStatus, MemoryNetwork, TransportEvent};

const WAIT: Duration = Duration::from_secs(10);

struct Device {
    engine: Arc<SyncEngine<MemoryStore>>,
    events: broadcast::Receiver<EngineEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    storage: TempDir,
}

impl Device {
    fn join(network: &MemoryNetwork, name: &str, store: MemoryStore, storage: TempDir) -> Self {
        let (transport, transport_events) = network.join(name);
        let config = SyncConfig::new(storage.path())
            .with_device(format!("{name}-id"), name)
            .with_settle_delay(10)
            .with_retry_delay(10);
        let engine = Arc::new(SyncEngine::new(config, Arc::new(store), Arc::new(transport)).unwrap());
        let events = engine.subscribe();
        let (shutdown, stop) = oneshot::channel::<()>();
        tokio::spawn(Arc::clone(&engine).run(transport_events, async move {
            let _ = stop.await;
        }));
        Self {
            engine,
            events,
            shutdown: Some(shutdown),
            storage,
        }
    }

    async fn wait_for<F>(&mut self, mut matches: F) -> EngineEvent
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    fn shut_down(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn control_point(id: i64, name: &str) -> EntitySnapshot<ControlPoint> {
    EntitySnapshot::new(
        ControlPoint {
            id,
            name: name.to_string(),
            ..Default::default()
        },
        100,
        "seed",
    )
}

fn photo_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write_photo(root: &Path, relative: &str, bytes: &[u8]) -> String {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn two_devices_exchange_records_and_streamed_files() {
    let network = MemoryNetwork::new();

    let storage_a = tempdir().unwrap();
    let photo = photo_bytes(150_000);
    let photo_path = write_photo(storage_a.path(), "remarks/crack.jpg", &photo);
    let store_a = MemoryStore::new();
    store_a.insert(&control_point(1, "KP1")).unwrap();
    store_a
        .insert(&EntitySnapshot::new(
            Remark {
                id: 4,
                control_point_id: 1,
                text: "Crack on flange".to_string(),
                photos: PhotoPaths::parse(&photo_path),
                ..Default::default()
            },
            100,
            "seed",
        ))
        .unwrap();

    let store_b = MemoryStore::new();
    store_b.insert(&control_point(2, "KP2")).unwrap();

    let mut a = Device::join(&network, "a", store_a, storage_a);
    let mut b = Device::join(&network, "b", store_b, tempdir().unwrap());
    a.engine.start();
    b.engine.start();

    let done_a = a
        .wait_for(|event| matches!(event, EngineEvent::ExchangeComplete { .. }))
        .await;
    let done_b = b
        .wait_for(|event| matches!(event, EngineEvent::ExchangeComplete { .. }))
        .await;
    assert!(matches!(done_a, EngineEvent::ExchangeComplete { peer_id } if peer_id == "b"));
    assert!(matches!(done_b, EngineEvent::ExchangeComplete { peer_id } if peer_id == "a"));
    assert!(network.is_connected("a", "b"));

    assert_eq!(b.engine.store().count(EntityType::ControlPoint).unwrap(), 2);
    assert_eq!(a.engine.store().count(EntityType::ControlPoint).unwrap(), 2);

    let remark = b.engine.store().get_by_id::<Remark>(4).unwrap().unwrap();
    assert_eq!(remark.origin_device, "a-id");
    let paths: Vec<&String> = remark.entity.photos.iter().collect();
    assert_eq!(paths, vec!["remarks/crack.jpg"]);
    let received = std::fs::read(b.storage.path().join("remarks/crack.jpg")).unwrap();
    assert_eq!(received.len(), photo.len());
    assert!(received == photo);

    a.shut_down();
    b.shut_down();
}

#[tokio::test]
async fn streamed_files_are_relinked_into_their_records() {
    let network = MemoryNetwork::new();

    let storage_a = tempdir().unwrap();
    let crack = photo_bytes(150_000);
    let leak = photo_bytes(70_000);
    let crack_path = write_photo(storage_a.path(), "photos/crack.jpg", &crack);
    let leak_path = write_photo(storage_a.path(), "photos/leak.jpg", &leak);
    let store_a = MemoryStore::new();
    store_a.insert(&control_point(1, "KP1")).unwrap();
    store_a
        .insert(&EntitySnapshot::new(
            Remark {
                id: 4,
                control_point_id: 1,
                text: "Leak under the flange".to_string(),
                photos: PhotoPaths::parse(&format!("{crack_path},{leak_path}")),
                ..Default::default()
            },
            100,
            "seed",
        ))
        .unwrap();

    let mut a = Device::join(&network, "a", store_a, storage_a);
    let mut b = Device::join(&network, "b", MemoryStore::new(), tempdir().unwrap());
    a.engine.start();
    b.engine.start();

    let partial = b
        .wait_for(|event| {
            matches!(event, EngineEvent::TransferProgress(progress)
                if progress.progress < 100 && !progress.is_complete)
        })
        .await;
    let EngineEvent::TransferProgress(partial) = partial else {
        unreachable!()
    };
    assert_eq!(partial.current_file, 1);
    assert_eq!(partial.total_files, 2);

    b.wait_for(|event| matches!(event, EngineEvent::ExchangeComplete { .. }))
        .await;

    let remark = b.engine.store().get_by_id::<Remark>(4).unwrap().unwrap();
    let paths: Vec<&String> = remark.entity.photos.iter().collect();
    assert_eq!(paths, vec!["remarks/crack.jpg", "remarks/leak.jpg"]);
    for (path, bytes) in paths.iter().zip([&crack, &leak]) {
        let received = std::fs::read(b.engine.layout().resolve(path)).unwrap();
        assert!(&received == bytes, "{path} differs from the sent file");
    }
    assert!(!b.storage.path().join("photos").exists());

    a.shut_down();
    b.shut_down();
}

#[tokio::test]
async fn dangling_parent_fails_sync_without_touching_store() {
    let network = MemoryNetwork::new();

    let store_a = MemoryStore::new();
    store_a.insert(&control_point(2, "KP2")).unwrap();
    store_a
        .insert(&EntitySnapshot::new(
            Tube {
                id: 3,
                control_point_id: 9,
                name: "T-1".to_string(),
                ..Default::default()
            },
            100,
            "seed",
        ))
        .unwrap();

    let store_b = MemoryStore::new();
    store_b.insert(&control_point(1, "KP1")).unwrap();
    let before = store_b.dump();

    let mut a = Device::join(&network, "a", store_a, tempdir().unwrap());
    let mut b = Device::join(&network, "b", store_b, tempdir().unwrap());
    a.engine.start();
    b.engine.start();

    let failure = b
        .wait_for(|event| matches!(event, EngineEvent::SyncFailed(_)))
        .await;
    let EngineEvent::SyncFailed(message) = failure else {
        unreachable!()
    };
    assert!(message.contains("tube"), "unexpected message: {message}");
    assert_eq!(b.engine.store().dump(), before);
    assert!(b.engine.status().error.is_some());

    a.wait_for(|event| matches!(event, EngineEvent::MergeCompleted(_)))
        .await;
    assert_eq!(a.engine.store().count(EntityType::ControlPoint).unwrap(), 2);

    a.shut_down();
    b.shut_down();
}

#[tokio::test]
async fn advertising_is_retried_until_it_starts() {
    let network = MemoryNetwork::new();
    let mut a = Device::join(&network, "a", MemoryStore::new(), tempdir().unwrap());
    network.fail_next_advertise("a", 2);

    a.engine.start_advertising();
    let failed = a
        .wait_for(|event| {
            matches!(event, EngineEvent::SessionStatus(status) if status.error.is_some())
        })
        .await;
    assert!(matches!(failed, EngineEvent::SessionStatus(status) if !status.is_advertising));

    a.wait_for(|event| {
        matches!(event, EngineEvent::SessionStatus(status) if status.is_advertising)
    })
    .await;
    let status = a.engine.status();
    assert!(status.is_advertising);
    assert!(status.error.is_none());
    assert_eq!(a.engine.state(), SessionState::Advertising);

    a.shut_down();
}

#[tokio::test]
async fn only_one_peer_is_kept_and_disconnect_resets_session() {
    let network = MemoryNetwork::new();
    let (transport, _events) = network.join("a");
    let storage = tempdir().unwrap();
    let config = SyncConfig::new(storage.path())
        .with_device("a-id", "a")
        .with_settle_delay(60_000);
    let engine = Arc::new(SyncEngine::new(config, Arc::new(MemoryStore::new()), Arc::new(transport)).unwrap());

    engine
        .handle_event(TransportEvent::ConnectionResult {
            peer_id: "b".to_string(),
            status: ConnectionStatus::Ok,
        })
        .await;
    engine
        .handle_event(TransportEvent::ConnectionResult {
            peer_id: "c".to_string(),
            status: ConnectionStatus::Ok,
        })
        .await;
    assert_eq!(engine.active_peer().as_deref(), Some("b"));
    assert_eq!(engine.status().connected_devices, vec!["b".to_string()]);

    engine
        .handle_event(TransportEvent::Disconnected {
            peer_id: "b".to_string(),
        })
        .await;
    assert_eq!(engine.active_peer(), None);
    assert_eq!(engine.state(), SessionState::Disconnected);
    engine.stop().await;
}

#[tokio::test]
async fn failed_connection_to_another_peer_keeps_active_transfers() {
    let network = MemoryNetwork::new();
    let (transport, _events) = network.join("a");
    let storage = tempdir().unwrap();
    let config = SyncConfig::new(storage.path())
        .with_device("a-id", "a")
        .with_settle_delay(60_000);
    let engine = Arc::new(SyncEngine::new(config, Arc::new(MemoryStore::new()), Arc::new(transport)).unwrap());

    engine
        .handle_event(TransportEvent::ConnectionResult {
            peer_id: "b".to_string(),
            status: ConnectionStatus::Ok,
        })
        .await;
    let header = SyncMessage::FileMetadata(FileMetadataMessage {
        timestamp: 1,
        file_id: "4_crack.jpg".to_string(),
        total_files: 1,
        metadata: FileMetadata {
            file_name: "crack.jpg".to_string(),
            file_size: 10,
            total_chunks: 2,
            entity_type: "remark".to_string(),
            entity_id: 4,
            file_type: FileType::Photo,
            original_path: "remarks/crack.jpg".to_string(),
            checksum: String::new(),
            last_modified: 1,
        },
    });
    engine
        .handle_event(TransportEvent::PayloadReceived {
            peer_id: "b".to_string(),
            payload: bytes::Bytes::from(encode(&header).unwrap()),
        })
        .await;
    assert_eq!(engine.incoming_files(), 1);

    engine
        .handle_event(TransportEvent::ConnectionResult {
            peer_id: "c".to_string(),
            status: ConnectionStatus::Error("timed out".to_string()),
        })
        .await;
    engine
        .handle_event(TransportEvent::Disconnected {
            peer_id: "c".to_string(),
        })
        .await;
    assert_eq!(engine.active_peer().as_deref(), Some("b"));
    assert_eq!(engine.incoming_files(), 1);

    engine
        .handle_event(TransportEvent::Disconnected {
            peer_id: "b".to_string(),
        })
        .await;
    assert_eq!(engine.incoming_files(), 0);
    engine.stop().await;
}

#[tokio::test]
async fn malformed_payloads_are_dropped() {
    let network = MemoryNetwork::new();
    let (transport, _events) = network.join("a");
    let storage = tempdir().unwrap();
    let engine = Arc::new(
        SyncEngine::new(
            SyncConfig::new(storage.path()).with_device("a-id", "a"),
            Arc::new(MemoryStore::new()),
            Arc::new(transport),
        )
        .unwrap(),
    );
    let mut events = engine.subscribe();

    let payloads: [&[u8]; 2] = [b"not json", br#"{"type":"telemetry","timestamp":1}"#];
    for payload in payloads {
        engine
            .handle_event(TransportEvent::PayloadReceived {
                peer_id: "b".to_string(),
                payload: bytes::Bytes::copy_from_slice(payload),
            })
            .await;
    }
    assert!(events.try_recv().is_err());
    assert_eq!(engine.store().count(EntityType::ControlPoint).unwrap(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let network = MemoryNetwork::new();
    let (transport, _events) = network.join("a");
    let config = SyncConfig::new("/tmp/fieldsync").with_chunk_size(0);
    let result = SyncEngine::new(config, Arc::new(MemoryStore::new()), Arc::new(transport));
    assert!(result.is_err());
}
