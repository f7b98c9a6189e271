//! Events published for the presentation layer

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::merge::MergeReport;

/// Capacity of the engine event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session state as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_advertising: bool,
    pub is_discovering: bool,
    pub connected_devices: Vec<String>,
    pub error: Option<String>,
}

/// Progress of the file currently being sent or received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub file_name: String,
    /// 0 to 100
    pub progress: u8,
    pub total_files: u32,
    pub current_file: u32,
    pub is_complete: bool,
}

/// Everything the engine reports to its embedder.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionStatus(SessionStatus),
    TransferProgress(TransferProgress),
    MergeCompleted(MergeReport),
    SyncFailed(String),
    /// Both peers sent their data and files for the current session
    ExchangeComplete { peer_id: String },
}

/// Sending half shared by every engine component.
pub type EventSender = broadcast::Sender<EngineEvent>;

/// Create the engine event channel.
pub fn channel() -> (EventSender, broadcast::Receiver<EngineEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Publish an event; having no subscribers is not an error.
pub fn emit(events: &EventSender, event: EngineEvent) {
    let _ = events.send(event);
}
