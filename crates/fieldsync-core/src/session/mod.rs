//! Peer sessions: the state machine and the engine that drives it

mod engine;
mod state;

pub use engine::SyncEngine;
pub use state::{PeerSession, SessionState};
