pub mod common;
pub mod completions;
pub mod config;
pub mod export;
pub mod import;
pub mod preview;
pub mod status;
pub mod sync;
