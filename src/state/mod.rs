//! State management and checkpointing
//!
//! Per-stream bookmarks holding the latest successfully processed
//! replication-key value, persisted between runs.

mod manager;
mod types;

pub use manager::StateManager;
pub use types::State;
