//! State manager implementation
//!
//! Provides file-based bookmark persistence with atomic writes. Bookmarks
//! update after every record; the file is rewritten on each update and on
//! every exit path so a crash loses at most the in-flight record.

use super::types::State;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// State manager for persisting and loading bookmarks
#[derive(Debug)]
pub struct StateManager {
    /// Path to the state file
    path: PathBuf,
    /// Current state (cached)
    state: Arc<RwLock<State>>,
    /// Whether to auto-save on every update
    auto_save: bool,
}

impl StateManager {
    /// Create a state manager from a file, loading existing state if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error::State {
                message: format!("Failed to read state file: {e}"),
            })?;
            serde_json::from_str(&contents).map_err(|e| Error::State {
                message: format!("Failed to parse state file: {e}"),
            })?
        } else {
            State::new()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
            auto_save: true,
        })
    }

    /// Create an in-memory state manager (no file persistence)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(State::new())),
            auto_save: false,
        }
    }

    /// Create an in-memory manager seeded from inline JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let state: State = serde_json::from_str(json).map_err(|e| Error::State {
            message: format!("Failed to parse state JSON: {e}"),
        })?;

        Ok(Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(state)),
            auto_save: false,
        })
    }

    /// Save current state to file
    pub async fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(()); // In-memory mode
        }

        let state = self.state.read().await;
        let contents = serde_json::to_string_pretty(&*state).map_err(|e| Error::State {
            message: format!("Failed to serialize state: {e}"),
        })?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::State {
                message: format!("Failed to write state file: {e}"),
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::State {
                message: format!("Failed to rename state file: {e}"),
            })?;

        Ok(())
    }

    /// Flush current state to durable storage (alias for save)
    pub async fn checkpoint(&self) -> Result<()> {
        self.save().await
    }

    /// Bookmark for a stream parsed as a timestamp
    pub async fn get_bookmark_timestamp(
        &self,
        stream: &str,
        replication_key: &str,
    ) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state.get_bookmark_timestamp(stream, replication_key)
    }

    /// Raw bookmark value for a stream
    pub async fn get_bookmark(&self, stream: &str, replication_key: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.get_bookmark(stream, replication_key).cloned()
    }

    /// Advance a stream's bookmark to a timestamp value
    pub async fn set_bookmark_timestamp(
        &self,
        stream: &str,
        replication_key: &str,
        value: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.set_bookmark_timestamp(stream, replication_key, value);
        }
        if self.auto_save {
            self.save().await?;
        }
        Ok(())
    }

    /// Advance a stream's bookmark to a raw scalar value
    pub async fn set_bookmark(
        &self,
        stream: &str,
        replication_key: &str,
        value: Value,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.set_bookmark(stream, replication_key, value);
        }
        if self.auto_save {
            self.save().await?;
        }
        Ok(())
    }

    /// Snapshot of the current state
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    /// Export state as JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state).map_err(|e| Error::State {
            message: format!("Failed to serialize state: {e}"),
        })
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            state: Arc::clone(&self.state),
            auto_save: self.auto_save,
        }
    }
}
