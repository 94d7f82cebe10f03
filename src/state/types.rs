//! State types for tracking sync progress
//!
//! These types are serialized to JSON and persisted between runs.

use crate::types::parse_timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Legacy bookmark key kept readable for compatibility with state written
/// before replication keys became configurable.
const LEGACY_BOOKMARK_KEY: &str = "SystemModstamp";

/// Complete persisted state: one bookmark map per stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    /// Per-stream bookmarks, `stream -> {replication_key_name: value}`
    #[serde(default)]
    pub bookmarks: HashMap<String, HashMap<String, Value>>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a bookmark to a timestamp value, stored as ISO-8601 UTC
    pub fn set_bookmark_timestamp(&mut self, stream: &str, key: &str, value: DateTime<Utc>) {
        self.set_bookmark(
            stream,
            key,
            Value::String(value.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }

    /// Set a bookmark to a raw scalar value (non-time replication keys)
    pub fn set_bookmark(&mut self, stream: &str, key: &str, value: Value) {
        self.bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Raw bookmark value for a stream, falling back to the legacy key name
    pub fn get_bookmark(&self, stream: &str, key: &str) -> Option<&Value> {
        let entry = self.bookmarks.get(stream)?;
        entry.get(key).or_else(|| entry.get(LEGACY_BOOKMARK_KEY))
    }

    /// Bookmark parsed as a UTC timestamp, if present and time-shaped
    pub fn get_bookmark_timestamp(&self, stream: &str, key: &str) -> Option<DateTime<Utc>> {
        self.get_bookmark(stream, key)?
            .as_str()
            .and_then(parse_timestamp)
    }
}
