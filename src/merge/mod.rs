//! Multi-stream record merging
//!
//! A field-chunked query plan produces one record stream per chunk, each
//! enumerating the same rows (identical WHERE and ORDER BY) but carrying a
//! different slice of the columns. The mergers here reassemble full rows.
//!
//! [`LockstepMerger`] pulls one record from every stream per row and
//! verifies the primary keys agree positionally; any divergence (a row
//! modified between chunk submissions shifting one stream's ordering)
//! fails fast with a primary-key mismatch, which the engine handles by
//! restarting the window from the bookmark. [`BufferedMerger`] trades
//! memory for tolerance: it drains every stream up front and joins rows
//! by key, so ordering skew doesn't matter as long as the key sets agree.

use crate::error::{Error, Result};
use crate::paginate::RecordStream;
use crate::types::Record;
use async_trait::async_trait;
use std::collections::HashMap;

fn key_of(record: &Record, primary_key: &str) -> String {
    record
        .get(primary_key)
        .map_or_else(|| "<missing>".to_string(), value_to_key)
}

fn value_to_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merges chunk streams row by row, in lockstep.
///
/// Memory use is one record per stream. Requires every stream to
/// enumerate the same rows in the same order.
pub struct LockstepMerger {
    streams: Vec<Box<dyn RecordStream>>,
    primary_key: String,
}

impl LockstepMerger {
    /// Create a merger over chunk streams joined on `primary_key`
    pub fn new(streams: Vec<Box<dyn RecordStream>>, primary_key: impl Into<String>) -> Self {
        Self {
            streams,
            primary_key: primary_key.into(),
        }
    }
}

#[async_trait]
impl RecordStream for LockstepMerger {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        let mut merged: Option<Record> = None;
        let mut first_key: Option<String> = None;
        let mut exhausted = 0usize;

        for stream in &mut self.streams {
            let Some(record) = stream.next_record().await? else {
                exhausted += 1;
                continue;
            };

            let key = key_of(&record, &self.primary_key);
            match &first_key {
                None => first_key = Some(key),
                Some(expected) if *expected != key => {
                    return Err(Error::primary_key_mismatch(expected.clone(), key));
                }
                Some(_) => {}
            }

            match &mut merged {
                None => merged = Some(record),
                Some(row) => row.extend(record),
            }
        }

        if exhausted == self.streams.len() {
            return Ok(None);
        }
        // Some streams ran dry while others still have rows: the chunk
        // result sets diverged.
        if exhausted > 0 {
            let key = first_key.unwrap_or_else(|| "<missing>".to_string());
            return Err(Error::primary_key_mismatch(key, "<exhausted>"));
        }

        Ok(merged)
    }
}

/// Merges chunk streams by draining them fully and joining on key.
///
/// Holds the entire window's rows in memory; output follows the first
/// stream's order. A key present in one stream but absent from another
/// is a mismatch.
#[derive(Debug)]
pub struct BufferedMerger {
    merged: std::vec::IntoIter<Record>,
}

impl BufferedMerger {
    /// Drain all streams and join their rows on `primary_key`
    pub async fn collect(
        mut streams: Vec<Box<dyn RecordStream>>,
        primary_key: &str,
    ) -> Result<Self> {
        let mut order: Vec<String> = Vec::new();
        let mut rows: HashMap<String, Record> = HashMap::new();
        let mut key_sets: Vec<std::collections::HashSet<String>> = Vec::new();

        for (index, stream) in streams.iter_mut().enumerate() {
            let mut keys = std::collections::HashSet::new();
            while let Some(record) = stream.next_record().await? {
                let key = key_of(&record, primary_key);
                keys.insert(key.clone());
                match rows.entry(key.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        entry.get_mut().extend(record);
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(record);
                        if index == 0 {
                            order.push(key);
                        }
                    }
                }
            }
            key_sets.push(keys);
        }

        // Every stream must have seen exactly the same keys.
        if let Some(first) = key_sets.first() {
            for keys in &key_sets[1..] {
                if let Some(extra) = first.symmetric_difference(keys).next() {
                    let (left, right) = if first.contains(extra) {
                        (extra.clone(), "<missing>".to_string())
                    } else {
                        ("<missing>".to_string(), extra.clone())
                    };
                    return Err(Error::primary_key_mismatch(left, right));
                }
            }
        }

        let merged: Vec<Record> = order.into_iter().filter_map(|k| rows.remove(&k)).collect();
        Ok(Self {
            merged: merged.into_iter(),
        })
    }
}

#[async_trait]
impl RecordStream for BufferedMerger {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.merged.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::test_support::VecStream;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stream(values: Vec<serde_json::Value>) -> Box<dyn RecordStream> {
        Box::new(VecStream::from_values(values))
    }

    async fn drain(mut merger: impl RecordStream) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(record) = merger.next_record().await? {
            out.push(record);
        }
        Ok(out)
    }

    fn chunked_streams() -> Vec<Box<dyn RecordStream>> {
        vec![
            stream(vec![
                json!({"Id": "a1", "Name": "Acme"}),
                json!({"Id": "a2", "Name": "Globex"}),
            ]),
            stream(vec![
                json!({"Id": "a1", "Industry": "Mining"}),
                json!({"Id": "a2", "Industry": "Energy"}),
            ]),
        ]
    }

    #[tokio::test]
    async fn test_lockstep_merges_aligned_streams() {
        let merger = LockstepMerger::new(chunked_streams(), "Id");
        let rows = drain(merger).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], "a1");
        assert_eq!(rows[0]["Name"], "Acme");
        assert_eq!(rows[0]["Industry"], "Mining");
        assert_eq!(rows[1]["Id"], "a2");
        assert_eq!(rows[1]["Industry"], "Energy");
    }

    #[tokio::test]
    async fn test_lockstep_detects_key_divergence() {
        let streams = vec![
            stream(vec![json!({"Id": "a1", "Name": "Acme"})]),
            stream(vec![json!({"Id": "a9", "Industry": "Mining"})]),
        ];
        let mut merger = LockstepMerger::new(streams, "Id");

        let err = merger.next_record().await.unwrap_err();
        match err {
            Error::PrimaryKeyMismatch { left, right } => {
                assert_eq!(left, "a1");
                assert_eq!(right, "a9");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_lockstep_detects_uneven_exhaustion() {
        let streams = vec![
            stream(vec![
                json!({"Id": "a1", "Name": "Acme"}),
                json!({"Id": "a2", "Name": "Globex"}),
            ]),
            stream(vec![json!({"Id": "a1", "Industry": "Mining"})]),
        ];
        let mut merger = LockstepMerger::new(streams, "Id");

        merger.next_record().await.unwrap();
        let err = merger.next_record().await.unwrap_err();
        assert!(matches!(err, Error::PrimaryKeyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_lockstep_single_stream_passthrough() {
        let merger = LockstepMerger::new(
            vec![stream(vec![json!({"Id": "a1"}), json!({"Id": "a2"})])],
            "Id",
        );
        let rows = drain(merger).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_lockstep_missing_key_is_mismatch() {
        let streams = vec![
            stream(vec![json!({"Id": "a1", "Name": "Acme"})]),
            stream(vec![json!({"Industry": "Mining"})]),
        ];
        let mut merger = LockstepMerger::new(streams, "Id");

        let err = merger.next_record().await.unwrap_err();
        match err {
            Error::PrimaryKeyMismatch { right, .. } => assert_eq!(right, "<missing>"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_buffered_merges_reordered_streams() {
        // Same keys, different order per stream: buffered mode tolerates it.
        let streams = vec![
            stream(vec![
                json!({"Id": "a1", "Name": "Acme"}),
                json!({"Id": "a2", "Name": "Globex"}),
            ]),
            stream(vec![
                json!({"Id": "a2", "Industry": "Energy"}),
                json!({"Id": "a1", "Industry": "Mining"}),
            ]),
        ];
        let merger = BufferedMerger::collect(streams, "Id").await.unwrap();
        let rows = drain(merger).await.unwrap();

        // First-stream order preserved.
        assert_eq!(rows[0]["Id"], "a1");
        assert_eq!(rows[0]["Industry"], "Mining");
        assert_eq!(rows[1]["Id"], "a2");
        assert_eq!(rows[1]["Industry"], "Energy");
    }

    #[tokio::test]
    async fn test_buffered_detects_key_set_divergence() {
        let streams = vec![
            stream(vec![json!({"Id": "a1"}), json!({"Id": "a2"})]),
            stream(vec![json!({"Id": "a1"})]),
        ];
        let err = BufferedMerger::collect(streams, "Id").await.unwrap_err();
        assert!(matches!(err, Error::PrimaryKeyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_buffered_empty_streams() {
        let streams = vec![stream(vec![]), stream(vec![])];
        let mut merger = BufferedMerger::collect(streams, "Id").await.unwrap();
        assert!(merger.next_record().await.unwrap().is_none());
    }
}
