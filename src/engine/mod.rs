//! Sync engine
//!
//! Orchestrates one extraction run: resolves each table's start position
//! from its bookmark and resync policy, plans queries for the sync
//! window, streams and merges the results, advances bookmarks record by
//! record, and emits state checkpoints. Server-side "query too
//! expensive" rejections are absorbed by recursively shrinking the
//! window; merge divergence is absorbed by restarting the window from
//! the last bookmark.

mod types;

pub use types::{EngineConfig, MergeStrategy, SyncStats};

use crate::error::{Error, Result};
use crate::http::ApiClient;
use crate::merge::{BufferedMerger, LockstepMerger};
use crate::output::MessageWriter;
use crate::paginate::{QueryStream, RecordStream};
use crate::query;
use crate::state::StateManager;
use crate::types::{weekly_windows, DiscoveredTable, SyncWindow, MIN_WINDOW_SECONDS};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives a full extraction run over a discovered catalog
pub struct SyncEngine {
    client: Arc<ApiClient>,
    state: StateManager,
    writer: MessageWriter,
    start_date: DateTime<Utc>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Create an engine over an authenticated client
    pub fn new(
        client: Arc<ApiClient>,
        state: StateManager,
        writer: MessageWriter,
        start_date: DateTime<Utc>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            state,
            writer,
            start_date,
            config,
        }
    }

    /// Sync every table in the catalog.
    ///
    /// A table whose query can't be planned (too long, no primary key to
    /// split on) is logged and skipped so the rest of the catalog still
    /// makes progress; the run then fails at the end. Everything else is
    /// fatal immediately. State is flushed on every exit path.
    pub async fn sync_all(&self, tables: &[DiscoveredTable]) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        for table in tables {
            let result = self.sync_table(table).await;
            // Flush bookmarks on every table exit path, success or failure,
            // so a downstream consumer keeps the progress already made.
            self.state.checkpoint().await?;
            self.emit_state().await?;

            match result {
                Ok(Some(records)) => {
                    stats.tables_synced += 1;
                    stats.records_emitted += records;
                }
                Ok(None) => stats.tables_skipped += 1,
                Err(e @ Error::QueryLengthExceeded { .. }) => {
                    error!(table = %table.spec.name, "{e}");
                    stats.tables_failed += 1;
                }
                Err(e) => {
                    error!(table = %table.spec.name, "sync failed: {e}");
                    return Err(e);
                }
            }
        }

        info!(
            synced = stats.tables_synced,
            skipped = stats.tables_skipped,
            failed = stats.tables_failed,
            records = stats.records_emitted,
            requests = self.client.quota().local_requests(),
            "run complete"
        );

        if stats.tables_failed > 0 {
            return Err(Error::Other(format!(
                "{} table(s) failed to sync",
                stats.tables_failed
            )));
        }
        Ok(stats)
    }

    /// Sync one table; `None` means it was skipped
    pub async fn sync_table(&self, table: &DiscoveredTable) -> Result<Option<u64>> {
        let name = &table.spec.name;
        if table.fields.is_empty() {
            warn!(table = %name, "no fields discovered, skipping");
            return Ok(None);
        }

        if table.spec.emit_field_catalog {
            self.emit_field_catalog(table)?;
        }

        let now = Utc::now();
        let start = self.resolve_start(table, now).await;
        if start >= now {
            info!(table = %name, "bookmark is current, nothing to sync");
            return Ok(Some(0));
        }

        info!(table = %name, %start, "syncing table");

        let mut records = 0;
        if table.spec.apply_weekly_rule {
            for window in weekly_windows(start, now) {
                records += self.sync_table_window(table, window).await?;
            }
        } else {
            let window = SyncWindow::new(start, now)?;
            records = self.sync_table_window(table, window).await?;
        }

        Ok(Some(records))
    }

    /// Where this table's sync begins: the configured start date when a
    /// full-history resync is due, otherwise the bookmark if one exists.
    async fn resolve_start(&self, table: &DiscoveredTable, now: DateTime<Utc>) -> DateTime<Utc> {
        if table.spec.resync.applies_at(now) {
            info!(table = %table.spec.name, "resync policy fired, re-reading full history");
            return self.start_date;
        }

        match table.spec.replication_key.as_deref() {
            Some(rk) => self
                .state
                .get_bookmark_timestamp(&table.spec.name, rk)
                .await
                .unwrap_or(self.start_date),
            None => self.start_date,
        }
    }

    /// Sync one window to completion, restarting from the bookmark when
    /// the chunk-stream merge diverges.
    async fn sync_table_window(&self, table: &DiscoveredTable, window: SyncWindow) -> Result<u64> {
        let mut window = window;
        let mut attempt = 0;

        loop {
            match self
                .sync_window(table, window, self.config.initial_shrink_factor)
                .await
            {
                Ok(records) => {
                    self.emit_state().await?;
                    return Ok(records);
                }
                Err(e @ Error::PrimaryKeyMismatch { .. }) => {
                    attempt += 1;
                    if attempt > self.config.max_merge_retries {
                        return Err(e);
                    }
                    warn!(
                        table = %table.spec.name,
                        attempt,
                        "merge diverged ({e}), restarting window from bookmark"
                    );

                    if let Some(rk) = table.spec.replication_key.as_deref() {
                        if let Some(bookmark) = self
                            .state
                            .get_bookmark_timestamp(&table.spec.name, rk)
                            .await
                        {
                            if bookmark > window.start {
                                window.start = bookmark;
                            }
                        }
                    }
                    if window.start >= window.end {
                        self.emit_state().await?;
                        return Ok(0);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sync one window, recursively shrinking on a server-side
    /// "query too expensive" rejection.
    ///
    /// The window splits into `factor` equal tiles and each tile recurses
    /// with `factor + 1`, so repeated rejections shrink faster. Tiles
    /// below one day don't shrink further; at that point the rejection is
    /// final. Tables without a replication key have no range predicate to
    /// narrow, so the rejection is final for them too.
    fn sync_window<'a>(
        &'a self,
        table: &'a DiscoveredTable,
        window: SyncWindow,
        factor: u32,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let e = match self.stream_window(table, window).await {
                Ok(records) => return Ok(records),
                Err(e) => e,
            };
            if !e.is_query_too_expensive() || table.spec.replication_key.is_none() {
                return Err(e);
            }

            let tile_seconds = window.duration_seconds() / i64::from(factor.max(1));
            if tile_seconds < MIN_WINDOW_SECONDS {
                return Err(e);
            }

            info!(
                table = %table.spec.name,
                %window.start,
                %window.end,
                factor,
                "query too expensive, shrinking window"
            );

            let mut records = 0;
            for tile in window.split(factor) {
                records += self.sync_window(table, tile, factor + 1).await?;
            }
            Ok(records)
        })
    }

    /// Plan, stream, merge and emit one window's records
    async fn stream_window(&self, table: &DiscoveredTable, window: SyncWindow) -> Result<u64> {
        let fields = table.field_names();
        let plans = query::plan(&table.spec, &fields, &window, self.config.record_limit)?;
        for plan in &plans {
            info!(table = %table.spec.name, soql = %plan.soql, "running query");
        }

        let mut streams: Vec<Box<dyn RecordStream>> = plans
            .iter()
            .map(|plan| {
                Box::new(QueryStream::new(Arc::clone(&self.client), plan.soql.clone()))
                    as Box<dyn RecordStream>
            })
            .collect();

        let mut stream: Box<dyn RecordStream> = if streams.len() == 1 {
            streams.pop().unwrap_or_else(|| unreachable!())
        } else {
            // plan() only splits when a primary key exists.
            let pk = table
                .spec
                .primary_key
                .as_deref()
                .ok_or_else(|| Error::state("split plan without a primary key"))?;
            match self.config.merge_strategy {
                MergeStrategy::Lockstep => Box::new(LockstepMerger::new(streams, pk)),
                MergeStrategy::Buffered => Box::new(BufferedMerger::collect(streams, pk).await?),
            }
        };

        let name = &table.spec.name;
        let mut records = 0u64;
        while let Some(record) = stream.next_record().await? {
            self.writer.write_record(name, &record)?;
            records += 1;

            if let Some(rk) = table.spec.replication_key.as_deref() {
                if let Some(value) = record.get(rk) {
                    self.advance_bookmark(name, rk, value).await?;
                }
            }
        }

        Ok(records)
    }

    /// Advance a stream's bookmark, never backwards: a record older than
    /// the stored bookmark (a server breaking its ordering contract, or
    /// boundary overlap on resume) leaves the bookmark untouched.
    async fn advance_bookmark(
        &self,
        stream: &str,
        replication_key: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        if let Some(ts) = value.as_str().and_then(crate::types::parse_timestamp) {
            let current = self
                .state
                .get_bookmark_timestamp(stream, replication_key)
                .await;
            if current.map_or(false, |cur| ts < cur) {
                return Ok(());
            }
            self.state
                .set_bookmark_timestamp(stream, replication_key, ts)
                .await
        } else {
            self.state
                .set_bookmark(stream, replication_key, value.clone())
                .await
        }
    }

    fn emit_field_catalog(&self, table: &DiscoveredTable) -> Result<()> {
        let stream = format!("{}Fields", table.spec.name);
        for field in &table.fields {
            let value = serde_json::to_value(field)?;
            if let serde_json::Value::Object(record) = value {
                self.writer.write_record(&stream, &record)?;
            }
        }
        Ok(())
    }

    async fn emit_state(&self) -> Result<()> {
        let snapshot = self.state.snapshot().await;
        self.writer.write_state(&serde_json::to_value(snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialProvider;
    use crate::http::{ApiClientConfig, QuotaGovernor};
    use crate::output::test_support::CaptureSink;
    use crate::types::{FieldDescriptor, TableSpec};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine_for(server: &MockServer, sink: &CaptureSink) -> SyncEngine {
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "t",
                "instance_url": server.uri()
            })))
            .mount(server)
            .await;

        let provider = CredentialProvider::with_login_url(
            "rt",
            "cid",
            "cs",
            format!("{}/services/oauth2/token", server.uri()),
        );
        let client = ApiClient::new(
            provider,
            QuotaGovernor::default(),
            ApiClientConfig {
                rate_limit: None,
                ..ApiClientConfig::default()
            },
        )
        .unwrap();

        SyncEngine::new(
            Arc::new(client),
            StateManager::in_memory(),
            sink.writer(),
            crate::types::parse_timestamp("2021-01-01T00:00:00Z").unwrap(),
            EngineConfig::default(),
        )
    }

    fn discovered(spec: TableSpec, fields: &[&str]) -> DiscoveredTable {
        DiscoveredTable {
            spec,
            fields: fields
                .iter()
                .map(|name| FieldDescriptor {
                    name: (*name).to_string(),
                    extra: serde_json::Map::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_field_less_table_is_skipped_without_queries() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let engine = engine_for(&server, &sink).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .expect(0)
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Empty__c").with_replication_key("SystemModstamp"),
            &[],
        );
        assert_eq!(engine.sync_table(&table).await.unwrap(), None);
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_sync_emits_records_and_advances_bookmark() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let engine = engine_for(&server, &sink).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [
                    {"Id": "a1", "SystemModstamp": "2021-06-01T00:00:00.000+0000"},
                    {"Id": "a2", "SystemModstamp": "2021-06-02T00:00:00.000+0000"}
                ]
            })))
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Account")
                .with_primary_key("Id")
                .with_replication_key("SystemModstamp"),
            &["Id", "SystemModstamp"],
        );
        let records = engine.sync_table(&table).await.unwrap();
        assert_eq!(records, Some(2));

        let lines = sink.lines();
        let record_lines: Vec<_> = lines.iter().filter(|l| l["type"] == "RECORD").collect();
        assert_eq!(record_lines.len(), 2);
        assert_eq!(record_lines[0]["stream"], "Account");

        let state_line = lines.iter().find(|l| l["type"] == "STATE").unwrap();
        assert_eq!(
            state_line["value"]["bookmarks"]["Account"]["SystemModstamp"],
            "2021-06-02T00:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_field_catalog_emitted_once_before_records() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let engine = engine_for(&server, &sink).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Account")
                .with_primary_key("Id")
                .with_replication_key("SystemModstamp")
                .with_field_catalog(),
            &["Id", "SystemModstamp"],
        );
        engine.sync_table(&table).await.unwrap();

        let lines = sink.lines();
        let catalog: Vec<_> = lines
            .iter()
            .filter(|l| l["stream"] == "AccountFields")
            .collect();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0]["record"]["name"], "Id");
    }

    #[tokio::test]
    async fn test_state_flushed_when_sync_fails_mid_table() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let engine = engine_for(&server, &sink).await;

        // First page succeeds and advances the bookmark; the cursor fetch
        // then fails with a non-retryable server error.
        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"Id": "a1", "SystemModstamp": "2021-06-01T00:00:00.000+0000"}],
                "nextRecordsUrl": "/services/data/v52.0/query/cursor-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/query/cursor-1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([{
                "message": "unexpected token",
                "errorCode": "MALFORMED_QUERY"
            }])))
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Account")
                .with_primary_key("Id")
                .with_replication_key("SystemModstamp"),
            &["Id", "SystemModstamp"],
        );
        let err = engine.sync_all(&[table]).await.unwrap_err();
        assert_eq!(err.api_code(), Some("MALFORMED_QUERY"));

        // The record that made it out must be followed by a STATE message
        // carrying its bookmark, even though the sync died mid-table.
        let lines = sink.lines();
        let record_idx = lines.iter().position(|l| l["type"] == "RECORD").unwrap();
        let state_idx = lines.iter().rposition(|l| l["type"] == "STATE").unwrap();
        assert!(state_idx > record_idx);
        assert_eq!(
            lines[state_idx]["value"]["bookmarks"]["Account"]["SystemModstamp"],
            "2021-06-01T00:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_bookmark_never_regresses() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let engine = engine_for(&server, &sink).await;

        // Second record is older than the first.
        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [
                    {"Id": "a1", "SystemModstamp": "2021-06-02T00:00:00.000+0000"},
                    {"Id": "a2", "SystemModstamp": "2021-06-01T00:00:00.000+0000"}
                ]
            })))
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Account")
                .with_primary_key("Id")
                .with_replication_key("SystemModstamp"),
            &["Id", "SystemModstamp"],
        );
        engine.sync_table(&table).await.unwrap();

        let bookmark = engine
            .state
            .get_bookmark_timestamp("Account", "SystemModstamp")
            .await
            .unwrap();
        assert_eq!(
            bookmark,
            crate::types::parse_timestamp("2021-06-02T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_current_bookmark_syncs_nothing() {
        let server = MockServer::start().await;
        let sink = CaptureSink::new();
        let mut engine = engine_for(&server, &sink).await;
        engine.start_date = Utc::now() + chrono::Duration::hours(1);

        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/queryAll/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .expect(0)
            .mount(&server)
            .await;

        let table = discovered(
            TableSpec::new("Account").with_replication_key("SystemModstamp"),
            &["Id"],
        );
        assert_eq!(engine.sync_table(&table).await.unwrap(), Some(0));
    }
}
