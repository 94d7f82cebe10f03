//! Cursor pagination
//!
//! The query endpoint answers with a page of records plus, while more
//! remain, a relative `nextRecordsUrl` cursor. [`QueryStream`] drives a
//! single query through all of its pages and yields records one at a
//! time; record-at-a-time delivery keeps memory flat no matter how many
//! pages a window produces.

use crate::error::{Error, Result};
use crate::http::ApiClient;
use crate::types::Record;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// An ordered, pull-based stream of records
#[async_trait]
pub trait RecordStream: Send {
    /// Yield the next record, or `None` once the stream is exhausted
    async fn next_record(&mut self) -> Result<Option<Record>>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    records: Vec<serde_json::Value>,
    #[serde(rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
    #[serde(default, rename = "totalSize")]
    total_size: Option<u64>,
}

enum NextRequest {
    /// Initial query submission
    Query { soql: String },
    /// Follow-up cursor fetch
    Cursor { path: String },
}

/// Streams the result set of one query across all of its pages
pub struct QueryStream {
    client: Arc<ApiClient>,
    next: Option<NextRequest>,
    buffer: VecDeque<Record>,
}

impl QueryStream {
    /// Create a stream that will submit `soql` on the first pull
    pub fn new(client: Arc<ApiClient>, soql: impl Into<String>) -> Self {
        Self {
            client,
            next: Some(NextRequest::Query { soql: soql.into() }),
            buffer: VecDeque::new(),
        }
    }

    async fn fetch_page(&mut self, request: NextRequest) -> Result<()> {
        let body = match request {
            NextRequest::Query { soql } => {
                self.client
                    .get_json(&self.client.query_path(), &[("q", soql.as_str())])
                    .await?
            }
            NextRequest::Cursor { path } => self.client.get_json(&path, &[]).await?,
        };

        let page: QueryResponse = serde_json::from_value(body)?;
        if let Some(total) = page.total_size {
            debug!(records = page.records.len(), total, "fetched result page");
        }

        for value in page.records {
            match value {
                serde_json::Value::Object(mut record) => {
                    // Transport envelope, not table data.
                    record.remove("attributes");
                    self.buffer.push_back(record);
                }
                other => {
                    return Err(Error::Other(format!(
                        "expected a record object in query results, got: {other}"
                    )));
                }
            }
        }

        self.next = page
            .next_records_url
            .map(|path| NextRequest::Cursor { path });
        Ok(())
    }
}

#[async_trait]
impl RecordStream for QueryStream {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        while self.buffer.is_empty() {
            match self.next.take() {
                Some(request) => self.fetch_page(request).await?,
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }
}
