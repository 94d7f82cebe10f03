//! Query planner implementation

use crate::error::{Error, Result};
use crate::types::{SyncWindow, TableSpec, SOQL_TIMESTAMP_FORMAT};

/// Maximum rendered query length accepted by the API.
pub const MAX_QUERY_LENGTH: usize = 10_000;

/// Character budget for each field chunk when splitting a too-long query.
/// Leaves headroom under [`MAX_QUERY_LENGTH`] for the WHERE/ORDER BY clauses
/// and the forced key columns.
pub const FIELD_CHUNK_BUDGET: usize = 8_000;

/// An immutable, rendered query ready for the pagination driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// The rendered SOQL text
    pub soql: String,
    /// The distinct field names this plan selects, in select order
    pub fields: Vec<String>,
}

/// Build the query plan set for one table + window.
///
/// Returns a single plan when the rendered query fits under
/// [`MAX_QUERY_LENGTH`]. When it doesn't and the table has a primary key,
/// the field list is partitioned into chunks, each augmented with the
/// primary and replication keys so chunked results can be merged; every
/// chunk plan shares the identical WHERE/ORDER BY clause so all chunk
/// streams enumerate the same row set in the same order.
///
/// A too-long query with no primary key has no safe reconciliation path
/// and fails with `QueryLengthExceeded`.
pub fn plan(
    table: &TableSpec,
    fields: &[String],
    window: &SyncWindow,
    limit: Option<u32>,
) -> Result<Vec<QueryPlan>> {
    let full = render_query(table, fields, window, limit);
    if full.soql.len() <= MAX_QUERY_LENGTH {
        return Ok(vec![full]);
    }

    let Some(primary_key) = table.primary_key.as_deref() else {
        return Err(Error::QueryLengthExceeded {
            table: table.name.clone(),
            limit: MAX_QUERY_LENGTH,
        });
    };

    tracing::info!(
        table = %table.name,
        length = full.soql.len(),
        "query too long, splitting into field chunks"
    );

    let plans = field_chunks(fields, FIELD_CHUNK_BUDGET)
        .into_iter()
        .map(|mut chunk| {
            chunk.push(primary_key.to_string());
            if let Some(rk) = table.replication_key.as_deref() {
                chunk.push(rk.to_string());
            }
            render_query(table, &chunk, window, limit)
        })
        .collect();

    Ok(plans)
}

/// Render one SOQL query for the given fields and window.
///
/// `SELECT <distinct fields> FROM <table> [WHERE rk >= start AND rk < end
/// ORDER BY rk ASC[, pk ASC]] [LIMIT n]`. Tables without a replication key
/// get a full, unordered extraction with no range predicate.
pub fn render_query(
    table: &TableSpec,
    fields: &[String],
    window: &SyncWindow,
    limit: Option<u32>,
) -> QueryPlan {
    let fields = dedup_preserving_order(fields);
    let mut soql = format!("SELECT {} FROM {}", fields.join(","), table.name);

    if let Some(rk) = table.replication_key.as_deref() {
        let start = window.start.format(SOQL_TIMESTAMP_FORMAT);
        let end = window.end.format(SOQL_TIMESTAMP_FORMAT);
        soql.push_str(&format!(" WHERE {rk} >= {start} AND {rk} < {end}"));
        soql.push_str(&format!(" ORDER BY {rk} ASC"));
        if let Some(pk) = table.primary_key.as_deref() {
            soql.push_str(&format!(",{pk} ASC"));
        }
    }

    if let Some(n) = limit {
        soql.push_str(&format!(" LIMIT {n}"));
    }

    QueryPlan { soql, fields }
}

/// Partition fields into chunks whose cumulative name length stays within
/// the character budget. Greedy: a chunk closes as soon as it crosses the
/// budget, so every chunk except possibly the last is just over it.
fn field_chunks(fields: &[String], budget: usize) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut chunk = Vec::new();
    let mut length = 0;

    for (index, field) in fields.iter().enumerate() {
        length += field.len();
        chunk.push(field.clone());
        if length > budget || index == fields.len() - 1 {
            chunks.push(std::mem::take(&mut chunk));
            length = 0;
        }
    }

    chunks
}

fn dedup_preserving_order(fields: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    fields
        .iter()
        .filter(|f| seen.insert(f.as_str()))
        .cloned()
        .collect()
}
