//! Core domain types
//!
//! Table specifications, sync windows and record aliases shared by the
//! planner, merger and engine.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single extracted record: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Timestamp format accepted by the query language (`2021-03-05T10:15:30Z`).
pub const SOQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ============================================================================
// Table specification
// ============================================================================

/// When a table must re-read its full history instead of resuming from
/// the bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncRule {
    /// Never resync; always resume from the bookmark
    #[default]
    Never,
    /// Resync the full history on every run
    Always,
    /// Resync when the run happens on this weekday (0 = Monday .. 6 = Sunday)
    Weekday(u8),
}

impl ResyncRule {
    /// Check whether the rule fires for a run happening at `now`
    pub fn applies_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            ResyncRule::Never => false,
            ResyncRule::Always => true,
            ResyncRule::Weekday(day) => now.weekday().num_days_from_monday() == u32::from(*day),
        }
    }
}

/// Specification of one extractable table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table (object) name
    pub name: String,
    /// Primary key field, if the table has one we can merge on
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Replication key field driving incremental filtering and ordering;
    /// absence means full, unordered extraction
    #[serde(default)]
    pub replication_key: Option<String>,
    /// Emit the field catalog once as metadata records
    #[serde(default)]
    pub emit_field_catalog: bool,
    /// Decompose the sync interval into weekly sub-windows
    #[serde(default)]
    pub apply_weekly_rule: bool,
    /// Full-history resync policy
    #[serde(default)]
    pub resync: ResyncRule,
}

impl TableSpec {
    /// Create a spec with only a name (full unordered extraction)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            replication_key: None,
            emit_field_catalog: false,
            apply_weekly_rule: false,
            resync: ResyncRule::Never,
        }
    }

    /// Set the primary key field
    #[must_use]
    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    /// Set the replication key field
    #[must_use]
    pub fn with_replication_key(mut self, key: impl Into<String>) -> Self {
        self.replication_key = Some(key.into());
        self
    }

    /// Emit the field catalog for this table
    #[must_use]
    pub fn with_field_catalog(mut self) -> Self {
        self.emit_field_catalog = true;
        self
    }

    /// Apply the weekly re-windowing rule
    #[must_use]
    pub fn with_weekly_rule(mut self) -> Self {
        self.apply_weekly_rule = true;
        self
    }

    /// Set the full-history resync policy
    #[must_use]
    pub fn with_resync(mut self, rule: ResyncRule) -> Self {
        self.resync = rule;
        self
    }
}

/// A field descriptor returned by the table describe endpoint.
///
/// Only the name is interpreted; the rest of the metadata is carried
/// through for field-catalog emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Remaining describe metadata (type, label, etc.)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A table spec paired with its discovered field catalog
#[derive(Debug, Clone)]
pub struct DiscoveredTable {
    /// The table specification
    pub spec: TableSpec,
    /// Field descriptors from the describe call
    pub fields: Vec<FieldDescriptor>,
}

impl DiscoveredTable {
    /// Names of all discovered fields, in catalog order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

// ============================================================================
// Sync windows
// ============================================================================

/// Seconds in one day, the floor below which window shrinking gives up.
pub const MIN_WINDOW_SECONDS: i64 = 86_400;

/// Seconds in one week, the weekly re-windowing step.
const WEEK_SECONDS: i64 = 7 * 86_400;

/// A half-open time window `[start, end)`.
///
/// A record belongs to the window iff `start <= replication_key < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    /// Create a window; `start` must precede `end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::config(format!(
                "invalid sync window: start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Window duration in whole seconds
    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    /// Check membership under half-open semantics
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Split into `n` contiguous sub-windows that tile this window exactly.
    ///
    /// Boundary `i` sits at `start + duration * i / n`, so the union of the
    /// sub-windows reconstructs `[start, end)` with no gap or overlap even
    /// when the duration doesn't divide evenly.
    pub fn split(&self, n: u32) -> Vec<SyncWindow> {
        debug_assert!(n >= 1);
        let total = self.duration_seconds();
        let n = i64::from(n.max(1));

        (0..n)
            .map(|i| SyncWindow {
                start: self.start + Duration::seconds(total * i / n),
                end: self.start + Duration::seconds(total * (i + 1) / n),
            })
            .filter(|w| w.start < w.end)
            .collect()
    }
}

/// Decompose `[start, until + 7 days]` into consecutive 7-day windows.
///
/// The extra week past `until` absorbs near-future-dated records. The last
/// boundary never exceeds `until + 7 days`; any remainder beyond it is
/// picked up by the next run from the bookmark.
pub fn weekly_windows(start: DateTime<Utc>, until: DateTime<Utc>) -> Vec<SyncWindow> {
    let horizon = until + Duration::seconds(WEEK_SECONDS);
    let mut windows = Vec::new();
    let mut cursor = start;

    loop {
        let next = cursor + Duration::seconds(WEEK_SECONDS);
        if next > horizon {
            break;
        }
        windows.push(SyncWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }

    windows
}

/// Parse a replication-key timestamp as returned by the API.
///
/// The service emits `2021-03-05T10:15:30.000+0000`; bookmarks are stored
/// as `2021-03-05T10:15:30Z`. Both must round-trip.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for format in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
