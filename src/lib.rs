//! # forcetap
//!
//! Incremental extraction tap for Salesforce-style REST APIs.
//!
//! The tap authenticates with an OAuth2 refresh token, discovers a table
//! catalog, and streams each table's records as line-delimited JSON,
//! filtered incrementally on a replication key and resumable from
//! persisted bookmarks. Queries too wide for the service's length
//! ceiling are split into field chunks and merged back on the primary
//! key; windows the service refuses to scan are shrunk recursively; a
//! quota governor aborts the run before it can exhaust the tenant's
//! shared daily request budget.
//!
//! ## Architecture
//!
//! - [`auth`] - OAuth2 refresh-token credential provider
//! - [`http`] - retrying API client, rate limiter and quota governor
//! - [`catalog`] - table catalog assembly and field discovery
//! - [`query`] - SOQL rendering and length-aware query planning
//! - [`paginate`] - cursor-following record streams
//! - [`merge`] - reassembly of field-chunked record streams
//! - [`state`] - bookmark persistence with atomic writes
//! - [`output`] - line-delimited RECORD/STATE message emission
//! - [`engine`] - the sync orchestrator tying it all together
//! - [`cli`] - command-line entry point

pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod merge;
pub mod output;
pub mod paginate;
pub mod query;
pub mod state;
pub mod types;

pub use config::TapConfig;
pub use engine::{EngineConfig, MergeStrategy, SyncEngine, SyncStats};
pub use error::{Error, Result};
pub use types::{DiscoveredTable, Record, SyncWindow, TableSpec};
