//! Query planning
//!
//! Builds filtered, ordered, size-bounded SOQL queries from a table spec
//! and a time window, splitting wide select-lists into field chunks when
//! the rendered query exceeds the length ceiling.

mod planner;

pub use planner::{plan, render_query, QueryPlan, FIELD_CHUNK_BUDGET, MAX_QUERY_LENGTH};
