//! HTTP layer
//!
//! Bearer-authenticated API client with bounded retry, client-side rate
//! limiting, and request-quota governance.

mod client;
mod quota;
mod rate_limit;

pub use client::{ApiClient, ApiClientConfig};
pub use quota::{QuotaConfig, QuotaGovernor, LIMIT_INFO_HEADER};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
