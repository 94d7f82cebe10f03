//! Request-quota governance
//!
//! The remote service meters a shared daily request budget and reports
//! usage on every response as `api-usage=used/total`. The governor tracks
//! that remote usage plus this run's own request count, and vetoes the
//! next request once either ceiling is crossed. It fails closed: a crossed
//! threshold aborts the run rather than guessing. Usage is never persisted
//! across runs; the remote service tracks the daily budget itself.

use crate::config::{DEFAULT_QUOTA_PERCENT_PER_RUN, DEFAULT_QUOTA_PERCENT_TOTAL};
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Response header carrying remote quota usage.
pub const LIMIT_INFO_HEADER: &str = "Sforce-Limit-Info";

/// Usage gauge log entries are sampled at most this often.
const GAUGE_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Ceilings enforced by the governor
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Abort when remote daily usage exceeds this percent of total capacity
    pub percent_total: f64,
    /// Abort when this run's requests exceed this percent of total capacity
    pub percent_per_run: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            percent_total: DEFAULT_QUOTA_PERCENT_TOTAL,
            percent_per_run: DEFAULT_QUOTA_PERCENT_PER_RUN,
        }
    }
}

impl QuotaConfig {
    /// Create a config with explicit ceilings
    pub fn new(percent_total: f64, percent_per_run: f64) -> Self {
        Self {
            percent_total,
            percent_per_run,
        }
    }
}

#[derive(Debug, Default)]
struct QuotaUsage {
    /// Requests issued by this run
    local_requests: u64,
    /// Last observed remote `(used, total)` capacity
    remote: Option<(u64, u64)>,
    /// Last time the usage gauge was logged
    last_gauge: Option<Instant>,
}

/// Tracks remote-reported usage and local request counts, vetoing further
/// requests once a ceiling is crossed.
#[derive(Debug)]
pub struct QuotaGovernor {
    config: QuotaConfig,
    usage: Mutex<QuotaUsage>,
    header_pattern: Regex,
}

impl QuotaGovernor {
    /// Create a governor with the given ceilings
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            usage: Mutex::new(QuotaUsage::default()),
            header_pattern: Regex::new(r"^api-usage=(\d+)/(\d+)$").expect("valid pattern"),
        }
    }

    /// Check whether the next request may be sent.
    ///
    /// Two independent ceilings, both advisory upper bounds:
    /// - remote daily usage must stay under `percent_total`, protecting the
    ///   shared budget across all consumers of the account;
    /// - this run's own request count as a percent of remote capacity must
    ///   stay under `percent_per_run`, protecting concurrent jobs from one
    ///   run starving them.
    pub fn admit(&self) -> Result<()> {
        let usage = self.usage.lock().expect("quota lock poisoned");

        let Some((used, total)) = usage.remote else {
            return Ok(());
        };
        if total == 0 {
            return Ok(());
        }

        let used_percent = (used as f64 / total as f64) * 100.0;
        if used_percent > self.config.percent_total {
            return Err(Error::quota_exceeded(format!(
                "daily quota usage {used_percent:.2}% is above the configured limit of {}% of total quota",
                self.config.percent_total
            )));
        }

        let run_percent = (usage.local_requests as f64 / total as f64) * 100.0;
        if run_percent > self.config.percent_per_run {
            return Err(Error::quota_exceeded(format!(
                "this execution has spent {run_percent:.2}% of total quota, aborting due to the configured per-run limit of {}%",
                self.config.percent_per_run
            )));
        }

        Ok(())
    }

    /// Record a completed request and the usage header it carried, if any.
    ///
    /// Never raises; threshold enforcement happens in [`admit`](Self::admit)
    /// before the next request is sent.
    pub fn record_usage(&self, header: Option<&str>) {
        let mut usage = self.usage.lock().expect("quota lock poisoned");
        usage.local_requests += 1;

        let Some((used, total)) = header.and_then(|h| self.parse_usage(h)) else {
            return;
        };
        usage.remote = Some((used, total));

        // Gauge the remote usage, sampled so pagination doesn't spam the log.
        let now = Instant::now();
        let due = usage
            .last_gauge
            .map_or(true, |last| now.duration_since(last) >= GAUGE_SAMPLE_INTERVAL);
        if due {
            usage.last_gauge = Some(now);
            let used_percent = (used as f64 / total as f64) * 100.0;
            tracing::info!("used {used_percent:.2}% of daily REST API quota");
        }
    }

    /// Requests issued by this run so far
    pub fn local_requests(&self) -> u64 {
        self.usage.lock().expect("quota lock poisoned").local_requests
    }

    fn parse_usage(&self, header: &str) -> Option<(u64, u64)> {
        let caps = self.header_pattern.captures(header.trim())?;
        let used = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        Some((used, total))
    }
}

impl Default for QuotaGovernor {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
