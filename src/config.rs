//! Tap configuration
//!
//! Deserialized from a JSON config file. Required fields mirror what the
//! credential provider and engine need; everything else has defaults.

use crate::error::{Error, Result};
use crate::types::{parse_timestamp, TableSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default ceiling on remote daily quota usage, in percent.
pub const DEFAULT_QUOTA_PERCENT_TOTAL: f64 = 80.0;

/// Default ceiling on this run's share of the remote quota, in percent.
pub const DEFAULT_QUOTA_PERCENT_PER_RUN: f64 = 25.0;

/// A custom object to extract in addition to the built-in catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomObject {
    /// API name of the object (e.g. `Invoice__c`)
    #[serde(rename = "objectName")]
    pub object_name: String,
}

/// Top-level tap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// OAuth2 refresh token
    pub refresh_token: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Initial sync start date (ISO-8601), used when no bookmark exists
    pub start_date: String,

    /// Authenticate against the sandbox login endpoint
    #[serde(default)]
    pub is_sandbox: bool,

    /// Include the advanced table set in the catalog
    #[serde(default)]
    pub advanced_features_enabled: bool,

    /// Extra custom objects to extract
    #[serde(default)]
    pub custom_objects: Vec<CustomObject>,

    /// Per-tenant extra tables, keyed by instance URL
    #[serde(default)]
    pub tenant_tables: HashMap<String, Vec<TableSpec>>,

    /// Abort when remote daily quota usage exceeds this percent
    #[serde(default = "default_quota_total")]
    pub quota_percent_total: f64,

    /// Abort when this run's requests exceed this percent of remote capacity
    #[serde(default = "default_quota_per_run")]
    pub quota_percent_per_run: f64,
}

fn default_quota_total() -> f64 {
    DEFAULT_QUOTA_PERCENT_TOTAL
}

fn default_quota_per_run() -> f64 {
    DEFAULT_QUOTA_PERCENT_PER_RUN
}

impl TapConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TapConfig = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate required fields and the start date
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("refresh_token", &self.refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("start_date", &self.start_date),
        ] {
            if value.is_empty() {
                return Err(Error::missing_field(field));
            }
        }
        self.parsed_start_date()?;
        Ok(())
    }

    /// The configured start date as a UTC timestamp
    pub fn parsed_start_date(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.start_date).ok_or_else(|| {
            Error::config(format!(
                "start_date '{}' is not a valid ISO-8601 timestamp",
                self.start_date
            ))
        })
    }

    /// Extra tables configured for a specific tenant instance
    pub fn tables_for_tenant(&self, instance_url: &str) -> &[TableSpec] {
        self.tenant_tables
            .get(instance_url)
            .map_or(&[], Vec::as_slice)
    }
}
