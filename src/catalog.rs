//! Table catalog
//!
//! Assembles the set of tables a run extracts: the built-in base set,
//! the advanced set when enabled, configured custom objects, and any
//! per-tenant extras. Discovery then resolves each table's field list
//! via the describe endpoint, dropping tables the tenant doesn't have.

use crate::config::TapConfig;
use crate::error::Result;
use crate::http::ApiClient;
use crate::types::{DiscoveredTable, FieldDescriptor, ResyncRule, TableSpec};
use tracing::{info, warn};

const PK: &str = "Id";
const RK: &str = "SystemModstamp";
const RK_CREATED: &str = "CreatedDate";

fn base_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("Account")
            .with_primary_key(PK)
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("Contact")
            .with_primary_key(PK)
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("Opportunity")
            .with_primary_key(PK)
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("User").with_replication_key(RK),
    ]
}

fn advanced_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("Lead")
            .with_primary_key(PK)
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("Campaign")
            .with_primary_key(PK)
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("OpportunityContactRole").with_replication_key(RK),
        TableSpec::new("CampaignMember")
            .with_replication_key(RK)
            .with_field_catalog()
            .with_resync(ResyncRule::Weekday(5)),
        TableSpec::new("Task")
            .with_replication_key(RK)
            .with_field_catalog()
            .with_weekly_rule(),
        TableSpec::new("Event")
            .with_replication_key(RK)
            .with_field_catalog(),
        TableSpec::new("RecordType").with_replication_key(RK),
        TableSpec::new("AccountHistory").with_replication_key(RK_CREATED),
        TableSpec::new("ContactHistory")
            .with_replication_key(RK_CREATED)
            .with_weekly_rule(),
        TableSpec::new("LeadHistory").with_replication_key(RK_CREATED),
        TableSpec::new("OpportunityFieldHistory").with_replication_key(RK_CREATED),
    ]
}

/// Build the ordered table list for one run.
///
/// Opportunity is the widest table in most tenants; it is moved to the
/// end so every other table makes progress before the slowest one runs.
pub fn build_catalog(config: &TapConfig, instance_url: &str) -> Vec<TableSpec> {
    let mut tables = base_tables();

    if config.advanced_features_enabled {
        tables.extend(advanced_tables());
    }

    for custom in &config.custom_objects {
        tables.push(
            TableSpec::new(custom.object_name.clone())
                .with_primary_key(PK)
                .with_replication_key(RK)
                .with_field_catalog(),
        );
    }

    tables.extend(config.tables_for_tenant(instance_url).iter().cloned());

    if let Some(index) = tables.iter().position(|t| t.name == "Opportunity") {
        let opportunity = tables.remove(index);
        tables.push(opportunity);
    }

    tables
}

/// Resolve each catalog table's field list via the describe endpoint.
///
/// Tables the tenant doesn't have (custom objects that were never
/// installed, advanced tables on a stripped-down edition) are logged
/// and dropped; everything else is fatal.
pub async fn discover(client: &ApiClient, tables: Vec<TableSpec>) -> Result<Vec<DiscoveredTable>> {
    let mut discovered = Vec::with_capacity(tables.len());

    for spec in tables {
        let body = match client.describe(&spec.name).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                warn!(table = %spec.name, "table not found on this tenant, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };

        let fields: Vec<FieldDescriptor> = body
            .get("fields")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        info!(table = %spec.name, fields = fields.len(), "discovered table");
        discovered.push(DiscoveredTable { spec, fields });
    }

    Ok(discovered)
}
