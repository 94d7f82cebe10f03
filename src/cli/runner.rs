//! Wires configuration into a full sync run

use super::Cli;
use crate::auth::CredentialProvider;
use crate::catalog;
use crate::config::TapConfig;
use crate::engine::{EngineConfig, SyncEngine, SyncStats};
use crate::error::Result;
use crate::http::{ApiClient, ApiClientConfig, QuotaConfig, QuotaGovernor};
use crate::output::MessageWriter;
use crate::state::StateManager;
use std::sync::Arc;
use tracing::info;

/// Run one extraction pass as configured
pub async fn run(cli: &Cli) -> Result<SyncStats> {
    let config = TapConfig::from_file(&cli.config)?;

    let provider = CredentialProvider::new(
        &config.refresh_token,
        &config.client_id,
        &config.client_secret,
        config.is_sandbox,
    );
    let quota = QuotaGovernor::new(QuotaConfig::new(
        config.quota_percent_total,
        config.quota_percent_per_run,
    ));
    let client = Arc::new(ApiClient::new(
        provider,
        quota,
        ApiClientConfig::default(),
    )?);

    let instance_url = client.instance_url().await?;
    info!(%instance_url, "authenticated");

    let mut tables = catalog::build_catalog(&config, &instance_url);
    if let Some(only) = cli.table.as_deref() {
        tables.retain(|t| t.name == only);
    }
    let discovered = catalog::discover(&client, tables).await?;
    info!(tables = discovered.len(), "catalog discovered");

    let state = match &cli.state {
        Some(path) => StateManager::from_file(path)?,
        None => StateManager::in_memory(),
    };

    let engine = SyncEngine::new(
        client,
        state,
        MessageWriter::stdout(),
        config.parsed_start_date()?,
        EngineConfig::default(),
    );
    engine.sync_all(&discovered).await
}
