// Bootstrap utilities for the agent binary

use crate::auth::TokenCache;
use crate::catalog::JobCatalog;
use crate::config::Settings;
use crate::control_plane::ControlPlaneClient;
use crate::hub::{self, HubConfig};
use crate::pipeline::BackupPipeline;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Load and validate settings, failing fast on anything that would only
/// surface mid-run.
pub fn load_settings(path: Option<&str>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from_path(path),
        None => Settings::load(),
    }
    .context("failed to load configuration")?;

    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    Ok(settings)
}

/// Ensure the temp root exists before any acquirer needs it.
pub async fn init_temp_dir(settings: &Settings) -> Result<()> {
    let path = Path::new(&settings.temp_dir);
    if !path.exists() {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create temp dir {}", settings.temp_dir))?;
        info!(path = %settings.temp_dir, "Created temp directory");
    }
    Ok(())
}

/// Build the job catalog from the typed job list.
pub fn init_catalog(settings: &Settings) -> Result<Arc<JobCatalog>> {
    let jobs = settings
        .typed_jobs()
        .map_err(|e| anyhow::anyhow!("invalid job configuration: {}", e))?;
    let catalog =
        JobCatalog::new(jobs).map_err(|e| anyhow::anyhow!("invalid job catalog: {}", e))?;
    Ok(Arc::new(catalog))
}

/// Token cache shared by every outbound call.
pub fn init_token_cache(settings: &Settings) -> Result<TokenCache> {
    TokenCache::new(settings.auth.clone())
        .map_err(|e| anyhow::anyhow!("failed to initialize token cache: {}", e))
}

/// Discover the hub; requires a working token.
pub async fn init_hub(settings: &Settings, tokens: &TokenCache) -> Result<HubConfig> {
    hub::load_hub_config(&settings.api, tokens)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load hub config: {}", e))
}

/// Assemble the pipeline with its control-plane client.
pub fn init_pipeline(
    settings: &Settings,
    hub: &HubConfig,
    tokens: TokenCache,
    catalog: Arc<JobCatalog>,
) -> Result<Arc<BackupPipeline>> {
    let control_plane = ControlPlaneClient::new(&settings.api, &hub.workspace, tokens)
        .map_err(|e| anyhow::anyhow!("failed to build control-plane client: {}", e))?;
    Ok(Arc::new(BackupPipeline::new(
        catalog,
        control_plane,
        &settings.temp_dir,
    )))
}
