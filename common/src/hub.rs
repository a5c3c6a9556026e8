// Hub discovery: the control plane tells the agent where its work queue lives

use crate::auth::TokenCache;
use crate::errors::HubError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// Work-queue coordinates advertised by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Queue server address.
    pub server: String,
    /// Workspace this agent belongs to.
    pub workspace: String,
    /// Queue name the agent consumes from.
    pub queue: String,
    #[serde(default)]
    pub tls: HubTls,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubTls {
    #[serde(default)]
    pub enabled: bool,
}

/// Fetch the hub configuration; called once at startup after the first token
/// is available.
#[instrument(skip(tokens))]
pub async fn load_hub_config(api: &str, tokens: &TokenCache) -> Result<HubConfig, HubError> {
    let url = format!("{}/v1/agents/config/hub", api);
    let token = tokens.token().await?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| HubError::Request(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| HubError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HubError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let hub: HubConfig = response
        .json()
        .await
        .map_err(|e| HubError::Decode(e.to_string()))?;

    info!(
        server = %hub.server,
        workspace = %hub.workspace,
        queue = %hub.queue,
        tls = hub.tls.enabled,
        "Hub configuration loaded"
    );

    Ok(hub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_config_decodes_with_and_without_tls() {
        let hub: HubConfig = serde_json::from_value(serde_json::json!({
            "server": "queue.example.com:4222",
            "workspace": "ws-1",
            "queue": "agent-runs",
            "tls": {"enabled": true},
        }))
        .unwrap();
        assert!(hub.tls.enabled);

        let hub: HubConfig = serde_json::from_value(serde_json::json!({
            "server": "queue.example.com:4222",
            "workspace": "ws-1",
            "queue": "agent-runs",
        }))
        .unwrap();
        assert!(!hub.tls.enabled);
    }
}
