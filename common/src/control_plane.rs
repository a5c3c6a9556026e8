// Backup-service client: the three idempotent calls that frame every run
// (backup-request, upload-grant, backup-confirm)

use crate::auth::TokenCache;
use crate::errors::ControlPlaneError;
use crate::models::{BackupTicket, FileMeta, UploadGrant};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Per-call timeout; these are small JSON exchanges.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the workspace-scoped backup endpoints.
#[derive(Clone)]
pub struct ControlPlaneClient {
    api: String,
    workspace: String,
    tokens: TokenCache,
    client: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(
        api: impl Into<String>,
        workspace: impl Into<String>,
        tokens: TokenCache,
    ) -> Result<Self, ControlPlaneError> {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| {
                ControlPlaneError::Request(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            api: api.into(),
            workspace: workspace.into(),
            tokens,
            client,
        })
    }

    /// Open a backup for this run. `run_id` is the engine execution id and
    /// acts as the idempotency key: replays return the same ticket.
    #[instrument(skip(self), fields(workspace = %self.workspace))]
    pub async fn request(
        &self,
        job_id: &str,
        run_id: &str,
    ) -> Result<BackupTicket, ControlPlaneError> {
        let url = format!(
            "{}/v1/workspaces/{}/jobs/{}/request",
            self.api, self.workspace, job_id
        );
        let ticket: BackupTicket = self.post_json(&url, &json!({ "run_id": run_id })).await?;

        info!(backup_id = %ticket.backup_id, "Backup request accepted");
        Ok(ticket)
    }

    /// Announce the final artifact's metadata and receive a presigned upload
    /// URL. The metadata must describe the bytes that will actually be sent,
    /// recomputed after every transform.
    #[instrument(skip(self, meta), fields(workspace = %self.workspace, size = meta.size))]
    pub async fn upload_grant(
        &self,
        job_id: &str,
        backup_id: &str,
        meta: &FileMeta,
    ) -> Result<UploadGrant, ControlPlaneError> {
        let url = format!(
            "{}/v1/workspaces/{}/jobs/{}/backups/{}/upload",
            self.api, self.workspace, job_id, backup_id
        );
        let grant: UploadGrant = self.post_json(&url, meta).await?;

        info!(expires_at = %grant.expires_at, "Upload grant received");
        Ok(grant)
    }

    /// Acknowledge the outcome of the whole run.
    #[instrument(skip(self), fields(workspace = %self.workspace))]
    pub async fn confirm(
        &self,
        job_id: &str,
        backup_id: &str,
        status: bool,
    ) -> Result<(), ControlPlaneError> {
        let url = format!(
            "{}/v1/workspaces/{}/jobs/{}/backups/{}/confirm",
            self.api, self.workspace, job_id, backup_id
        );

        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| ControlPlaneError::Request(format!("token acquisition failed: {}", e)))?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "status": status }))
            .send()
            .await
            .map_err(|e| ControlPlaneError::Request(e.to_string()))?;

        let http_status = response.status();
        if !http_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::Status {
                status: http_status.as_u16(),
                body,
            });
        }

        info!(status, "Backup confirmed");
        Ok(())
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ControlPlaneError>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| ControlPlaneError::Request(format!("token acquisition failed: {}", e)))?;

        debug!(url, "Calling backup service");

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Request(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ControlPlaneError::Request(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ControlPlaneError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| ControlPlaneError::Decode(e.to_string()))
    }
}
