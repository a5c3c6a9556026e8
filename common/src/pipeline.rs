// Pipeline orchestrator: drives one backup run end to end
// resolve -> request -> acquire -> compress -> encrypt -> grant -> upload
// -> confirm, deleting each superseded artifact along the way.

use crate::artifact::Artifact;
use crate::catalog::JobCatalog;
use crate::control_plane::ControlPlaneClient;
use crate::errors::{Classify, ErrorClass, PipelineError, UploadError};
use crate::models::{FileMeta, Job, RunRequest, UploadGrant};
use crate::retry::{run_with_backoff, BackoffPolicy};
use crate::runtime::{RunContext, StepContext};
use crate::transform::{compress, encrypt};
use crate::{provider, uploader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Orchestrates backup runs against the immutable job catalog.
pub struct BackupPipeline {
    catalog: Arc<JobCatalog>,
    control_plane: ControlPlaneClient,
    temp_dir: PathBuf,
    policy: BackoffPolicy,
}

impl BackupPipeline {
    pub fn new(
        catalog: Arc<JobCatalog>,
        control_plane: ControlPlaneClient,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            control_plane,
            temp_dir: temp_dir.into(),
            policy: BackoffPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute one run request to completion.
    ///
    /// Each step retries under the backoff policy; terminal errors and
    /// cancellation stop immediately. On failure the service hears
    /// `confirm(false)` once (best-effort, never masking the original error)
    /// and the current artifact is deleted. Cancellation skips the confirm.
    #[instrument(skip(self, step), fields(job_id = %request.job_id, run_id = %request.run_id))]
    pub async fn run(&self, request: &RunRequest, step: &StepContext) -> Result<(), PipelineError> {
        info!("Backup run started");

        // Resolution is in-process and never retried.
        let job = self.catalog.resolve(&request.job_id)?.clone();

        if step.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let ticket = run_with_backoff(&self.policy, &step.cancel, "request", || {
            self.control_plane.request(&request.job_id, &request.run_id)
        })
        .await?;
        let backup_id = ticket.backup_id.to_string();

        match self.execute(&job, &backup_id, step).await {
            Ok(()) => {
                info!(backup_id = %backup_id, "Backup run complete");
                Ok(())
            }
            Err(err) if err.class() == ErrorClass::Cancelled => {
                info!(backup_id = %backup_id, "Backup run cancelled");
                Err(err)
            }
            Err(err) => {
                error!(backup_id = %backup_id, error = %err, "Backup run failed");
                self.confirm_failure(&job.id, &backup_id).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job: &Job,
        backup_id: &str,
        step: &StepContext,
    ) -> Result<(), PipelineError> {
        let run_ctx = RunContext::new(&self.temp_dir);

        if step.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let acquired = run_with_backoff(&self.policy, &step.cancel, "acquire", || {
            provider::acquire(job, &run_ctx, step)
        })
        .await?;

        let result = self
            .transform_and_upload(job, backup_id, acquired, step)
            .await;

        if let Err((artifact, err)) = result {
            remove_quietly(&artifact.path).await;
            return Err(err);
        }
        Ok(())
    }

    /// Runs every stage that owns an artifact; on error returns the artifact
    /// owned at the point of failure so the caller can release it.
    async fn transform_and_upload(
        &self,
        job: &Job,
        backup_id: &str,
        acquired: Artifact,
        step: &StepContext,
    ) -> Result<(), (Artifact, PipelineError)> {
        let mut current = acquired;

        if job.compression.enabled {
            current = self.apply_transform(current, step, "compress", |artifact| {
                let level = job.compression.level;
                async move { compress::compress(artifact, level).await.map_err(Into::into) }
            })
            .await?;
        }

        if job.encryption.enabled {
            current = self.apply_transform(current, step, "encrypt", |artifact| {
                let key = job.encryption.key.clone();
                async move { encrypt::encrypt(artifact, &key).await.map_err(Into::into) }
            })
            .await?;
        }

        // Metadata handed to the service always describes the bytes being
        // uploaded, so it is taken from the post-transform artifact.
        let meta = FileMeta {
            size: current.size,
            checksum: current.checksum.clone(),
            name: current.name.clone(),
            mime_type: current.mime.clone(),
        };

        if step.is_cancelled() {
            return Err((current, PipelineError::Cancelled));
        }

        let grant = match run_with_backoff(&self.policy, &step.cancel, "upload_grant", || {
            self.control_plane.upload_grant(&job.id, backup_id, &meta)
        })
        .await
        {
            Ok(grant) => grant,
            Err(e) => return Err((current, e.into())),
        };

        if let Err(e) = self.upload_with_regrant(job, backup_id, &current, &meta, grant, step).await
        {
            return Err((current, e));
        }

        if let Err(e) = run_with_backoff(&self.policy, &step.cancel, "confirm", || {
            self.control_plane.confirm(&job.id, backup_id, true)
        })
        .await
        {
            return Err((current, e.into()));
        }

        // The run is acknowledged; nothing of it stays on disk.
        remove_quietly(&current.path).await;
        Ok(())
    }

    /// Run a transform stage under the retry policy; the input file is
    /// deleted as soon as the stage produces a different path.
    async fn apply_transform<F, Fut>(
        &self,
        input: Artifact,
        step: &StepContext,
        label: &str,
        f: F,
    ) -> Result<Artifact, (Artifact, PipelineError)>
    where
        F: Fn(Artifact) -> Fut,
        Fut: std::future::Future<Output = Result<Artifact, PipelineError>>,
    {
        if step.is_cancelled() {
            return Err((input, PipelineError::Cancelled));
        }

        let input_path = input.path.clone();
        let attempt = run_with_backoff(&self.policy, &step.cancel, label, || f(input.clone())).await;
        match attempt {
            Ok(output) => {
                if output.path != input_path {
                    remove_quietly(&input_path).await;
                }
                Ok(output)
            }
            Err(err) => {
                warn!(stage = label, error = %err, "Transform stage failed");
                Err((input, err))
            }
        }
    }

    /// Upload under the retry policy, fetching one fresh grant if the first
    /// one expired before the transfer started.
    async fn upload_with_regrant(
        &self,
        job: &Job,
        backup_id: &str,
        artifact: &Artifact,
        meta: &FileMeta,
        grant: UploadGrant,
        step: &StepContext,
    ) -> Result<(), PipelineError> {
        match self.try_upload(artifact, &grant, step).await {
            Err(PipelineError::Upload(UploadError::GrantExpired(expired_at))) => {
                warn!(expired_at = %expired_at, "Grant expired, requesting a fresh one");
                let fresh = run_with_backoff(&self.policy, &step.cancel, "upload_grant", || {
                    self.control_plane.upload_grant(&job.id, backup_id, meta)
                })
                .await?;
                self.try_upload(artifact, &fresh, step).await
            }
            other => other,
        }
    }

    async fn try_upload(
        &self,
        artifact: &Artifact,
        grant: &UploadGrant,
        step: &StepContext,
    ) -> Result<(), PipelineError> {
        run_with_backoff(&self.policy, &step.cancel, "upload", || {
            uploader::upload(artifact, grant, step)
        })
        .await
        .map_err(Into::into)
    }

    /// Best-effort failure report on a context that cannot be cancelled.
    async fn confirm_failure(&self, job_id: &str, backup_id: &str) {
        let control_plane = self.control_plane.clone();
        let job_id = job_id.to_string();
        let backup_id = backup_id.to_string();

        // Detached task: a cancellation racing the failure path must not be
        // able to abort the report.
        let report = tokio::spawn(async move {
            control_plane.confirm(&job_id, &backup_id, false).await
        });

        match report.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failure confirm did not go through"),
            Err(e) => warn!(error = %e, "Failure confirm task aborted"),
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove artifact file");
        }
    }
}
