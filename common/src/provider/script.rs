// Script acquirer: run a configured command and capture its stdout

use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig};
use crate::process::{run_streaming, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument};

pub struct ScriptAcquirer;

#[async_trait]
impl Acquirer for ScriptAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Script(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let name = format!("{}.out", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut spec = CommandSpec::new(&cfg.command).args(cfg.args.iter().cloned());
        if !cfg.workdir.is_empty() {
            spec = spec.workdir(&cfg.workdir);
        }
        if let Some(timeout) = cfg.timeout {
            spec = spec.timeout(Duration::from_secs(timeout));
        }

        info!(command = %cfg.command, "Running backup script");
        super::cleanup_on_error(run_streaming(&spec, file, step).await, &dest).await?;

        let artifact = Artifact::describe(&dest, name, "application/octet-stream").await?;
        info!(size = artifact.size, "Script output captured");
        Ok(artifact)
    }
}
