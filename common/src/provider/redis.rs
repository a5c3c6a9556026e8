// Redis acquirer: RDB snapshot through redis-cli

use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig, RedisConfig};
use crate::process::{run, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument};

pub struct RedisAcquirer;

#[async_trait]
impl Acquirer for RedisAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Redis(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let name = format!("{}.rdb", job.id);
        let dest = run_ctx.temp_dir.join(&name);

        let spec = dump_spec(cfg, &dest);
        info!(host = %cfg.host, port = cfg.port, "Running redis-cli --rdb");
        super::cleanup_on_error(run(&spec, step).await, &dest).await?;

        let artifact = Artifact::describe(&dest, name, "application/x-redis-dump").await?;
        info!(size = artifact.size, "Redis snapshot complete");
        Ok(artifact)
    }
}

fn dump_spec(cfg: &RedisConfig, dest: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("redis-cli")
        .args(["-h", &cfg.host])
        .args(["-p".to_string(), cfg.port.to_string()]);
    if !cfg.password.is_empty() {
        // REDISCLI_AUTH keeps the password off the command line.
        spec = spec.env("REDISCLI_AUTH", &cfg.password);
    }
    if cfg.tls {
        spec = spec.arg("--tls");
    }
    spec.args(["--rdb".to_string(), dest.display().to_string()])
}
