// PostgreSQL acquirer: pg_dump with the connection string passed through

use super::SQL_MIME;
use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig};
use crate::process::{run_streaming, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use tracing::{info, instrument};

pub struct PostgresAcquirer;

#[async_trait]
impl Acquirer for PostgresAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Postgres(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let name = format!("{}.sql", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut spec = CommandSpec::new("pg_dump")
            .arg(&cfg.connection_string)
            .args(["--no-owner", "--no-acl"]);
        if cfg.schema_only {
            spec = spec.arg("--schema-only");
        }
        if cfg.data_only {
            spec = spec.arg("--data-only");
        }

        info!("Running pg_dump");
        crate::provider::cleanup_on_error(run_streaming(&spec, file, step).await, &dest).await?;

        let artifact = Artifact::describe(&dest, name, SQL_MIME).await?;
        info!(size = artifact.size, "PostgreSQL dump complete");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompressionConfig, EncryptionConfig, Provider};
    use serde_json::json;

    #[tokio::test]
    async fn test_dump_failure_surfaces_as_retryable_command_error() {
        use crate::errors::{Classify, ErrorClass};

        // An unresolvable host makes pg_dump exit non-zero (or the binary is
        // missing entirely); both classify as retryable.
        let job = Job {
            id: "jpg".to_string(),
            provider: Provider::Postgres,
            config: ProviderConfig::from_value(
                Provider::Postgres,
                json!({"connection_string": "postgresql://u@host.invalid:5432/db"}),
            )
            .unwrap(),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
        };
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new(dir.path());

        let err = PostgresAcquirer
            .acquire(&job, &run, &StepContext::detached())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retryable);
    }
}
