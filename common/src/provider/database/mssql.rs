// SQL Server acquirer: BACKUP DATABASE through sqlcmd, packed into tar.gz

use crate::archive::tar_gz_dir;
use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{Job, MssqlConfig, ProviderConfig};
use crate::process::{run, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument};

pub struct MssqlAcquirer;

#[async_trait]
impl Acquirer for MssqlAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Mssql(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let scratch = tempfile::tempdir()
            .map_err(|e| AcquireError::Io(format!("failed to create scratch dir: {}", e)))?;
        let bak_name = format!("backup-{}.bak", job.id);
        let bak_path = scratch.path().join(&bak_name);

        let spec = backup_spec(cfg, &bak_path);
        info!(host = %cfg.host, database = %cfg.database, "Running sqlcmd BACKUP DATABASE");
        run(&spec, step).await?;

        if !bak_path.exists() {
            return Err(AcquireError::Io(format!(
                "sqlcmd reported success but {} was not written",
                bak_path.display()
            )));
        }

        let name = format!("{}.tar.gz", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let src = scratch.path().to_path_buf();
        let dst = dest.clone();
        let packed = tokio::task::spawn_blocking(move || tar_gz_dir(&src, &dst))
            .await
            .map_err(|e| AcquireError::Io(format!("archive task failed: {}", e)))
            .and_then(|r| {
                r.map_err(|e| AcquireError::Io(format!("failed to pack backup set: {}", e)))
            });
        crate::provider::cleanup_on_error(packed, &dest).await?;

        let artifact = Artifact::describe(&dest, name, "application/gzip").await?;
        info!(size = artifact.size, "SQL Server backup complete");
        Ok(artifact)
    }
}

fn backup_spec(cfg: &MssqlConfig, bak_path: &Path) -> CommandSpec {
    let query = format!(
        "BACKUP DATABASE [{}] TO DISK = N'{}' WITH NOFORMAT, NOINIT, NAME = N'full-backup', SKIP, NOREWIND, NOUNLOAD, STATS = 10",
        cfg.database,
        bak_path.display()
    );

    let mut spec = CommandSpec::new("sqlcmd")
        .args(["-S".to_string(), format!("{},{}", cfg.host, cfg.port)])
        .args(["-d", &cfg.database])
        .args(["-U", &cfg.username])
        .args(["-P", &cfg.password])
        .args(["-b".to_string(), "-Q".to_string(), query]);

    if cfg.encrypt {
        spec = spec.arg("-N");
    }
    if cfg.trust_cert {
        spec = spec.arg("-C");
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg() -> MssqlConfig {
        MssqlConfig {
            host: "sql.internal".to_string(),
            port: 1433,
            database: "orders".to_string(),
            username: "sa".to_string(),
            password: "secret".to_string(),
            encrypt: false,
            trust_cert: false,
        }
    }

    #[test]
    fn test_backup_command_shape() {
        let spec = backup_spec(&cfg(), &PathBuf::from("/tmp/backup-j1.bak"));
        assert_eq!(spec.program, "sqlcmd");
        assert!(spec.args.windows(2).any(|w| w == ["-S", "sql.internal,1433"]));
        let query = spec.args.last().unwrap();
        assert!(query.starts_with("BACKUP DATABASE [orders]"));
        assert!(query.contains("/tmp/backup-j1.bak"));
    }

    #[test]
    fn test_tls_flags() {
        let config = MssqlConfig {
            encrypt: true,
            trust_cert: true,
            ..cfg()
        };
        let spec = backup_spec(&config, &PathBuf::from("/tmp/b.bak"));
        assert!(spec.args.contains(&"-N".to_string()));
        assert!(spec.args.contains(&"-C".to_string()));
    }
}
