// FTP / FTPS acquirer: single-file transfer through curl

use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::AcquireError;
use crate::models::{Job, Provider, ProviderConfig, TransferConfig};
use crate::process::{run, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use tracing::{info, instrument};

pub struct FtpAcquirer;

#[async_trait]
impl Acquirer for FtpAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id, provider = %job.provider))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Transfer(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let name = remote_basename(&cfg.path);
        let dest = run_ctx.temp_dir.join(format!("{}-{}", job.id, name));

        let spec = curl_spec(cfg, job.provider, &dest.to_string_lossy());
        info!(host = %cfg.host, path = %cfg.path, "Starting transfer");
        super::cleanup_on_error(run(&spec, step).await, &dest).await?;

        let artifact = Artifact::describe(&dest, name, OCTET_STREAM).await?;
        info!(size = artifact.size, "Transfer complete");
        Ok(artifact)
    }
}

fn curl_spec(cfg: &TransferConfig, provider: Provider, dest: &str) -> CommandSpec {
    let scheme = match provider {
        Provider::Ftps => "ftps",
        _ => "ftp",
    };
    let url = format!(
        "{}://{}:{}/{}",
        scheme,
        cfg.host,
        cfg.port,
        cfg.path.trim_start_matches('/')
    );

    let mut spec = CommandSpec::new("curl")
        .args(["-s", "-S", "--fail", "-o", dest])
        .arg("-u")
        .arg(format!("{}:{}", cfg.username, cfg.password));

    if provider == Provider::Ftps {
        spec = spec.args(["--ssl-reqd", "-k"]);
    }

    spec.arg(url)
}

/// Last path component of the remote path; replays land on the same name.
pub(crate) fn remote_basename(path: &str) -> String {
    let base = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if base.is_empty() {
        "download".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TransferConfig {
        TransferConfig {
            host: "files.example.com".to_string(),
            port: 21,
            username: "backup".to_string(),
            password: "secret".to_string(),
            path: "/exports/latest.tar".to_string(),
            private_key: String::new(),
            passphrase: String::new(),
        }
    }

    #[test]
    fn test_remote_basename() {
        assert_eq!(remote_basename("/exports/latest.tar"), "latest.tar");
        assert_eq!(remote_basename("latest.tar"), "latest.tar");
        assert_eq!(remote_basename("/"), "download");
    }

    #[test]
    fn test_ftp_command_shape() {
        let spec = curl_spec(&cfg(), Provider::Ftp, "/tmp/out");
        assert_eq!(spec.program, "curl");
        assert!(spec
            .args
            .contains(&"ftp://files.example.com:21/exports/latest.tar".to_string()));
        assert!(!spec.args.contains(&"--ssl-reqd".to_string()));
    }

    #[test]
    fn test_ftps_requires_tls() {
        let spec = curl_spec(&cfg(), Provider::Ftps, "/tmp/out");
        assert!(spec
            .args
            .contains(&"ftps://files.example.com:21/exports/latest.tar".to_string()));
        assert!(spec.args.contains(&"--ssl-reqd".to_string()));
    }
}
