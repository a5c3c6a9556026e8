// SFTP acquirer: key- or password-authenticated download over SSH

use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig, TransferConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const IO_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SftpAcquirer;

#[async_trait]
impl Acquirer for SftpAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Transfer(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let name = super::transfer::remote_basename(&cfg.path);
        let dest = run_ctx.temp_dir.join(format!("{}-{}", job.id, name));

        info!(host = %cfg.host, path = %cfg.path, "Starting SFTP download");

        let cfg = cfg.clone();
        let dest_clone = dest.clone();
        let cancel = step.cancel.clone();
        let heartbeat = step.heartbeat.clone();
        let result = tokio::task::spawn_blocking(move || {
            download(&cfg, &dest_clone, &cancel, move || heartbeat.beat())
        })
        .await
        .map_err(|e| AcquireError::Io(format!("sftp task failed: {}", e)))
        .and_then(|r| r);
        super::cleanup_on_error(result, &dest).await?;

        let artifact = Artifact::describe(&dest, name, OCTET_STREAM).await?;
        info!(size = artifact.size, "SFTP download complete");
        Ok(artifact)
    }
}

fn download(
    cfg: &TransferConfig,
    dest: &PathBuf,
    cancel: &CancellationToken,
    beat: impl Fn(),
) -> Result<(), AcquireError> {
    let session = connect(cfg)?;

    let sftp = session
        .sftp()
        .map_err(|e| AcquireError::Protocol(format!("failed to open sftp channel: {}", e)))?;

    let mut remote = sftp.open(Path::new(&cfg.path)).map_err(|e| {
        AcquireError::NotFound(format!("failed to open remote {}: {}", cfg.path, e))
    })?;

    let mut local = std::fs::File::create(dest)
        .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

    let mut buf = vec![0u8; 32 * 1024];
    loop {
        if cancel.is_cancelled() {
            drop(local);
            let _ = std::fs::remove_file(dest);
            return Err(AcquireError::Cancelled);
        }
        let n = remote
            .read(&mut buf)
            .map_err(|e| AcquireError::Io(format!("sftp read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        local
            .write_all(&buf[..n])
            .map_err(|e| AcquireError::Io(format!("failed to write {}: {}", dest.display(), e)))?;
        beat();
    }
    local
        .flush()
        .map_err(|e| AcquireError::Io(e.to_string()))?;
    Ok(())
}

fn connect(cfg: &TransferConfig) -> Result<Session, AcquireError> {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let tcp = TcpStream::connect(&addr)
        .map_err(|e| AcquireError::Connect(format!("failed to connect to {}: {}", addr, e)))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))
        .map_err(|e| AcquireError::Connect(e.to_string()))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))
        .map_err(|e| AcquireError::Connect(e.to_string()))?;

    let mut session = Session::new()
        .map_err(|e| AcquireError::Connect(format!("failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| AcquireError::Connect(format!("SSH handshake failed: {}", e)))?;

    authenticate(&session, cfg)?;

    if !session.authenticated() {
        return Err(AcquireError::Auth("session not authenticated".to_string()));
    }

    debug!(host = %cfg.host, "SFTP session established");
    Ok(session)
}

fn authenticate(session: &Session, cfg: &TransferConfig) -> Result<(), AcquireError> {
    if !cfg.private_key.is_empty() {
        let passphrase = if cfg.passphrase.is_empty() {
            None
        } else {
            Some(cfg.passphrase.as_str())
        };
        session
            .userauth_pubkey_memory(&cfg.username, None, &cfg.private_key, passphrase)
            .map_err(|e| {
                AcquireError::Auth(format!(
                    "key authentication failed for {}: {}",
                    cfg.username, e
                ))
            })
    } else {
        session
            .userauth_password(&cfg.username, &cfg.password)
            .map_err(|e| {
                AcquireError::Auth(format!(
                    "password authentication failed for {}: {}",
                    cfg.username, e
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_a_connect_error() {
        let cfg = TransferConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port that nothing listens on.
            port: 1,
            username: "backup".to_string(),
            password: "secret".to_string(),
            path: "/srv/dump.tar".to_string(),
            private_key: String::new(),
            passphrase: String::new(),
        };

        let dest = std::env::temp_dir().join("sftp-test-unreachable");
        let cancel = CancellationToken::new();
        let err = tokio::task::spawn_blocking(move || download(&cfg, &dest, &cancel, || {}))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, AcquireError::Connect(_)));
    }
}
