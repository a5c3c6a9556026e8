// Provider registry: maps each tag to the acquirer that turns a configured
// source into an artifact on local disk

pub mod aws;
pub mod database;
pub mod git;
pub mod http;
pub mod mail;
pub mod redis;
pub mod script;
pub mod sftp;
pub mod transfer;
pub mod webdav;

use crate::artifact::Artifact;
use crate::errors::{AcquireError, ValidationError};
use crate::models::{Job, Provider};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;

/// An acquirer downloads, dumps or exports one provider's data into the run
/// temp directory and hands the resulting file to the pipeline.
///
/// Contract: the artifact's logical name is deterministic given `job.id`, so
/// a replayed acquisition overwrites its own earlier bytes; cancellation is
/// propagated into any child process or long-running walk.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(
        &self,
        job: &Job,
        run: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError>;
}

/// Resolve the acquirer for a provider tag. The set is closed at build time.
pub fn acquirer_for(provider: Provider) -> Box<dyn Acquirer> {
    match provider {
        Provider::Http => Box::new(http::HttpAcquirer),
        Provider::Ftp | Provider::Ftps => Box::new(transfer::FtpAcquirer),
        Provider::Sftp => Box::new(sftp::SftpAcquirer),
        Provider::Webdav => Box::new(webdav::WebdavAcquirer),
        Provider::Git => Box::new(git::GitAcquirer),
        Provider::Mysql => Box::new(database::mysql::MysqlAcquirer),
        Provider::Postgres => Box::new(database::postgres::PostgresAcquirer),
        Provider::Mssql => Box::new(database::mssql::MssqlAcquirer),
        Provider::Redis => Box::new(redis::RedisAcquirer),
        Provider::AwsS3 => Box::new(aws::s3::S3Acquirer),
        Provider::AwsDynamoDb => Box::new(aws::dynamodb::DynamoDbAcquirer),
        Provider::Imap | Provider::Gmail => Box::new(mail::MailAcquirer),
        Provider::Script => Box::new(script::ScriptAcquirer),
    }
}

/// Validate the job's config and run its acquirer.
pub async fn acquire(
    job: &Job,
    run: &RunContext,
    step: &StepContext,
) -> Result<Artifact, AcquireError> {
    job.config.validate(job.provider)?;
    acquirer_for(job.provider).acquire(job, run, step).await
}

/// Raised when a job's config variant does not match its provider tag; only
/// reachable if a config bypassed [`crate::models::ProviderConfig::from_value`].
pub(crate) fn config_mismatch(provider: Provider) -> AcquireError {
    AcquireError::Config(ValidationError::InvalidConfig(format!(
        "job config does not match provider {}",
        provider
    )))
}

/// Remove a partially written destination when acquisition fails, so a
/// cancelled or broken run leaves nothing behind under the job's prefix.
pub(crate) async fn cleanup_on_error<T>(
    result: Result<T, AcquireError>,
    path: &std::path::Path,
) -> Result<T, AcquireError> {
    if result.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}
