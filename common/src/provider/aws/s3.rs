// S3 acquirer: single object passes through, a prefix becomes a zip
// preserving relative paths

use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::AcquireError;
use crate::models::{AwsS3Config, Job, ProviderConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use futures::StreamExt;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::io::Write;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub struct S3Acquirer;

#[async_trait]
impl Acquirer for S3Acquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::AwsS3(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let bucket = open_bucket(cfg)?;

        let listings = bucket
            .list(cfg.path.clone(), None)
            .await
            .map_err(|e| AcquireError::Request(format!("failed to list objects: {}", e)))?;
        let keys: Vec<String> = listings
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.key)
            .collect();

        if keys.is_empty() {
            return Err(AcquireError::NotFound(format!(
                "no objects under {}",
                cfg.path
            )));
        }

        let is_prefix = cfg.path.ends_with('/');
        if keys.len() == 1 && keys[0] == cfg.path && !is_prefix {
            self.single_object(&bucket, cfg, &keys[0], job, run_ctx, step)
                .await
        } else {
            self.prefix_to_zip(&bucket, cfg, &keys, job, run_ctx, step)
                .await
        }
    }
}

impl S3Acquirer {
    async fn single_object(
        &self,
        bucket: &Bucket,
        cfg: &AwsS3Config,
        key: &str,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let base = super::super::transfer::remote_basename(key);
        let name = format!("{}-{}", job.id, base);
        let dest = run_ctx.temp_dir.join(&name);

        info!(bucket = %cfg.bucket, key, "Downloading object");

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut stream = bucket
            .get_object_stream(key)
            .await
            .map_err(|e| AcquireError::Request(format!("failed to get {}: {}", key, e)))?;

        loop {
            let chunk = tokio::select! {
                chunk = stream.bytes().next() => chunk,
                _ = step.cancel.cancelled() => return Err(AcquireError::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| AcquireError::Request(format!("failed to read {}: {}", key, e)))?;
            file.write_all(&chunk).await?;
            step.heartbeat.beat();
        }
        file.flush().await?;

        let artifact = Artifact::describe(&dest, base, OCTET_STREAM).await?;
        info!(size = artifact.size, "Object downloaded");
        Ok(artifact)
    }

    async fn prefix_to_zip(
        &self,
        bucket: &Bucket,
        cfg: &AwsS3Config,
        keys: &[String],
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let name = format!("{}.zip", job.id);
        let dest = run_ctx.temp_dir.join(&name);

        info!(bucket = %cfg.bucket, prefix = %cfg.path, objects = keys.len(), "Packing prefix into zip");

        let out = std::fs::File::create(&dest)
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;
        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for key in keys {
            // Directory placeholders carry no bytes.
            if key.ends_with('/') {
                continue;
            }
            if step.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }

            let entry = entry_name(&cfg.path, key);
            zip.start_file(entry, options)
                .map_err(|e| AcquireError::Io(format!("failed to open zip entry: {}", e)))?;

            let mut stream = bucket
                .get_object_stream(key)
                .await
                .map_err(|e| AcquireError::Request(format!("failed to get {}: {}", key, e)))?;
            while let Some(chunk) = stream.bytes().next().await {
                let chunk = chunk.map_err(|e| AcquireError::Request(format!("failed to read {}: {}", key, e)))?;
                zip.write_all(&chunk)
                    .map_err(|e| AcquireError::Io(format!("failed to write zip entry: {}", e)))?;
            }
            step.heartbeat.beat();
        }

        zip.finish()
            .map_err(|e| AcquireError::Io(format!("failed to finish zip: {}", e)))?;

        let artifact = Artifact::describe(&dest, name, "application/zip").await?;
        info!(size = artifact.size, "Prefix packed");
        Ok(artifact)
    }
}

fn open_bucket(cfg: &AwsS3Config) -> Result<Box<Bucket>, AcquireError> {
    let credentials = if cfg.access_key_id.is_empty() {
        // Fall back to the ambient chain (env, profile, instance role).
        Credentials::default()
    } else {
        Credentials::new(
            Some(&cfg.access_key_id),
            Some(&cfg.secret_access_key),
            None,
            None,
            None,
        )
    }
    .map_err(|e| AcquireError::Auth(format!("failed to build credentials: {}", e)))?;

    let region = if cfg.endpoint.is_empty() {
        Region::Custom {
            region: cfg.region.clone(),
            endpoint: format!("https://s3.{}.amazonaws.com", cfg.region),
        }
    } else {
        Region::Custom {
            region: if cfg.region.is_empty() {
                "us-east-1".to_string()
            } else {
                cfg.region.clone()
            },
            endpoint: cfg
                .endpoint
                .trim_start_matches("http://")
                .trim_start_matches("https://")
                .to_string(),
        }
    };

    let bucket = Bucket::new(&cfg.bucket, region, credentials)
        .map_err(|e| AcquireError::Request(format!("failed to open bucket: {}", e)))?
        .with_path_style();
    Ok(bucket)
}

/// Zip entry path for a key: relative to the configured prefix, basename as
/// a fallback for keys that escape it.
fn entry_name(prefix: &str, key: &str) -> String {
    match key.strip_prefix(prefix) {
        Some(rel) if !rel.is_empty() && !rel.contains("..") => rel.to_string(),
        _ => Path::new(key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_is_prefix_relative() {
        assert_eq!(entry_name("data/", "data/a.txt"), "a.txt");
        assert_eq!(entry_name("data/", "data/sub/b.txt"), "sub/b.txt");
        // Keys outside the prefix collapse to their basename.
        assert_eq!(entry_name("data/", "other/c.txt"), "c.txt");
    }

    #[test]
    fn test_custom_endpoint_strips_scheme() {
        let cfg = AwsS3Config {
            region: String::new(),
            bucket: "backups".to_string(),
            path: "data/".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
            endpoint: "http://minio.internal:9000".to_string(),
        };
        let bucket = open_bucket(&cfg).unwrap();
        assert!(bucket.host().contains("minio.internal:9000"));
    }
}
