// WebDAV acquirer: authenticated GET for files, PROPFIND walk for collections

use crate::archive::tar_gz_dir;
use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig, WebdavConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

pub struct WebdavAcquirer;

#[async_trait]
impl Acquirer for WebdavAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Webdav(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let client = Client::builder()
            .timeout(cfg.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| AcquireError::Request(format!("failed to build HTTP client: {}", e)))?;

        let target = resolve_url(&cfg.url, &cfg.path);

        if target.ends_with('/') {
            self.acquire_collection(cfg, &client, &target, job, run_ctx, step)
                .await
        } else {
            self.acquire_file(cfg, &client, &target, job, run_ctx, step)
                .await
        }
    }
}

impl WebdavAcquirer {
    async fn acquire_file(
        &self,
        cfg: &WebdavConfig,
        client: &Client,
        target: &str,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let name = super::transfer::remote_basename(target);
        let dest = run_ctx.temp_dir.join(format!("{}-{}", job.id, name));

        info!(url = %target, "Downloading WebDAV resource");
        super::cleanup_on_error(fetch_to_file(cfg, client, target, &dest, step).await, &dest)
            .await?;

        let artifact = Artifact::describe(&dest, name, OCTET_STREAM).await?;
        info!(size = artifact.size, "WebDAV download complete");
        Ok(artifact)
    }

    /// Walk a collection with PROPFIND and pack everything reachable into a
    /// gzipped tarball.
    async fn acquire_collection(
        &self,
        cfg: &WebdavConfig,
        client: &Client,
        root: &str,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        info!(url = %root, "Walking WebDAV collection");

        let scratch = tempfile::tempdir()
            .map_err(|e| AcquireError::Io(format!("failed to create scratch dir: {}", e)))?;

        let mut pending = vec![root.to_string()];
        let mut files: u64 = 0;
        while let Some(collection) = pending.pop() {
            if step.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }

            let entries = propfind(cfg, client, &collection).await?;
            for href in entries {
                let entry_url = absolutize(root, &href);
                // PROPFIND echoes the collection itself; skip it.
                if entry_url.trim_end_matches('/') == collection.trim_end_matches('/') {
                    continue;
                }
                if entry_url.ends_with('/') {
                    pending.push(entry_url);
                    continue;
                }

                let rel = entry_url
                    .strip_prefix(root)
                    .map(str::to_string)
                    .unwrap_or_else(|| super::transfer::remote_basename(&entry_url));
                let local = scratch.path().join(&rel);
                if let Some(parent) = local.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        AcquireError::Io(format!("failed to create {}: {}", parent.display(), e))
                    })?;
                }

                debug!(url = %entry_url, "Fetching collection member");
                fetch_to_file(cfg, client, &entry_url, &local, step).await?;
                files += 1;
                step.heartbeat.beat();
            }
        }

        let name = format!("{}.tar.gz", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let src = scratch.path().to_path_buf();
        let dst = dest.clone();
        tokio::task::spawn_blocking(move || tar_gz_dir(&src, &dst))
            .await
            .map_err(|e| AcquireError::Io(format!("archive task failed: {}", e)))?
            .map_err(|e| AcquireError::Io(format!("failed to pack collection: {}", e)))?;

        let artifact = Artifact::describe(&dest, name, "application/gzip").await?;
        info!(files, size = artifact.size, "WebDAV collection packed");
        Ok(artifact)
    }
}

async fn fetch_to_file(
    cfg: &WebdavConfig,
    client: &Client,
    url: &str,
    dest: &Path,
    step: &StepContext,
) -> Result<(), AcquireError> {
    let response = client
        .get(url)
        .basic_auth(&cfg.username, Some(&cfg.password))
        .send()
        .await
        .map_err(|e| AcquireError::Request(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(AcquireError::NotFound(url.to_string()));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AcquireError::Auth(format!("{} rejected credentials", url)));
    }
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(AcquireError::HttpStatus {
            status: status.as_u16(),
            detail,
        });
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = step.cancel.cancelled() => return Err(AcquireError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| AcquireError::Request(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Depth-1 PROPFIND returning the raw hrefs from the multistatus body.
async fn propfind(
    cfg: &WebdavConfig,
    client: &Client,
    url: &str,
) -> Result<Vec<String>, AcquireError> {
    let method = Method::from_bytes(b"PROPFIND")
        .map_err(|e| AcquireError::Protocol(e.to_string()))?;

    let response = client
        .request(method, url)
        .basic_auth(&cfg.username, Some(&cfg.password))
        .header("Depth", "1")
        .header(reqwest::header::CONTENT_TYPE, "application/xml")
        .body(PROPFIND_BODY)
        .send()
        .await
        .map_err(|e| AcquireError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        warn!(url, status = status.as_u16(), "PROPFIND failed");
        return Err(AcquireError::HttpStatus {
            status: status.as_u16(),
            detail,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| AcquireError::Request(e.to_string()))?;
    Ok(parse_hrefs(&body))
}

/// Pull `<href>` values out of a multistatus document. Namespace prefixes
/// vary by server, so matching is on the local element name.
fn parse_hrefs(body: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find('>') else { break };
        let tag = rest[..close].trim();
        rest = &rest[close + 1..];

        if tag.starts_with('/') || tag.starts_with('?') || tag.ends_with('/') {
            continue;
        }
        let local = tag.rsplit(':').next().unwrap_or(tag);
        if !local.eq_ignore_ascii_case("href") {
            continue;
        }

        let Some(end) = rest.find('<') else { break };
        let href = rest[..end].trim();
        if !href.is_empty() {
            hrefs.push(href.to_string());
        }
        rest = &rest[end..];
    }
    hrefs
}

/// Join a multistatus href (usually server-absolute) back onto the root URL.
fn absolutize(root: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    // Server-absolute path: keep the root's scheme and authority.
    if let Some(scheme_end) = root.find("://") {
        let authority_end = root[scheme_end + 3..]
            .find('/')
            .map(|i| scheme_end + 3 + i)
            .unwrap_or(root.len());
        return format!("{}{}", &root[..authority_end], href);
    }
    format!("{}/{}", root.trim_end_matches('/'), href.trim_start_matches('/'))
}

fn resolve_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    // A trailing slash on the configured path marks a collection.
    if path.ends_with('/') && !joined.ends_with('/') {
        format!("{}/", joined)
    } else {
        joined
    }
}
