// HTTP acquirer: fetch a single resource over HTTP(S)

use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::AcquireError;
use crate::models::{Job, ProviderConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct HttpAcquirer;

#[async_trait]
impl Acquirer for HttpAcquirer {
    #[instrument(skip(self, job, run, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Http(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let timeout = cfg
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquireError::Request(format!("failed to build HTTP client: {}", e)))?;

        let method = match cfg.method.as_deref() {
            None => reqwest::Method::GET,
            Some(m) => m
                .to_uppercase()
                .parse()
                .map_err(|_| AcquireError::Request(format!("invalid HTTP method: {}", m)))?,
        };

        info!(endpoint = %cfg.endpoint, method = %method, "Downloading source");

        let mut request = client.request(method, &cfg.endpoint);
        for (key, value) in &cfg.headers {
            request = request.header(key, value);
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| AcquireError::Request(e.to_string()))?,
            _ = step.cancel.cancelled() => return Err(AcquireError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AcquireError::HttpStatus {
                status: status.as_u16(),
                detail,
            });
        }

        let filename = filename_from_response(&response, &cfg.endpoint);
        let mime = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            // Strip any charset parameter; only the media type is reported.
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        let path = run.temp_dir.join(format!("{}-{}", job.id, filename));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = step.cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(AcquireError::Cancelled);
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| AcquireError::Request(e.to_string()))?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
            step.heartbeat.beat();
        }
        file.flush().await?;

        let artifact = Artifact {
            path,
            name: filename,
            size,
            checksum: hex::encode(hasher.finalize()),
            mime,
        };

        info!(size = artifact.size, name = %artifact.name, "Download complete");
        Ok(artifact)
    }
}

/// Filename from `Content-Disposition`, falling back to the URL basename.
fn filename_from_response(response: &reqwest::Response, endpoint: &str) -> String {
    if let Some(name) = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
    {
        return name;
    }
    url_basename(endpoint)
}

fn parse_content_disposition(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        let name = part.strip_prefix("filename=")?;
        let name = name.trim_matches('"').trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

fn url_basename(endpoint: &str) -> String {
    let without_query = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);

    match after_scheme.trim_end_matches('/').split_once('/') {
        Some((_, path)) => {
            let base = path.rsplit('/').next().unwrap_or("");
            if base.is_empty() {
                "download".to_string()
            } else {
                base.to_string()
            }
        }
        // URL has no path component at all.
        None => "download".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompressionConfig, EncryptionConfig, Provider};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_job(id: &str, config: serde_json::Value) -> Job {
        Job {
            id: id.to_string(),
            provider: Provider::Http,
            config: ProviderConfig::from_value(Provider::Http, config).unwrap(),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }

    #[test]
    fn test_content_disposition_parsing() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=data.csv"),
            Some("data.csv".to_string())
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[test]
    fn test_url_basename() {
        assert_eq!(url_basename("http://fake/hello.txt"), "hello.txt");
        assert_eq!(url_basename("http://fake/a/b/c.bin?sig=x"), "c.bin");
        assert_eq!(url_basename("http://fake/"), "download");
    }

    #[tokio::test]
    async fn test_acquire_streams_body_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("hello world")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;

        let job = http_job("j1", json!({"endpoint": format!("{}/hello.txt", server.uri())}));
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new(dir.path());

        let artifact = HttpAcquirer
            .acquire(&job, &run, &StepContext::detached())
            .await
            .unwrap();

        assert_eq!(artifact.name, "hello.txt");
        assert_eq!(artifact.size, 11);
        assert_eq!(artifact.mime, "text/plain");
        assert_eq!(
            artifact.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(artifact.path, dir.path().join("j1-hello.txt"));
        assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export"))
            .and(header("x-api-key", "k-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let job = http_job(
            "j2",
            json!({
                "endpoint": format!("{}/export", server.uri()),
                "headers": {"X-Api-Key": "k-123"},
            }),
        );
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new(dir.path());

        HttpAcquirer
            .acquire(&job, &run, &StepContext::detached())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let job = http_job("j3", json!({"endpoint": format!("{}/x", server.uri())}));
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new(dir.path());

        let err = HttpAcquirer
            .acquire(&job, &run, &StepContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_content_disposition_overrides_url_basename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("x")
                    .insert_header("content-disposition", "attachment; filename=\"weekly.tar\""),
            )
            .mount(&server)
            .await;

        let job = http_job("j4", json!({"endpoint": format!("{}/download", server.uri())}));
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new(dir.path());

        let artifact = HttpAcquirer
            .acquire(&job, &run, &StepContext::detached())
            .await
            .unwrap();
        assert_eq!(artifact.name, "weekly.tar");
    }
}
