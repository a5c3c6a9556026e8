// Streaming upload of the final artifact to a presigned PUT URL

use crate::artifact::{Artifact, OCTET_STREAM};
use crate::errors::UploadError;
use crate::models::UploadGrant;
use crate::runtime::StepContext;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};

/// Generous ceiling for a single artifact transfer.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// PUT the artifact body to the granted URL.
///
/// The grant is checked against the wall clock first; an expired grant fails
/// without touching the network so the pipeline can fetch a fresh one.
#[instrument(skip(artifact, grant, step), fields(name = %artifact.name, size = artifact.size))]
pub async fn upload(
    artifact: &Artifact,
    grant: &UploadGrant,
    step: &StepContext,
) -> Result<(), UploadError> {
    if Utc::now() >= grant.expires_at {
        warn!(expires_at = %grant.expires_at, "Upload grant already expired");
        return Err(UploadError::GrantExpired(grant.expires_at));
    }

    let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
        UploadError::Io(format!(
            "failed to open {}: {}",
            artifact.path.display(),
            e
        ))
    })?;

    let heartbeat = step.heartbeat.clone();
    let stream = ReaderStream::with_capacity(file, 32 * 1024).inspect(move |_| heartbeat.beat());
    let body = reqwest::Body::wrap_stream(stream);

    let client = reqwest::Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .build()
        .map_err(|e| UploadError::Request(format!("failed to build HTTP client: {}", e)))?;

    let request = client
        .put(&grant.upload_url)
        .header(reqwest::header::CONTENT_LENGTH, artifact.size)
        .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
        .body(body);

    let response = tokio::select! {
        result = request.send() => result.map_err(|e| UploadError::Request(e.to_string()))?,
        _ = step.cancel.cancelled() => {
            return Err(UploadError::Request("upload cancelled".to_string()));
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::NO_CONTENT {
        let body = response.text().await.unwrap_or_default();
        return Err(UploadError::Status {
            status: status.as_u16(),
            body,
        });
    }

    info!("Artifact uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn artifact_with(body: &[u8]) -> (tempfile::TempDir, Artifact) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, body).await.unwrap();
        let artifact = Artifact::describe(&path, "payload.bin", OCTET_STREAM)
            .await
            .unwrap();
        (dir, artifact)
    }

    #[tokio::test]
    async fn test_expired_grant_fails_without_network_call() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (_dir, artifact) = artifact_with(b"data").await;
        let grant = UploadGrant {
            upload_url: format!("{}/put", server.uri()),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        };

        let err = upload(&artifact, &grant, &StepContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::GrantExpired(_)));
    }

    #[tokio::test]
    async fn test_upload_sends_content_length_and_accepts_204() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/put"))
            .and(header("content-length", "11"))
            .and(header("content-type", OCTET_STREAM))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, artifact) = artifact_with(b"hello world").await;
        let grant = UploadGrant {
            upload_url: format!("{}/put", server.uri()),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };

        upload(&artifact, &grant, &StepContext::detached())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_target_4xx_is_terminal() {
        use crate::errors::Classify;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("signature mismatch"))
            .mount(&server)
            .await;

        let (_dir, artifact) = artifact_with(b"data").await;
        let grant = UploadGrant {
            upload_url: format!("{}/put", server.uri()),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };

        let err = upload(&artifact, &grant, &StepContext::detached())
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }
}
