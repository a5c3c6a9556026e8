// Bearer-token acquisition and caching against the identity provider
// Single-writer guarded cache; tokens are refreshed once within five minutes
// of expiry.

use crate::config::AuthSettings;
use crate::errors::AuthError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    username: &'a str,
    password: &'a str,
    client_id: &'a str,
    audience: &'a str,
    scope: &'a str,
    realm: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token source for every outbound call that needs a bearer.
#[derive(Clone)]
pub struct TokenCache {
    settings: Arc<AuthSettings>,
    client: reqwest::Client,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenCache {
    pub fn new(settings: AuthSettings) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            settings: Arc::new(settings),
            client,
            cached: Arc::new(Mutex::new(None)),
        })
    }

    /// Return the cached token, refreshing it atomically when it is within
    /// five minutes of expiry. Readers queue on the same guard, so at most
    /// one refresh request is ever in flight.
    #[instrument(skip(self))]
    pub async fn token(&self) -> Result<String, AuthError> {
        let mut guard = self.cached.lock().await;

        if let Some(cached) = guard.as_ref() {
            if Utc::now() < cached.expires_at - ChronoDuration::minutes(EXPIRY_MARGIN_MINUTES) {
                debug!("Using cached access token");
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, AuthError> {
        let url = format!("{}/oauth/token", self.settings.server);
        let body = TokenRequest {
            grant_type: "http://auth0.com/oauth/grant-type/password-realm",
            username: &self.settings.username,
            password: &self.settings.password,
            client_id: &self.settings.client_id,
            audience: &self.settings.audience,
            scope: "profile",
            realm: "agent",
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in);
        info!(expires_at = %expires_at, "Access token refreshed");

        Ok(CachedToken {
            token: token.access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(server: &str) -> AuthSettings {
        AuthSettings {
            server: server.to_string(),
            username: "agent@example.com".to_string(),
            password: "secret".to_string(),
            client_id: "client".to_string(),
            audience: "https://api.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_token_is_cached_across_calls() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_partial_json(serde_json::json!({
                "grant_type": "http://auth0.com/oauth/grant-type/password-realm",
                "realm": "agent",
                "scope": "profile",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new(settings(&server.uri())).unwrap();
        assert_eq!(cache.token().await.unwrap(), "tok-1");
        // Served from cache; the mock allows exactly one hit.
        assert_eq!(cache.token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_provider_rejection_is_terminal() {
        use crate::errors::Classify;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
            .mount(&server)
            .await;

        let cache = TokenCache::new(settings(&server.uri())).unwrap();
        let err = cache.token().await.unwrap_err();
        assert!(err.is_terminal());
    }
}
