//! Access-token acquisition
//!
//! The pipeline only needs a bearer token for a given resource. [`TokenProvider`]
//! is the seam: [`StaticToken`] hands back a fixed value (tests, pre-issued
//! tokens), [`OAuthTokenProvider`] runs an OAuth2 token request against the
//! tenant's login endpoint and caches the result until shortly before expiry.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};

/// Tokens are refreshed this long before the reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Used when the token endpoint omits `expires_in`
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// A failed token request is replayed to callers for this long
const FAILURE_BACKOFF: Duration = Duration::from_secs(300);

/// Source of bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a bearer token valid for `resource`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when no token can be obtained.
    async fn access_token(&self, resource: &str) -> Result<String>;
}

/// Provider that always returns the same token
#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a pre-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self, _resource: &str) -> Result<String> {
        if self.0.is_empty() {
            return Err(Error::Auth("static token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

/// OAuth2 grant used by [`OAuthTokenProvider`]
#[derive(Clone)]
pub enum Grant {
    /// Application identity (`client_credentials`)
    ClientCredentials {
        /// Application id
        client_id: String,
        /// Application secret
        client_secret: String,
    },
    /// Delegated user identity (`password`)
    Password {
        /// Application id
        client_id: String,
        /// Application secret
        client_secret: String,
        /// User principal name
        username: String,
        /// User password
        password: String,
    },
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Grant::Password {
                client_id,
                username,
                ..
            } => f
                .debug_struct("Password")
                .field("client_id", client_id)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    // Some endpoints send this as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let secs = match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        secs.map(Duration::from_secs).unwrap_or(DEFAULT_LIFETIME)
    }
}

struct CachedToken {
    // Err holds the message of a failed request
    outcome: std::result::Result<String, String>,
    refresh_at: Instant,
}

/// OAuth2 token endpoint client with a per-resource cache
///
/// Requests for the same provider are serialized, so concurrent callers share one
/// token request. Failures are cached too: until the backoff elapses every caller
/// gets the same [`Error::Auth`] without another round trip.
pub struct OAuthTokenProvider {
    http: reqwest::Client,
    token_url: String,
    grant: Grant,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl OAuthTokenProvider {
    /// Create a provider for an arbitrary token endpoint
    pub fn new(token_url: impl Into<String>, grant: Grant, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Auth(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_url: token_url.into(),
            grant,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Application-identity provider for the management API
    pub fn client_credentials(config: &Config) -> Result<Self> {
        Self::new(
            config.token_url(),
            Grant::ClientCredentials {
                client_id: config.tenant.client_id.clone(),
                client_secret: config.tenant.client_secret.clone(),
            },
            config.feed.request_timeout,
        )
    }

    /// Delegated-user provider for the site metadata service
    pub fn site_user(config: &Config) -> Result<Self> {
        Self::new(
            config.token_url(),
            Grant::Password {
                client_id: config.tenant.client_id.clone(),
                client_secret: config.tenant.client_secret.clone(),
                username: config.enrichment.site_user.clone(),
                password: config.enrichment.site_password.clone(),
            },
            config.feed.request_timeout,
        )
    }

    async fn request_token(&self, resource: &str) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![("resource", resource)];
        match &self.grant {
            Grant::ClientCredentials {
                client_id,
                client_secret,
            } => {
                form.push(("grant_type", "client_credentials"));
                form.push(("client_id", client_id));
                form.push(("client_secret", client_secret));
            }
            Grant::Password {
                client_id,
                client_secret,
                username,
                password,
            } => {
                form.push(("grant_type", "password"));
                form.push(("client_id", client_id));
                form.push(("client_secret", client_secret));
                form.push(("username", username));
                form.push(("password", password));
            }
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                Error::Auth(format!("token request to {} failed: {}", self.token_url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            // Identity providers put the reason in the body
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                body.chars().take(512).collect::<String>()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Auth(format!("malformed token response: {}", e)))
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self, resource: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(resource)
            && Instant::now() < cached.refresh_at
        {
            return cached.outcome.clone().map_err(Error::Auth);
        }

        let (outcome, lifetime) = match self.request_token(resource).await {
            Ok(response) if response.access_token.is_empty() => (
                Err("token endpoint returned an empty token".to_string()),
                FAILURE_BACKOFF,
            ),
            Ok(response) => {
                let lifetime = response.lifetime().saturating_sub(EXPIRY_MARGIN);
                tracing::debug!(
                    resource,
                    lifetime_secs = lifetime.as_secs(),
                    "acquired access token"
                );
                (Ok(response.access_token), lifetime)
            }
            Err(e) => {
                tracing::warn!(resource, error = %e, "token request failed");
                let message = match e {
                    Error::Auth(message) => message,
                    other => other.to_string(),
                };
                (Err(message), FAILURE_BACKOFF)
            }
        };

        cache.insert(
            resource.to_string(),
            CachedToken {
                outcome: outcome.clone(),
                refresh_at: Instant::now() + lifetime,
            },
        );
        outcome.map_err(Error::Auth)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_grant() -> Grant {
        Grant::ClientCredentials {
            client_id: "app".into(),
            client_secret: "secret".into(),
        }
    }

    #[tokio::test]
    async fn static_token_returns_value() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.access_token("any").await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn empty_static_token_is_auth_error() {
        let provider = StaticToken::new("");
        assert!(matches!(
            provider.access_token("any").await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn client_credentials_token_is_cached_per_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": "3599",
                "access_token": "tok-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OAuthTokenProvider::new(
            format!("{}/tenant/oauth2/token", server.uri()),
            client_grant(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            provider
                .access_token("https://manage.office.com")
                .await
                .unwrap(),
            "tok-1"
        );
        assert_eq!(
            provider
                .access_token("https://manage.office.com")
                .await
                .unwrap(),
            "tok-1"
        );
    }

    #[tokio::test]
    async fn password_grant_sends_user_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/t/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=admin%40contoso.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "user-tok",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let provider = OAuthTokenProvider::new(
            format!("{}/t/oauth2/token", server.uri()),
            Grant::Password {
                client_id: "app".into(),
                client_secret: "secret".into(),
                username: "admin@contoso.com".into(),
                password: "pw".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            provider
                .access_token("https://contoso.sharepoint.com")
                .await
                .unwrap(),
            "user-tok"
        );
    }

    #[tokio::test]
    async fn rejected_credentials_are_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"error": "invalid_client"})),
            )
            .mount(&server)
            .await;

        let provider = OAuthTokenProvider::new(
            format!("{}/t/oauth2/token", server.uri()),
            client_grant(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider.access_token("r").await.unwrap_err();
        match err {
            Error::Auth(msg) => assert!(msg.contains("invalid_client"), "{msg}"),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_token_request_is_not_repeated_by_waiting_callers() {
        let server = MockServer::start().await;
        let delay = Duration::from_millis(100);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_delay(delay))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(
            OAuthTokenProvider::new(
                format!("{}/t/oauth2/token", server.uri()),
                client_grant(),
                Duration::from_secs(5),
            )
            .unwrap(),
        );

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    provider.access_token("https://contoso.sharepoint.com").await
                })
            })
            .collect();

        for caller in callers {
            let result = caller.await.unwrap();
            assert!(matches!(result, Err(Error::Auth(_))), "{result:?}");
        }
        assert!(matches!(
            provider.access_token("https://contoso.sharepoint.com").await,
            Err(Error::Auth(_))
        ));
        server.verify().await;
    }

    #[test]
    fn grant_debug_hides_secrets() {
        let grant = Grant::Password {
            client_id: "app".into(),
            client_secret: "s3cr3t".into(),
            username: "u".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{grant:?}");
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("hunter2"));
    }
}
