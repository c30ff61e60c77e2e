//! Google OAuth 2.0 access tokens for the Gmail API.
//!
//! Two modes:
//! - a pre-issued access token with no refresh credentials, used as-is
//! - an authorized-user refresh token, exchanged at `token_uri` and cached
//!   until shortly before it expires

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ConfigError, MailboxError};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth credentials for one mailbox.
#[derive(Debug, Default)]
pub struct GoogleAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    /// Pre-issued access token.
    pub access_token: Option<SecretString>,
    pub token_uri: Option<String>,
}

/// Authorized-user credentials file, as written by Google's OAuth tooling.
#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token: Option<String>,
    token_uri: Option<String>,
}

impl GoogleAuthConfig {
    /// Load from `GMAIL_CREDENTIALS_JSON`, falling back to individual
    /// `GOOGLE_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = match get("GMAIL_CREDENTIALS_JSON").filter(|s| !s.trim().is_empty()) {
            Some(json) => {
                let user: AuthorizedUser = serde_json::from_str(&json).map_err(|e| {
                    ConfigError::ParseError(format!("GMAIL_CREDENTIALS_JSON: {e}"))
                })?;
                Self {
                    client_id: user.client_id,
                    client_secret: user.client_secret.map(SecretString::from),
                    refresh_token: user.refresh_token.map(SecretString::from),
                    access_token: user.token.map(SecretString::from),
                    token_uri: user.token_uri,
                }
            }
            None => Self {
                client_id: get("GOOGLE_CLIENT_ID"),
                client_secret: get("GOOGLE_CLIENT_SECRET").map(SecretString::from),
                refresh_token: get("GOOGLE_REFRESH_TOKEN").map(SecretString::from),
                access_token: get("GOOGLE_ACCESS_TOKEN").map(SecretString::from),
                token_uri: get("GOOGLE_TOKEN_URI"),
            },
        };

        if !config.is_valid() {
            return Err(ConfigError::MissingEnvVar(
                "GMAIL_CREDENTIALS_JSON (or GOOGLE_ACCESS_TOKEN, or GOOGLE_CLIENT_ID + GOOGLE_CLIENT_SECRET + GOOGLE_REFRESH_TOKEN)".into(),
            ));
        }
        Ok(config)
    }

    fn can_refresh(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.access_token.is_some() || self.can_refresh()
    }
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    /// `None` for a pre-issued token with unknown lifetime.
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => at > Instant::now() + EXPIRY_MARGIN,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Access-token provider shared by every Gmail request.
#[derive(Debug)]
pub struct GoogleAuth {
    config: GoogleAuthConfig,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn new(config: GoogleAuthConfig, http: reqwest::Client) -> Self {
        // A pre-issued token is only trusted indefinitely when nothing can refresh it.
        let cached = match (&config.access_token, config.can_refresh()) {
            (Some(token), false) => Some(CachedToken {
                value: token.expose_secret().to_string(),
                expires_at: None,
            }),
            _ => None,
        };
        Self {
            config,
            http,
            cached: RwLock::new(cached),
        }
    }

    /// A valid access token, refreshing when the cached one is stale.
    pub async fn access_token(&self) -> Result<String, MailboxError> {
        if let Some(token) = self.cached.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next request refreshes it.
    pub async fn invalidate(&self) {
        if self.config.can_refresh() {
            *self.cached.write().await = None;
        } else {
            warn!("Gmail rejected the configured access token and no refresh credentials are set");
        }
    }

    async fn refresh(&self) -> Result<CachedToken, MailboxError> {
        let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            &self.config.client_id,
            &self.config.client_secret,
            &self.config.refresh_token,
        ) else {
            return Err(MailboxError::AuthFailed {
                reason: "no refresh credentials configured".into(),
            });
        };

        let token_uri = self
            .config
            .token_uri
            .as_deref()
            .unwrap_or(DEFAULT_TOKEN_URI);
        debug!(token_uri, "Refreshing Google access token");

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| MailboxError::RequestFailed {
                reason: format!("token refresh: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailboxError::AuthFailed {
                reason: format!("token refresh returned {status}: {body}"),
            });
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| MailboxError::InvalidResponse {
            reason: format!("token refresh: {e}"),
        })?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));

        Ok(CachedToken {
            value: parsed.access_token,
            expires_at: Some(Instant::now() + lifetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn refresh_config(token_uri: String) -> GoogleAuthConfig {
        GoogleAuthConfig {
            client_id: Some("client".into()),
            client_secret: Some(SecretString::from("secret")),
            refresh_token: Some(SecretString::from("refresh")),
            access_token: None,
            token_uri: Some(token_uri),
        }
    }

    #[test]
    fn credentials_json_is_preferred() {
        let json = r#"{"client_id": "cid", "client_secret": "cs", "refresh_token": "rt",
                      "token": "stale", "token_uri": "https://example.com/token"}"#;
        let config = GoogleAuthConfig::from_vars(vars(&[
            ("GMAIL_CREDENTIALS_JSON", json),
            ("GOOGLE_CLIENT_ID", "ignored"),
        ]))
        .unwrap();
        assert_eq!(config.client_id.as_deref(), Some("cid"));
        assert_eq!(config.token_uri.as_deref(), Some("https://example.com/token"));
        assert!(config.can_refresh());
    }

    #[test]
    fn individual_vars_are_accepted() {
        let config = GoogleAuthConfig::from_vars(vars(&[("GOOGLE_ACCESS_TOKEN", "tok")])).unwrap();
        assert!(config.is_valid());
        assert!(!config.can_refresh());
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = GoogleAuthConfig::from_vars(vars(&[("GOOGLE_CLIENT_ID", "cid")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn malformed_credentials_json_rejected() {
        let err =
            GoogleAuthConfig::from_vars(vars(&[("GMAIL_CREDENTIALS_JSON", "{oops")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[tokio::test]
    async fn static_token_used_without_network() {
        let config = GoogleAuthConfig {
            access_token: Some(SecretString::from("static-token")),
            ..Default::default()
        };
        let auth = GoogleAuth::new(config, reqwest::Client::new());
        assert_eq!(auth.access_token().await.unwrap(), "static-token");
    }

    #[tokio::test]
    async fn refresh_grant_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = GoogleAuth::new(
            refresh_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
        );
        assert_eq!(auth.access_token().await.unwrap(), "fresh-token");
        assert_eq!(auth.access_token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 3599
            })))
            .expect(2)
            .mount(&server)
            .await;

        let auth = GoogleAuth::new(
            refresh_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
        );
        auth.access_token().await.unwrap();
        auth.invalidate().await;
        auth.access_token().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_grant_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let auth = GoogleAuth::new(
            refresh_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
        );
        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, MailboxError::AuthFailed { .. }));
    }
}
