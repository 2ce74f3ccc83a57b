//! User-delegated OAuth2 client (authorization-code flow with refresh tokens).

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{now_millis, AccessTokenProvider};
use crate::config::{GoogleEndpoints, OAuthConfig};

/// Refresh this long before the recorded expiry.
const EAGER_REFRESH_MS: i64 = 5 * 60 * 1000;

/// Token set as stored by Google client libraries (`expiry_date` in epoch ms).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenSet {
    /// True when the access token is missing or about to expire.
    /// A token without `expiry_date` is assumed valid.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        match (&self.access_token, self.expiry_date) {
            (None, _) => true,
            (Some(_), Some(expiry)) => now_ms >= expiry.saturating_sub(EAGER_REFRESH_MS),
            (Some(_), None) => false,
        }
    }

    /// A token set we can do anything with.
    pub fn is_usable(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, issued_at_ms: i64) -> TokenSet {
        TokenSet {
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            expiry_date: self.expires_in.map(|secs| issued_at_ms.saturating_add(secs.saturating_mul(1000))),
            scope: self.scope,
            token_type: self.token_type,
            id_token: self.id_token,
        }
    }
}

/// OAuth2 client shared between the auth flow and the credential resolver.
pub struct OAuthClient {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_uri: String,
    token_uri: String,
    credentials: RwLock<Option<TokenSet>>,
}

impl OAuthClient {
    pub fn new(client: Client, config: &OAuthConfig, endpoints: &GoogleEndpoints) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_uri: endpoints.auth_uri.clone(),
            token_uri: endpoints.token_uri.clone(),
            credentials: RwLock::new(None),
        }
    }

    /// Consent-page URL requesting offline access with forced consent, so the
    /// provider always hands back a refresh token.
    pub fn authorization_url(&self, scopes: &[&str]) -> Result<Url> {
        let scope = scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("access_type", "offline"),
                ("scope", scope.as_str()),
                ("prompt", "consent"),
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .with_context(|| format!("Invalid authorization endpoint: {}", self.auth_uri))
    }

    /// Exchange an authorization code for a token set.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        info!("Exchanging OAuth authorization code");
        let issued_at = now_millis();
        let resp = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", &self.redirect_uri),
            ])
            .await?;
        Ok(resp.into_token_set(issued_at))
    }

    pub async fn set_credentials(&self, tokens: TokenSet) {
        *self.credentials.write().await = Some(tokens);
    }

    pub async fn credentials(&self) -> Option<TokenSet> {
        self.credentials.read().await.clone()
    }

    async fn refresh(&self, current: &TokenSet) -> Result<TokenSet> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .context("No refresh token is set")?;

        debug!("Refreshing OAuth access token");
        let issued_at = now_millis();
        let resp = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;

        let mut refreshed = resp.into_token_set(issued_at);
        // Google omits the refresh token on refresh responses
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = current.refresh_token.clone();
        }
        Ok(refreshed)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(&self.token_uri)
            .form(form)
            .send()
            .await
            .context("Token request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token endpoint error ({}): {}", status, text);
        }

        resp.json()
            .await
            .context("Failed to parse token response")
    }
}

#[async_trait::async_trait]
impl AccessTokenProvider for OAuthClient {
    fn name(&self) -> &str {
        "oauth"
    }

    async fn access_token(&self) -> Result<String> {
        let current = self
            .credentials()
            .await
            .context("No OAuth credentials installed")?;

        if !current.needs_refresh(now_millis()) {
            if let Some(token) = current.access_token {
                return Ok(token);
            }
        }

        let refreshed = self.refresh(&current).await?;
        let token = refreshed
            .access_token
            .clone()
            .context("Refresh response carried no access token")?;
        self.set_credentials(refreshed).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn oauth_client(token_uri: String) -> OAuthClient {
        let config = OAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: "http://localhost:3000/oauth2callback".to_string(),
            success_redirect: "http://localhost:3000/".to_string(),
        };
        let endpoints = GoogleEndpoints {
            token_uri,
            ..GoogleEndpoints::default()
        };
        OAuthClient::new(Client::new(), &config, &endpoints)
    }

    #[test]
    fn test_authorization_url_requests_offline_consent() {
        let client = oauth_client("http://unused/token".to_string());
        let url = client.authorization_url(&[super::super::SHEETS_SCOPE]).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/oauth2callback");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/spreadsheets");
    }

    #[test]
    fn test_needs_refresh() {
        let now = 1_700_000_000_000;
        let fresh = TokenSet {
            access_token: Some("a".into()),
            expiry_date: Some(now + 60 * 60 * 1000),
            ..TokenSet::default()
        };
        assert!(!fresh.needs_refresh(now));

        let stale = TokenSet {
            expiry_date: Some(now + 60 * 1000),
            ..fresh.clone()
        };
        assert!(stale.needs_refresh(now));

        let no_expiry = TokenSet {
            access_token: Some("a".into()),
            ..TokenSet::default()
        };
        assert!(!no_expiry.needs_refresh(now));

        let refresh_only = TokenSet {
            refresh_token: Some("r".into()),
            ..TokenSet::default()
        };
        assert!(refresh_only.needs_refresh(now));
        assert!(refresh_only.is_usable());
        assert!(!TokenSet::default().is_usable());
    }

    #[test]
    fn test_extreme_expiry_values_saturate() {
        let now = 1_700_000_000_000;
        let ancient = TokenSet {
            access_token: Some("a".into()),
            expiry_date: Some(i64::MIN),
            ..TokenSet::default()
        };
        assert!(ancient.needs_refresh(now));

        let forever = TokenSet {
            expiry_date: Some(i64::MAX),
            ..ancient.clone()
        };
        assert!(!forever.needs_refresh(now));

        let resp = TokenResponse {
            access_token: "a".into(),
            expires_in: Some(i64::MAX),
            refresh_token: None,
            scope: None,
            token_type: None,
            id_token: None,
        };
        assert_eq!(resp.into_token_set(now).expiry_date, Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=authorization_code")
                    .body_contains("code=abc");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "ya29.new",
                    "refresh_token": "1//refresh",
                    "expires_in": 3599,
                    "scope": "https://www.googleapis.com/auth/spreadsheets",
                    "token_type": "Bearer"
                }));
            })
            .await;

        let client = oauth_client(server.url("/token"));
        let tokens = client.exchange_code("abc").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token.as_deref(), Some("ya29.new"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
        assert!(tokens.expiry_date.unwrap() > now_millis());
    }

    #[tokio::test]
    async fn test_exchange_code_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).body(r#"{"error":"invalid_grant"}"#);
            })
            .await;

        let client = oauth_client(server.url("/token"));
        let err = client.exchange_code("bad").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_access_token_refreshes_and_keeps_refresh_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=refresh_token");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "ya29.refreshed",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }));
            })
            .await;

        let client = oauth_client(server.url("/token"));
        client
            .set_credentials(TokenSet {
                access_token: Some("ya29.old".into()),
                refresh_token: Some("1//keep".into()),
                expiry_date: Some(now_millis() - 1000),
                ..TokenSet::default()
            })
            .await;

        assert_eq!(client.access_token().await.unwrap(), "ya29.refreshed");
        // Second call uses the refreshed token
        assert_eq!(client.access_token().await.unwrap(), "ya29.refreshed");
        mock.assert_hits_async(1).await;

        let stored = client.credentials().await.unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("1//keep"));
    }

    #[tokio::test]
    async fn test_access_token_without_credentials() {
        let client = oauth_client("http://unused/token".to_string());
        assert!(client.access_token().await.is_err());
    }
}
