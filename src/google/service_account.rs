//! Service-account authentication via signed JWT assertions.
//!
//! The key comes from `GOOGLE_CREDENTIALS` as raw JSON. Access tokens are
//! minted by exchanging an RS256 assertion at the token endpoint and cached
//! until one minute before they expire.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{now_secs, AccessTokenProvider};
use crate::error::RelayError;

/// Required fields of a service-account key file.
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Deserialize)]
struct RawKey {
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse key JSON, normalizing escaped newlines in the private key.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let key: RawKey = serde_json::from_str(raw).map_err(|e| {
            RelayError::Configuration(format!("Invalid GOOGLE_CREDENTIALS JSON: {}", e))
        })?;

        let (client_email, private_key) = match (key.client_email, key.private_key) {
            (Some(email), Some(pk)) if !email.is_empty() && !pk.is_empty() => (email, pk),
            _ => {
                return Err(RelayError::Configuration(
                    "GOOGLE_CREDENTIALS must include client_email & private_key".to_string(),
                ))
            }
        };

        Ok(Self {
            client_email,
            private_key: normalize_private_key(&private_key),
            token_uri: key.token_uri.filter(|uri| !uri.is_empty()),
        })
    }
}

/// Keys pasted into env vars usually carry literal `\n` sequences.
pub fn normalize_private_key(key: &str) -> String {
    key.replace("\\n", "\n")
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

/// Signed-JWT authenticator for one service account and scope.
pub struct ServiceAccountAuth {
    client: Client,
    key: ServiceAccountKey,
    token_uri: String,
    scope: String,
    token_cache: RwLock<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// `default_token_uri` is used when the key does not name its own.
    pub fn new(client: Client, key: ServiceAccountKey, default_token_uri: &str, scope: &str) -> Self {
        let token_uri = key
            .token_uri
            .clone()
            .unwrap_or_else(|| default_token_uri.to_string());
        Self {
            client,
            key,
            token_uri,
            scope: scope.to_string(),
            token_cache: RwLock::new(None),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Mint the first access token (network call).
    pub async fn authorize(&self) -> Result<()> {
        self.access_token().await?;
        info!("Service account {} authorized", self.key.client_email);
        Ok(())
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let now = now_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: now,
            exp: now + 3600,
        };

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .context("Invalid RSA private key in service account JSON")?;

        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .context("Failed to encode JWT")?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .context("Token exchange request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed ({}): {}", status, text);
        }

        let resp: TokenResponse = resp
            .json()
            .await
            .context("Failed to parse token response")?;

        debug!("Minted service account token, expires in {}s", resp.expires_in);
        Ok(CachedToken {
            access_token: resp.access_token,
            expires_at: now.saturating_add(resp.expires_in),
        })
    }
}

#[async_trait::async_trait]
impl AccessTokenProvider for ServiceAccountAuth {
    fn name(&self) -> &str {
        "service_account"
    }

    async fn access_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(ref cached) = *cache {
                if now_secs() < cached.expires_at.saturating_sub(60) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.access_token.clone();
        *self.token_cache.write().await = Some(fresh);
        Ok(token)
    }
}
