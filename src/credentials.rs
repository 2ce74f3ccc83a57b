//! Credential resolution for the spreadsheet API.
//!
//! Picks between stored OAuth tokens and a service-account key and caches the
//! resulting [`SheetsClient`] for the life of the process. The cache slot is a
//! `tokio::sync::Mutex` held across the whole first resolution, so concurrent
//! first requests wait for one handshake instead of racing.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{GoogleEndpoints, RelayConfig};
use crate::error::RelayError;
use crate::google::oauth::{OAuthClient, TokenSet};
use crate::google::service_account::{ServiceAccountAuth, ServiceAccountKey};
use crate::google::sheets::SheetsClient;
use crate::google::{AccessTokenProvider, SHEETS_SCOPE};
use crate::token_store::TokenStore;

pub struct CredentialResolver {
    client: reqwest::Client,
    endpoints: GoogleEndpoints,
    service_account_json: Option<String>,
    oauth: Option<Arc<OAuthClient>>,
    token_store: Arc<TokenStore>,
    cached: Mutex<Option<Arc<SheetsClient>>>,
}

impl CredentialResolver {
    pub fn new(
        client: reqwest::Client,
        config: &RelayConfig,
        oauth: Option<Arc<OAuthClient>>,
        token_store: Arc<TokenStore>,
    ) -> Self {
        Self {
            client,
            endpoints: config.google.clone(),
            service_account_json: config.service_account_json.clone(),
            oauth,
            token_store,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached client, resolving it on first use.
    pub async fn authorized_client(&self) -> Result<Arc<SheetsClient>, RelayError> {
        let mut slot = self.cached.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = Arc::new(self.resolve().await?);
        info!("Sheets client ready (auth={})", client.auth_name());
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Install freshly consented OAuth tokens and swap in a client built on
    /// them. Runs under the cache lock so an in-flight first resolution cannot
    /// overwrite the new tokens with stored ones.
    pub async fn install(&self, oauth: Arc<OAuthClient>, tokens: TokenSet) -> Arc<SheetsClient> {
        let mut slot = self.cached.lock().await;
        oauth.set_credentials(tokens).await;
        let client = Arc::new(self.sheets_client(oauth));
        *slot = Some(client.clone());
        client
    }

    /// Build a Sheets client around any token provider.
    pub fn sheets_client(&self, auth: Arc<dyn AccessTokenProvider>) -> SheetsClient {
        SheetsClient::new(self.client.clone(), self.endpoints.sheets_api_base.clone(), auth)
    }

    async fn resolve(&self) -> Result<SheetsClient, RelayError> {
        match &self.oauth {
            Some(oauth) => self.resolve_oauth(oauth.clone()).await,
            None => self.resolve_service_account().await,
        }
    }

    async fn resolve_oauth(&self, oauth: Arc<OAuthClient>) -> Result<SheetsClient, RelayError> {
        let tokens = self.token_store.load().await.ok_or_else(|| {
            RelayError::Unauthenticated("No OAuth tokens stored. Authenticate at /api/auth".to_string())
        })?;

        oauth.set_credentials(tokens).await;
        // A stale token may still work downstream, so a failed refresh is not fatal
        if let Err(e) = oauth.access_token().await {
            warn!(error = %format!("{:#}", e), "OAuth token refresh warning");
        }

        Ok(self.sheets_client(oauth))
    }

    async fn resolve_service_account(&self) -> Result<SheetsClient, RelayError> {
        let raw = self.service_account_json.as_deref().ok_or_else(|| {
            RelayError::Configuration("No OAuth client or GOOGLE_CREDENTIALS provided".to_string())
        })?;

        let key = ServiceAccountKey::parse(raw)?;
        let auth = ServiceAccountAuth::new(
            self.client.clone(),
            key,
            &self.endpoints.token_uri,
            SHEETS_SCOPE,
        );

        auth.authorize().await.map_err(|e| {
            RelayError::AuthProvider(format!(
                "Service account {} authorization failed: {:#}",
                auth.client_email(),
                e
            ))
        })?;

        Ok(self.sheets_client(Arc::new(auth)))
    }
}
