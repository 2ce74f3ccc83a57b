//! Interactive OAuth consent flow.
//!
//! `NotStarted -> AwaitingCallback -> Authorized`, or `Failed` when the code
//! exchange breaks. Starting again from `Failed` (or any state) is allowed.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::credentials::CredentialResolver;
use crate::error::RelayError;
use crate::google::oauth::OAuthClient;
use crate::google::SHEETS_SCOPE;
use crate::token_store::TokenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    NotStarted,
    AwaitingCallback,
    Authorized,
    Failed,
}

pub struct OAuthFlow {
    oauth: Arc<OAuthClient>,
    resolver: Arc<CredentialResolver>,
    token_store: Arc<TokenStore>,
    success_redirect: String,
    state: RwLock<FlowState>,
}

impl OAuthFlow {
    pub fn new(
        oauth: Arc<OAuthClient>,
        resolver: Arc<CredentialResolver>,
        token_store: Arc<TokenStore>,
        success_redirect: impl Into<String>,
    ) -> Self {
        Self {
            oauth,
            resolver,
            token_store,
            success_redirect: success_redirect.into(),
            state: RwLock::new(FlowState::NotStarted),
        }
    }

    pub async fn state(&self) -> FlowState {
        *self.state.read().await
    }

    /// Build the consent URL the browser should be sent to.
    pub async fn start(&self) -> Result<String, RelayError> {
        let url = self
            .oauth
            .authorization_url(&[SHEETS_SCOPE])
            .map_err(|e| RelayError::Configuration(format!("{:#}", e)))?;
        *self.state.write().await = FlowState::AwaitingCallback;
        info!("OAuth flow started");
        Ok(url.into())
    }

    /// Exchange `code`, persist the tokens and install a fresh Sheets client.
    /// Returns the landing URL to redirect to.
    pub async fn complete(&self, code: &str) -> Result<&str, RelayError> {
        let tokens = match self.oauth.exchange_code(code).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("OAuth callback error: {:#}", e);
                *self.state.write().await = FlowState::Failed;
                return Err(RelayError::AuthProvider(format!("{:#}", e)));
            }
        };

        self.token_store.save(&tokens).await;
        self.resolver.install(self.oauth.clone(), tokens).await;

        *self.state.write().await = FlowState::Authorized;
        info!("OAuth flow completed, Sheets client installed");
        Ok(&self.success_redirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn flow_for(token_uri: String, token_file: std::path::PathBuf) -> OAuthFlow {
        let vars: HashMap<&str, String> = HashMap::from([
            ("GOOGLE_OAUTH_CLIENT_ID", "id".to_string()),
            ("GOOGLE_OAUTH_CLIENT_SECRET", "secret".to_string()),
            ("GOOGLE_TOKEN_URI", token_uri),
            ("GOOGLE_TOKEN_FILE", token_file.display().to_string()),
            ("OAUTH_SUCCESS_REDIRECT", "https://app.example.com/done".to_string()),
        ]);
        let config = RelayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let oauth_config = config.oauth.clone().unwrap();

        let client = reqwest::Client::new();
        let oauth = Arc::new(OAuthClient::new(client.clone(), &oauth_config, &config.google));
        let store = Arc::new(TokenStore::from_config(&config));
        let resolver = Arc::new(CredentialResolver::new(
            client,
            &config,
            Some(oauth.clone()),
            store.clone(),
        ));
        OAuthFlow::new(oauth, resolver, store, oauth_config.success_redirect)
    }

    #[tokio::test]
    async fn test_start_moves_to_awaiting_callback() {
        let dir = tempdir().unwrap();
        let flow = flow_for("http://unused/token".to_string(), dir.path().join("t.json"));
        assert_eq!(flow.state().await, FlowState::NotStarted);

        let url = flow.start().await.unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert_eq!(flow.state().await, FlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn test_complete_persists_and_authorizes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token").body_contains("code=good");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "ya29.fresh",
                    "refresh_token": "1//r",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let token_file = dir.path().join("t.json");
        let flow = flow_for(server.url("/token"), token_file.clone());

        flow.start().await.unwrap();
        let landing = flow.complete("good").await.unwrap();
        assert_eq!(landing, "https://app.example.com/done");
        assert_eq!(flow.state().await, FlowState::Authorized);

        let saved = std::fs::read_to_string(&token_file).unwrap();
        assert!(saved.contains("ya29.fresh"));

        let client = flow.resolver.authorized_client().await.unwrap();
        assert_eq!(client.auth_name(), "oauth");
    }

    #[tokio::test]
    async fn test_failed_exchange_can_restart() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).body(r#"{"error":"invalid_grant"}"#);
            })
            .await;

        let dir = tempdir().unwrap();
        let token_file = dir.path().join("t.json");
        let flow = flow_for(server.url("/token"), token_file.clone());

        flow.start().await.unwrap();
        let err = flow.complete("expired").await.unwrap_err();
        assert!(matches!(err, RelayError::AuthProvider(_)));
        assert_eq!(flow.state().await, FlowState::Failed);
        assert!(!token_file.exists());

        flow.start().await.unwrap();
        assert_eq!(flow.state().await, FlowState::AwaitingCallback);
    }
}
