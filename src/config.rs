//! Relay configuration loaded from the environment.
//!
//! Every value comes from an environment variable (a `.env` file is honored by
//! `main`). Empty variables count as unset. Optional groups such as the OAuth
//! client are `None` when incomplete so the credential resolver can fall back
//! to a service account.

use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SHEET_RANGE: &str = "Sheet1!A:E";
const DEFAULT_TOKEN_FILE: &str = "google_tokens.json";

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Top-level configuration for the relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub ocr: OcrConfig,
    pub sheets: SheetsConfig,
    pub google: GoogleEndpoints,
    /// Present only when both client id and secret are set.
    pub oauth: Option<OAuthConfig>,
    /// Raw service-account key JSON (`GOOGLE_CREDENTIALS`).
    pub service_account_json: Option<String>,
    /// Raw token set JSON (`GOOGLE_OAUTH_TOKENS`), preferred over the token file.
    pub inline_tokens: Option<String>,
    pub token_file: PathBuf,
}

/// Receipt OCR provider settings.
#[derive(Debug, Clone, Default)]
pub struct OcrConfig {
    pub api_url: Option<String>,
    pub client_id: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub range: String,
}

/// Identity provider and spreadsheet API endpoints.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub auth_uri: String,
    pub token_uri: String,
    pub sheets_api_base: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            sheets_api_base: SHEETS_API_BASE.to_string(),
        }
    }
}

/// User-delegated OAuth2 client settings.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Where the browser lands after a successful callback.
    pub success_redirect: String,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {}", raw))?,
            None => DEFAULT_PORT,
        };

        let base_url = get("BASE_URL").unwrap_or_else(|| format!("http://localhost:{}", port));
        let base_url = base_url.trim_end_matches('/').to_string();

        let oauth = match (get("GOOGLE_OAUTH_CLIENT_ID"), get("GOOGLE_OAUTH_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(OAuthConfig {
                client_id,
                client_secret,
                redirect_uri: get("GOOGLE_OAUTH_REDIRECT")
                    .unwrap_or_else(|| format!("{}/oauth2callback", base_url)),
                success_redirect: get("OAUTH_SUCCESS_REDIRECT")
                    .unwrap_or_else(|| format!("{}/", base_url)),
            }),
            _ => None,
        };

        let defaults = GoogleEndpoints::default();

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            static_dir: get("STATIC_DIR").unwrap_or_else(|| "public".to_string()).into(),
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()).into(),
            ocr: OcrConfig {
                api_url: get("VERYFI_API_URL"),
                client_id: get("VERYFI_CLIENT_ID"),
                authorization: get("VERYFI_AUTHORIZATION"),
            },
            sheets: SheetsConfig {
                spreadsheet_id: get("SPREADSHEET_ID"),
                range: get("SHEET_RANGE").unwrap_or_else(|| DEFAULT_SHEET_RANGE.to_string()),
            },
            google: GoogleEndpoints {
                auth_uri: get("GOOGLE_AUTH_URI").unwrap_or(defaults.auth_uri),
                token_uri: get("GOOGLE_TOKEN_URI").unwrap_or(defaults.token_uri),
                sheets_api_base: get("SHEETS_API_BASE").unwrap_or(defaults.sheets_api_base),
            },
            oauth,
            service_account_json: get("GOOGLE_CREDENTIALS"),
            inline_tokens: get("GOOGLE_OAUTH_TOKENS"),
            token_file: get("GOOGLE_TOKEN_FILE")
                .unwrap_or_else(|| DEFAULT_TOKEN_FILE.to_string())
                .into(),
        })
    }
}
