//! OAuth token persistence.
//!
//! Tokens are looked up from an ordered list of sources (inline env blob, then
//! the token file). The first source that yields a usable token set wins.
//! Nothing here ever fails the caller: bad sources are logged and skipped, and
//! saving is best-effort.

use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::google::oauth::TokenSet;

/// One place a token set may come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Raw JSON from `GOOGLE_OAUTH_TOKENS`.
    Inline(Option<String>),
    /// JSON file written by [`TokenStore::save`].
    File(PathBuf),
}

impl TokenSource {
    fn label(&self) -> String {
        match self {
            Self::Inline(_) => "GOOGLE_OAUTH_TOKENS".to_string(),
            Self::File(path) => format!("token file {}", path.display()),
        }
    }

    /// `Ok(None)` when the source is simply absent, `Err` when it is broken.
    async fn read(&self) -> Result<Option<TokenSet>, String> {
        let raw = match self {
            Self::Inline(None) => return Ok(None),
            Self::Inline(Some(raw)) => raw.clone(),
            Self::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(format!("read failed: {}", e)),
            },
        };

        let tokens: TokenSet =
            serde_json::from_str(&raw).map_err(|e| format!("invalid JSON: {}", e))?;
        if !tokens.is_usable() {
            return Err("contains neither access_token nor refresh_token".to_string());
        }
        Ok(Some(tokens))
    }
}

/// What happened when a source was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: String,
    pub outcome: String,
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.outcome)
    }
}

fn join_attempts(attempts: &[SourceAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every source came up empty.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no OAuth tokens found ({})", join_attempts(.attempts))]
pub struct TokenLookupError {
    pub attempts: Vec<SourceAttempt>,
}

#[derive(Debug)]
pub struct TokenStore {
    sources: Vec<TokenSource>,
    file: PathBuf,
}

impl TokenStore {
    pub fn new(inline: Option<String>, file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        Self {
            sources: vec![TokenSource::Inline(inline), TokenSource::File(file.clone())],
            file,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.inline_tokens.clone(), config.token_file.clone())
    }

    /// Try each source in order; the error lists every attempt.
    pub async fn lookup(&self) -> Result<TokenSet, TokenLookupError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let outcome = match source.read().await {
                Ok(Some(tokens)) => {
                    info!("Loaded OAuth tokens from {}", source.label());
                    return Ok(tokens);
                }
                Ok(None) => "not set".to_string(),
                Err(reason) => {
                    warn!("Ignoring OAuth tokens from {}: {}", source.label(), reason);
                    reason
                }
            };
            attempts.push(SourceAttempt {
                source: source.label(),
                outcome,
            });
        }

        Err(TokenLookupError { attempts })
    }

    /// Stored token set, if any source has one. Misses are logged with the
    /// full attempt list.
    pub async fn load(&self) -> Option<TokenSet> {
        match self.lookup().await {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                info!("{}", e);
                None
            }
        }
    }

    /// Overwrite the token file. Failures are logged, never returned.
    pub async fn save(&self, tokens: &TokenSet) {
        let json = match serde_json::to_string(tokens) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize OAuth tokens: {}", e);
                return;
            }
        };

        match tokio::fs::write(&self.file, json).await {
            Ok(()) => info!("Saved Google OAuth tokens to {}", self.file.display()),
            Err(e) => warn!(
                path = %self.file.display(),
                "Failed to write token file: {}", e
            ),
        }
    }
}
