//! Google identity and Sheets API clients.
//!
//! Both credential kinds (user-delegated OAuth2 and service account) implement
//! [`AccessTokenProvider`] so the Sheets client does not care which one it got.

pub mod oauth;
pub mod service_account;
pub mod sheets;

/// Read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Async trait implemented by each credential kind.
#[async_trait::async_trait]
pub trait AccessTokenProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Return a bearer token, refreshing it first if it is stale.
    async fn access_token(&self) -> anyhow::Result<String>;
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
