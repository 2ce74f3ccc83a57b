//! Google Sheets `values.append` client.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::AccessTokenProvider;

/// Update metadata returned by the Sheets API for an append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_columns: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_cells: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    table_range: Option<String>,
    #[serde(default)]
    updates: AppendUpdates,
}

/// Authorized Sheets client. This is the handle the credential resolver caches.
pub struct SheetsClient {
    client: Client,
    base_url: String,
    auth: Arc<dyn AccessTokenProvider>,
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth.name())
            .finish()
    }
}

impl SheetsClient {
    pub fn new(client: Client, base_url: impl Into<String>, auth: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
        }
    }

    /// Which credential kind backs this client.
    pub fn auth_name(&self) -> &str {
        self.auth.name()
    }

    /// Append one row with `valueInputOption=RAW` (no formula evaluation).
    pub async fn append_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        row: Vec<Value>,
    ) -> Result<AppendUpdates> {
        let url = self.append_url(spreadsheet_id, range)?;
        let token = self.auth.access_token().await?;

        debug!("Appending row to {} ({})", spreadsheet_id, range);

        let resp = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .context("Sheets append request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Sheets API error ({}): {}", status, text);
        }

        let resp: AppendResponse = resp
            .json()
            .await
            .context("Failed to parse Sheets append response")?;

        info!(
            "Appended row: range={} table={}",
            resp.updates.updated_range.as_deref().unwrap_or("?"),
            resp.table_range.as_deref().unwrap_or("?")
        );
        Ok(resp.updates)
    }

    fn append_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url> {
        let last_segment = format!("{}:append", range);
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Sheets API base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets API base URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                spreadsheet_id,
                "values",
                last_segment.as_str(),
            ]);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        Ok(url)
    }
}
