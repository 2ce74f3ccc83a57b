//! Receipt OCR relay.
//!
//! Streams a spooled upload to the OCR provider as multipart form data and
//! hands back whatever JSON the provider answered with.

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::{debug, error, info, warn};

use crate::config::OcrConfig;
use crate::error::RelayError;
use crate::upload::TempUpload;

pub struct OcrRelay {
    client: Client,
    config: OcrConfig,
}

impl OcrRelay {
    pub fn new(client: Client, config: OcrConfig) -> Self {
        Self { client, config }
    }

    /// Forward the upload and parse the provider response.
    ///
    /// The temp file is removed right after the provider call, before parsing,
    /// whatever the outcome.
    pub async fn relay(&self, upload: TempUpload) -> Result<serde_json::Value, RelayError> {
        let Some(url) = self.config.api_url.as_deref() else {
            upload.remove();
            return Err(RelayError::Configuration("VERYFI_API_URL not set".to_string()));
        };

        let outcome = self.send(url, &upload).await;
        upload.remove();

        let body = outcome.map_err(|e| {
            error!("OCR relay failed: {:#}", e);
            RelayError::UpstreamProvider(format!("{:#}", e))
        })?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(
                "OCR provider returned non-JSON body ({} bytes): {}",
                body.len(),
                e
            );
            RelayError::InvalidUpstreamResponse("Invalid OCR provider response".to_string())
        })
    }

    async fn send(&self, url: &str, upload: &TempUpload) -> Result<String> {
        let file = tokio::fs::File::open(upload.path())
            .await
            .with_context(|| format!("Failed to open {}", upload.path().display()))?;

        let mut part = Part::stream_with_length(Body::from(file), upload.size())
            .file_name(upload.file_name().to_string());
        if let Some(content_type) = upload.content_type() {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("file", part);

        info!(
            "Relaying {} ({} bytes) to OCR provider",
            upload.file_name(),
            upload.size()
        );

        let mut request = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .multipart(form);
        if let Some(client_id) = &self.config.client_id {
            request = request.header("CLIENT-ID", client_id);
        }
        if let Some(authorization) = &self.config.authorization {
            request = request.header("AUTHORIZATION", authorization);
        }

        let resp = request
            .send()
            .await
            .context("OCR provider request failed")?;

        let status = resp.status();
        if !status.is_success() {
            warn!("OCR provider answered {}", status);
        }

        let text = resp
            .text()
            .await
            .context("Failed to read OCR provider response")?;
        debug!(
            "OCR provider response ({} bytes): {}",
            text.len(),
            text.chars().take(500).collect::<String>()
        );
        Ok(text)
    }
}
