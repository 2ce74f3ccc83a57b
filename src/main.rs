//! Receipt Relay - forwards receipt images to an OCR provider and appends
//! expense rows to a Google Sheet.

mod api;
mod config;
mod credentials;
mod error;
mod expense;
mod google;
mod oauth_flow;
mod ocr;
mod token_store;
mod upload;

use api::AppState;
use config::RelayConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "receipt_relay=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env()?;
    info!(
        "Config loaded: oauth={}, service_account={}, ocr={}",
        config.oauth.is_some(),
        config.service_account_json.is_some(),
        config.ocr.api_url.is_some()
    );

    let state = AppState::from_config(&config, reqwest::Client::new());

    // Warm the Sheets client; not being ready yet is fine
    match state.resolver.authorized_client().await {
        Ok(client) => info!("Google Sheets client ready (auth={})", client.auth_name()),
        Err(e) => warn!("Sheets client not ready at startup: {}", e),
    }

    let app = api::router(state, config.static_dir.clone());

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
