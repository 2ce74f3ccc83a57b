//! HTTP surface: router, shared state and request handlers.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::credentials::CredentialResolver;
use crate::error::RelayError;
use crate::expense::{ExpenseRecord, SheetAppender};
use crate::google::oauth::OAuthClient;
use crate::ocr::OcrRelay;
use crate::oauth_flow::{FlowState, OAuthFlow};
use crate::token_store::TokenStore;
use crate::upload::TempUpload;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<OcrRelay>,
    pub appender: Arc<SheetAppender>,
    pub resolver: Arc<CredentialResolver>,
    /// `None` when no OAuth client is configured.
    pub oauth_flow: Option<Arc<OAuthFlow>>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    /// Wire every component from configuration around one shared HTTP client.
    pub fn from_config(config: &RelayConfig, client: reqwest::Client) -> Self {
        let token_store = Arc::new(TokenStore::from_config(config));
        let oauth = config
            .oauth
            .as_ref()
            .map(|o| Arc::new(OAuthClient::new(client.clone(), o, &config.google)));

        let resolver = Arc::new(CredentialResolver::new(
            client.clone(),
            config,
            oauth.clone(),
            token_store.clone(),
        ));

        let oauth_flow = match (oauth, &config.oauth) {
            (Some(oauth), Some(o)) => Some(Arc::new(OAuthFlow::new(
                oauth,
                resolver.clone(),
                token_store,
                o.success_redirect.clone(),
            ))),
            _ => None,
        };

        Self {
            relay: Arc::new(OcrRelay::new(client, config.ocr.clone())),
            appender: Arc::new(SheetAppender::new(resolver.clone(), &config.sheets)),
            resolver,
            oauth_flow,
            upload_dir: Arc::new(config.upload_dir.clone()),
        }
    }
}

pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/api/append", post(append_row))
        .route("/api/auth", get(auth_start))
        .route("/oauth2callback", get(oauth_callback))
        .route("/api/auth-status", get(auth_status))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024)) // 25MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 302 Found, which is what browsers expect from an OAuth hop.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

/// Relay an uploaded receipt to the OCR provider.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, RelayError> {
    let upload = TempUpload::from_multipart(&mut multipart, "file", &state.upload_dir)
        .await?
        .ok_or_else(|| RelayError::Validation("No file uploaded".to_string()))?;

    info!(
        "Received upload: {} ({} bytes)",
        upload.file_name(),
        upload.size()
    );

    state.relay.relay(upload).await.map(Json)
}

/// Append one expense row to the spreadsheet.
async fn append_row(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    let record = match body {
        Ok(Json(value)) => ExpenseRecord::from_value(value),
        Err(rejection) => {
            debug!("Unreadable append body: {}", rejection);
            ExpenseRecord::default()
        }
    };

    let updates = state.appender.append(record).await?;
    Ok(Json(json!({ "success": true, "updates": updates })))
}

/// Redirect the browser to the consent page.
async fn auth_start(State(state): State<AppState>) -> Response {
    let Some(flow) = &state.oauth_flow else {
        error!("Missing GOOGLE_OAUTH_CLIENT_ID or GOOGLE_OAUTH_CLIENT_SECRET");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "OAuth client not configured" })),
        )
            .into_response();
    };

    match flow.start().await {
        Ok(url) => found(&url),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// Provider redirect target after consent.
async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing code").into_response();
    };

    let Some(flow) = &state.oauth_flow else {
        error!("OAuth callback received but no OAuth client is configured");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response();
    };

    match flow.complete(&code).await {
        Ok(landing) => found(landing),
        // Details are logged by the flow, never sent to the browser
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response(),
    }
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow: Option<FlowState>,
}

/// Report whether a Sheets client can be resolved right now.
async fn auth_status(State(state): State<AppState>) -> Json<AuthStatus> {
    let flow = match &state.oauth_flow {
        Some(flow) => Some(flow.state().await),
        None => None,
    };

    let status = match state.resolver.authorized_client().await {
        Ok(_) => AuthStatus {
            authenticated: true,
            error: None,
            flow,
        },
        Err(e) => AuthStatus {
            authenticated: false,
            error: Some(e.to_string()),
            flow,
        },
    };
    Json(status)
}
