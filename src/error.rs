//! Client-facing error taxonomy.
//!
//! Handlers return [`RelayError`]; the `IntoResponse` impl turns it into a
//! JSON body `{ "error": ..., "details"?: ... }` with the matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bad user input.
    #[error("{0}")]
    Validation(String),

    /// No usable spreadsheet credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Missing or malformed server configuration.
    #[error("{0}")]
    Configuration(String),

    /// The identity provider rejected or failed an authorization call.
    #[error("{0}")]
    AuthProvider(String),

    /// The OCR or spreadsheet provider call failed.
    #[error("{0}")]
    UpstreamProvider(String),

    /// A provider answered with something we could not parse.
    #[error("{0}")]
    InvalidUpstreamResponse(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Configuration(_)
            | Self::AuthProvider(_)
            | Self::UpstreamProvider(_)
            | Self::InvalidUpstreamResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Configuration(_) => "configuration",
            Self::AuthProvider(_) => "auth_provider",
            Self::UpstreamProvider(_) => "upstream_provider",
            Self::InvalidUpstreamResponse(_) => "invalid_upstream_response",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(msg)
            | Self::UpstreamProvider(msg)
            | Self::InvalidUpstreamResponse(msg) => json!({ "error": msg }),
            Self::Unauthenticated(msg) => json!({
                "error": "Not authenticated",
                "details": msg,
            }),
            Self::Configuration(msg) | Self::AuthProvider(msg) => {
                error!(kind = self.kind(), "{}", msg);
                json!({
                    "error": "Internal server error",
                    "details": msg,
                })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::Configuration("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::AuthProvider("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_is_message() {
        let err = RelayError::InvalidUpstreamResponse("Invalid OCR provider response".into());
        assert_eq!(err.to_string(), "Invalid OCR provider response");
    }
}
