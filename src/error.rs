//! Error types for FitPub
//!
//! Federation failures are tagged as [`FederationError`] so callers can
//! branch on the kind (retry, reject, dead-letter). Everything else is
//! folded into [`AppError`], which implements `IntoResponse` for the
//! HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Federation error taxonomy
///
/// Cloneable so that a single key fetch result can be shared between
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FederationError {
    /// Key pair could not be generated or encoded
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// RSA signing of an outbound request failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// No key pair exists for the local actor
    #[error("No key pair provisioned for actor {0}")]
    KeyNotProvisioned(String),

    /// Signature header missing, incomplete or undecodable
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Date header outside the accepted clock-skew window
    #[error("Expired signature: {0}")]
    ExpiredSignature(String),

    /// Signature (or body digest) does not verify
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Remote key document could not be retrieved
    #[error("Failed to fetch key {key_id}: {reason}")]
    KeyFetch { key_id: String, reason: String },

    /// Remote key document or PEM could not be parsed
    #[error("Failed to parse key {key_id}: {reason}")]
    KeyParse { key_id: String, reason: String },

    /// WebFinger reports no such account
    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    /// WebFinger lookup failed or returned garbage
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Delivery failed but may succeed later
    #[error("Transient delivery failure: {0}")]
    TransientDelivery(String),

    /// Delivery failed and retrying would not help
    #[error("Permanent delivery failure: {0}")]
    PermanentDelivery(String),
}

impl FederationError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyGeneration(_) => "key_generation",
            Self::Signing(_) => "signing",
            Self::KeyNotProvisioned(_) => "key_not_provisioned",
            Self::MalformedSignature(_) => "malformed_signature",
            Self::ExpiredSignature(_) => "expired_signature",
            Self::SignatureMismatch(_) => "signature_mismatch",
            Self::KeyFetch { .. } => "key_fetch",
            Self::KeyParse { .. } => "key_parse",
            Self::ActorNotFound(_) => "actor_not_found",
            Self::Discovery(_) => "discovery",
            Self::TransientDelivery(_) => "transient_delivery",
            Self::PermanentDelivery(_) => "permanent_delivery",
        }
    }
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Federation error (status depends on the kind)
    #[error(transparent)]
    Federation(#[from] FederationError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            AppError::Federation(err) => {
                let status = match err {
                    FederationError::MalformedSignature(_)
                    | FederationError::ExpiredSignature(_)
                    | FederationError::SignatureMismatch(_)
                    | FederationError::KeyFetch { .. }
                    | FederationError::KeyParse { .. } => StatusCode::UNAUTHORIZED,
                    FederationError::ActorNotFound(_) | FederationError::KeyNotProvisioned(_) => {
                        StatusCode::NOT_FOUND
                    }
                    FederationError::Discovery(_)
                    | FederationError::TransientDelivery(_)
                    | FederationError::PermanentDelivery(_) => StatusCode::BAD_GATEWAY,
                    FederationError::KeyGeneration(_) | FederationError::Signing(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.kind())
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Internal details (database, config, anyhow chains) are logged but
    /// not echoed to the remote peer.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_type) = self.status_and_type();
        let error_message = match &self {
            AppError::Database(_) => "Database error".to_string(),
            AppError::Internal(_) | AppError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Request failed");
        } else {
            tracing::debug!(error = %self, error_type, "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
