//! Error taxonomy and its HTTP mapping.
//!
//! Every webhook rejection is a client error with a machine-readable `code`.
//! Storage failures while recording are never turned into a `BounceError`:
//! the sink logs and counts them instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::providers::signature::SignatureError;
use crate::store::StoreError;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum BounceError {
    /// Unknown path segment, or a provider that is disabled
    #[error("unknown bounce service")]
    UnknownService,

    /// Body or nested message could not be parsed
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid signature: {0}")]
    Signature(#[from] SignatureError),

    /// Credential check failed (providers that authenticate with credentials
    /// rather than a signature)
    #[error("unauthorized")]
    Unauthorized,

    /// Missing or wrong admin token on an `/api` route
    #[error("admin authentication required")]
    AdminUnauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Subscription confirmation could not be completed
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invalid id")]
    InvalidId,

    #[error("bounce not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

impl BounceError {
    pub fn status(&self) -> StatusCode {
        match self {
            BounceError::NotFound => StatusCode::NOT_FOUND,
            BounceError::AdminUnauthorized => StatusCode::UNAUTHORIZED,
            BounceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BounceError::UnknownService => "unknown_service",
            BounceError::InvalidData(_) => "invalid_data",
            BounceError::Signature(_) => "invalid_signature",
            BounceError::Unauthorized | BounceError::AdminUnauthorized => "unauthorized",
            BounceError::Validation(_) => "invalid_field",
            BounceError::Handshake(_) => "handshake_failed",
            BounceError::InvalidId => "invalid_id",
            BounceError::NotFound => "not_found",
            BounceError::Storage(_) => "storage_error",
        }
    }

    pub fn invalid_data(err: impl std::fmt::Display) -> Self {
        BounceError::InvalidData(err.to_string())
    }
}

impl From<StoreError> for BounceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => BounceError::NotFound,
            StoreError::Backend(msg) => BounceError::Storage(msg),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for BounceError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "error",
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_rejections_are_client_errors() {
        let errors = [
            BounceError::UnknownService,
            BounceError::invalid_data("eof"),
            BounceError::Signature(SignatureError::Mismatch),
            BounceError::Unauthorized,
            BounceError::Validation(ValidationError::MissingIdentity),
            BounceError::Handshake("timeout".to_string()),
        ];

        for err in errors {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn test_signature_and_payload_errors_have_distinct_codes() {
        assert_eq!(BounceError::Signature(SignatureError::Mismatch).code(), "invalid_signature");
        assert_eq!(BounceError::invalid_data("bad json").code(), "invalid_data");
    }

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(BounceError::from(StoreError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(BounceError::AdminUnauthorized.status(), StatusCode::UNAUTHORIZED);
        let err = BounceError::from(StoreError::Backend("down".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "storage_error");
    }

    #[test]
    fn test_validation_message_is_passed_through() {
        let err = BounceError::from(ValidationError::InvalidEmail("invalid email: x".to_string()));
        assert_eq!(err.to_string(), "invalid email: x");
    }
}
