//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::bus::BusError;
use crate::domain::{DomainError, Violation};
use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Mobile money account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction validation failed")]
    Validation(Vec<Violation>),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<Violation>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details, violations) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                Some(msg.clone()),
                None,
            ),

            // 404 Not Found
            AppError::TransactionNotFound(id) => (
                StatusCode::NOT_FOUND,
                "transaction_not_found",
                Some(id.clone()),
                None,
            ),
            AppError::AccountNotFound(id) => (
                StatusCode::NOT_FOUND,
                "account_not_found",
                Some(id.clone()),
                None,
            ),

            // 422 Unprocessable Entity, with the full violation list
            AppError::Validation(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_failed",
                None,
                Some(violations.clone()),
            ),

            // Domain errors map to 400
            AppError::Domain(domain_err) => (
                StatusCode::BAD_REQUEST,
                "domain_error",
                Some(domain_err.to_string()),
                None,
            ),

            // 502 Bad Gateway
            AppError::Gateway(e) => {
                tracing::error!("Gateway error: {:?}", e);
                (StatusCode::BAD_GATEWAY, "gateway_error", None, None)
            }

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None, None)
            }
            AppError::Bus(e) => {
                tracing::error!("Bus error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "bus_error", None, None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None, None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            violations,
        };

        (status, Json(body)).into_response()
    }
}
