use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::credential::Service;
use crate::models::tenant::TenantStatus;

/// The gateway error taxonomy. Everything a caller can observe maps to one
/// of these; responses carry only the error class and a fixed message.
/// License and credential errors are never retried by the gateway itself —
/// they require caller or operator action.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("license key is malformed")]
    InvalidLicenseFormat,

    #[error("license key not found")]
    LicenseNotFound,

    #[error("license is suspended")]
    LicenseSuspended,

    #[error("license is churned")]
    LicenseChurned,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("unknown tool: {name}")]
    ToolNotFound { name: String, known: Vec<String> },

    #[error("arguments failed schema validation: {0}")]
    InvalidArguments(String),

    #[error("credential for {service} requires re-authorization")]
    CredentialNeedsReauth { service: Service },

    #[error("tool execution timed out")]
    ExecutionTimeout,

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Error for a tenant whose status is no longer active.
    pub fn forbidden(status: TenantStatus) -> Self {
        match status {
            TenantStatus::Churned => GatewayError::LicenseChurned,
            _ => GatewayError::LicenseSuspended,
        }
    }

    /// Safe to retry with backoff; license/credential errors are not.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::ExecutionTimeout
        )
    }

    /// Stable machine-readable code, also used as the usage-log error tag.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidLicenseFormat => "invalid_license_format",
            GatewayError::LicenseNotFound => "license_not_found",
            GatewayError::LicenseSuspended => "license_suspended",
            GatewayError::LicenseChurned => "license_churned",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ToolNotFound { .. } => "tool_not_found",
            GatewayError::InvalidArguments(_) => "invalid_arguments",
            GatewayError::CredentialNeedsReauth { .. } => "credential_needs_reauth",
            GatewayError::ExecutionTimeout => "execution_timeout",
            GatewayError::ExecutionFailed(_) => "execution_failed",
            GatewayError::ExchangeFailed(_) => "exchange_failed",
            GatewayError::RefreshFailed(_) => "refresh_failed",
            GatewayError::Database(_) => "internal_server_error",
            GatewayError::Internal(_) => "internal_server_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, msg) = match &self {
            GatewayError::InvalidLicenseFormat => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "license key is malformed".to_string(),
            ),
            GatewayError::LicenseNotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid or unknown license key".to_string(),
            ),
            GatewayError::LicenseSuspended => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "license is suspended".to_string(),
            ),
            GatewayError::LicenseChurned => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "license is churned".to_string(),
            ),
            GatewayError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                format!("rate limit exceeded, retry in {}s", retry_after_secs),
            ),
            GatewayError::ToolNotFound { name, known } => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                format!("unknown tool '{}'. Known tools: {}", name, known.join(", ")),
            ),
            GatewayError::InvalidArguments(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                format!("arguments failed schema validation: {}", detail),
            ),
            GatewayError::CredentialNeedsReauth { service } => (
                StatusCode::CONFLICT,
                "credential_error",
                format!("{} credential requires re-authorization", service),
            ),
            GatewayError::ExecutionTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "tool execution timed out".to_string(),
            ),
            GatewayError::ExecutionFailed(e) => {
                tracing::warn!("tool execution failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "tool execution failed against the external service".to_string(),
                )
            }
            GatewayError::ExchangeFailed(e) => {
                tracing::warn!("oauth code exchange failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "credential_error",
                    "authorization code exchange failed".to_string(),
                )
            }
            GatewayError::RefreshFailed(e) => {
                tracing::warn!("token refresh failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "credential_error",
                    "token refresh failed".to_string(),
                )
            }
            GatewayError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
            GatewayError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let code = self.code();
        let body = Json(json!({
            "success": false,
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if let GatewayError::RateLimited { retry_after_secs } = self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
        }

        response
    }
}
