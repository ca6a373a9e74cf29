use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::GatewayError;
use crate::AppState;

pub mod credentials;
pub mod mcp_handlers;
pub mod usage;

/// Build the gateway router. The OAuth callback is the only route not
/// authenticated by license key — the signed state parameter carries the
/// tenant identity there.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/mcp/tools/list", post(mcp_handlers::list_tools))
        .route("/mcp/tools/call", post(mcp_handlers::call_tool))
        .route("/credentials", get(credentials::list_credentials))
        .route(
            "/credentials/:service",
            post(credentials::store_static).delete(credentials::revoke),
        )
        .route("/credentials/:service/oauth-init", post(credentials::oauth_init))
        .route(
            "/credentials/:service/oauth-callback",
            get(credentials::oauth_callback),
        )
        .route("/credentials/:service/refresh", post(credentials::refresh))
        .route("/credentials/:service/test", post(credentials::test_credential))
        .route("/credentials/:service/enabled", post(credentials::set_enabled))
        .route("/usage/recent", get(usage::recent))
        .route("/usage/summary", get(usage::summary))
        .layer(TraceLayer::new_for_http())
}

/// Pull the license key out of `Authorization: Bearer <key>`.
/// A missing or non-bearer header is treated as a malformed key: same
/// 401, and no storage is touched either way.
pub fn bearer_license(headers: &HeaderMap) -> Result<String, GatewayError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::InvalidLicenseFormat)
}

pub fn instance_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-instance-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
}
