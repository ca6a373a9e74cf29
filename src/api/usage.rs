//! Usage read views: raw recent entries and aggregated summaries.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::bearer_license;
use crate::errors::GatewayError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /usage/recent
pub async fn recent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<RecentParams>,
) -> Result<Json<Value>, GatewayError> {
    let key = bearer_license(&headers)?;
    let customer = state.gateway.tenants().resolve_license(&key).await?;

    let entries = state
        .gateway
        .meter()
        .recent(customer.id, params.limit)
        .await
        .map_err(GatewayError::Internal)?;

    let count = entries.len();
    Ok(Json(json!({ "entries": entries, "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    /// "tool" (default) or "category".
    #[serde(default = "default_group")]
    pub by: String,
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_group() -> String {
    "tool".to_string()
}

fn default_hours() -> i64 {
    24
}

/// GET /usage/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> Result<Json<Value>, GatewayError> {
    let key = bearer_license(&headers)?;
    let customer = state.gateway.tenants().resolve_license(&key).await?;

    let groups = match params.by.as_str() {
        "category" => state
            .gateway
            .meter()
            .by_category(customer.id, params.hours)
            .await,
        "tool" => state.gateway.meter().by_tool(customer.id, params.hours).await,
        other => {
            return Err(GatewayError::InvalidArguments(format!(
                "unknown grouping '{}'; expected 'tool' or 'category'",
                other
            )))
        }
    }
    .map_err(GatewayError::Internal)?;

    Ok(Json(json!({
        "by": params.by,
        "windowHours": params.hours,
        "groups": groups,
    })))
}
