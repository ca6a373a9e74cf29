//! Tool listing and execution endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{bearer_license, instance_id, request_origin};
use crate::errors::GatewayError;
use crate::gateway::{CallRequest, InlineCredentials};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallBody {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub credentials: Option<InlineCredentials>,
}

/// POST /mcp/tools/list
pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    let key = bearer_license(&headers)?;
    let tools = state
        .gateway
        .list_tools(
            &key,
            instance_id(&headers).as_deref(),
            request_origin(&headers).as_deref(),
        )
        .await?;

    let count = tools.len();
    Ok(Json(json!({
        "tools": tools,
        "count": count,
    })))
}

/// POST /mcp/tools/call
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CallBody>,
) -> Result<Json<Value>, GatewayError> {
    let key = bearer_license(&headers)?;

    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };

    let outcome = state
        .gateway
        .call(CallRequest {
            license_key: key,
            instance_id: instance_id(&headers),
            client_version: headers
                .get("x-client-version")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            origin: request_origin(&headers),
            tool: body.tool,
            arguments,
            credentials: body.credentials,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "tool": outcome.tool,
        "result": outcome.result,
        "usage": {
            "durationMs": outcome.duration_ms,
            "timestamp": outcome.timestamp,
        }
    })))
}
