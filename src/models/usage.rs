use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of one gateway invocation. Written for every outcome
/// (success, business error, timeout, rate-limited) and never mutated.
/// `request_params` holds the caller's arguments after redaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub instance_id: Option<String>,
    pub tool_name: String,
    pub category: String,
    pub success: bool,
    pub duration_ms: i32,
    pub error_message: Option<String>,
    pub request_params: Option<serde_json::Value>,
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A usage record ready to persist; `id`/`created_at` are assigned by the
/// store on insert.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub customer_id: Uuid,
    pub instance_id: Option<String>,
    pub tool_name: String,
    pub category: String,
    pub success: bool,
    pub duration_ms: i32,
    pub error_message: Option<String>,
    pub request_params: Option<serde_json::Value>,
    pub origin: Option<String>,
}

/// Aggregated counts for the dashboard view, grouped by tool or category
/// over a trailing window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UsageAggregate {
    pub group_key: String,
    pub calls: i64,
    pub failures: i64,
    pub avg_duration_ms: f64,
}
