use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status shared by customers and service integrators.
/// Status is re-checked on every gateway call, so an operator flipping a
/// tenant to `Suspended` takes effect within one tenant-cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Churned,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Churned => "churned",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => TenantStatus::Suspended,
            "churned" => TenantStatus::Churned,
            _ => TenantStatus::Active,
        }
    }
}

/// A reseller / MSP tenant. Owns zero or more customers and authenticates
/// with a master (`SNOW-MSP-…`) license key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIntegrator {
    pub id: Uuid,
    pub company_name: String,
    pub license_key: String,
    pub white_label: bool,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
}

/// An end-customer tenant. The license key is the sole bearer credential
/// for the gateway and is immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub service_integrator_id: Option<Uuid>,
    pub name: String,
    pub license_key: String,
    pub status: TenantStatus,
    pub theme: Option<String>,
    pub total_api_calls: i64,
    pub created_at: DateTime<Utc>,
}

/// Ephemeral sighting of a running client process. Upserted on first
/// sighting, never deleted — stale rows are filtered by `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInstance {
    pub instance_id: String,
    pub customer_id: Uuid,
    pub version: Option<String>,
    pub origin: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// A fresh sighting to upsert. `last_seen` is set by the store.
#[derive(Debug, Clone)]
pub struct InstanceSighting {
    pub instance_id: String,
    pub customer_id: Uuid,
    pub version: Option<String>,
    pub origin: Option<String>,
}
