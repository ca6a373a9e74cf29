pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::credential::{CredentialUpsert, Service, StoredCredential};
use crate::models::tenant::{Customer, InstanceSighting};
use crate::models::usage::{UsageAggregate, UsageLogEntry, UsageRecord};

/// Lookup side of the Tenant Registry. Implemented by `PgStore`; tests use
/// in-memory fakes to prove, among other things, that malformed license
/// keys never reach storage.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn customer_by_license(&self, license_key: &str) -> anyhow::Result<Option<Customer>>;

    /// Upsert a client-process sighting. Callers treat failures as
    /// non-fatal; tracking is observability, not correctness.
    async fn upsert_instance(&self, sighting: &InstanceSighting) -> anyhow::Result<()>;
}

/// Persistence for the Credential Vault. One row per (customer, service);
/// all writes are upserts on that pair.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> anyhow::Result<Option<StoredCredential>>;

    async fn upsert_credential(&self, upsert: &CredentialUpsert) -> anyhow::Result<()>;

    /// Clear token material but keep configuration (base_url, identity) so
    /// the tenant can re-authorize without re-entering metadata.
    async fn mark_needs_reauth(&self, customer_id: Uuid, service: Service) -> anyhow::Result<()>;

    async fn set_credential_enabled(
        &self,
        customer_id: Uuid,
        service: Service,
        enabled: bool,
    ) -> anyhow::Result<()>;

    /// Idempotent delete; returns whether a row existed.
    async fn delete_credential(&self, customer_id: Uuid, service: Service)
        -> anyhow::Result<bool>;

    async fn list_credentials(&self, customer_id: Uuid) -> anyhow::Result<Vec<StoredCredential>>;
}

/// Append-only usage log plus its read views.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()>;

    async fn recent_usage(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<UsageLogEntry>>;

    async fn usage_by_tool(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>>;

    async fn usage_by_category(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>>;
}
