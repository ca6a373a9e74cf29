use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::credential::{
    CredentialType, CredentialUpsert, Service, StoredCredential, TokenPair,
};
use crate::models::tenant::{Customer, InstanceSighting, ServiceIntegrator, TenantStatus};
use crate::models::usage::{UsageAggregate, UsageLogEntry, UsageRecord};
use crate::store::{CredentialStore, TenantStore, UsageStore};
use crate::vault::crypto::VaultCrypto;

/// PostgreSQL store. Token material in `oauth_credentials` is envelope
/// encrypted; everything else is plain columns with hand-written SQL.
pub struct PgStore {
    pool: PgPool,
    crypto: VaultCrypto,
}

impl PgStore {
    pub async fn connect(database_url: &str, master_key_hex: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let crypto = VaultCrypto::new(master_key_hex)?;
        Ok(Self { pool, crypto })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Tenant provisioning (operator CLI) --

    pub async fn create_service_integrator(
        &self,
        company_name: &str,
        license_key: &str,
        white_label: bool,
    ) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO service_integrators (company_name, license_key, white_label) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(company_name)
        .bind(license_key)
        .bind(white_label)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn create_customer(
        &self,
        name: &str,
        license_key: &str,
        service_integrator_id: Option<Uuid>,
    ) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO customers (name, license_key, service_integrator_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(license_key)
        .bind(service_integrator_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_service_integrators(&self) -> anyhow::Result<Vec<ServiceIntegrator>> {
        let rows = sqlx::query_as::<_, IntegratorRow>(
            "SELECT id, company_name, license_key, white_label, status, created_at FROM service_integrators ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ServiceIntegrator::from).collect())
    }

    pub async fn list_customers(&self) -> anyhow::Result<Vec<Customer>> {
        let rows = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, service_integrator_id, name, license_key, status, theme, total_api_calls, created_at FROM customers ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Customer::from).collect())
    }

    pub async fn set_customer_status(
        &self,
        license_key: &str,
        status: TenantStatus,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE customers SET status = $1, updated_at = NOW() WHERE license_key = $2",
        )
        .bind(status.as_str())
        .bind(license_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Tenant Registry --

#[async_trait]
impl TenantStore for PgStore {
    async fn customer_by_license(&self, license_key: &str) -> anyhow::Result<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, service_integrator_id, name, license_key, status, theme, total_api_calls, created_at FROM customers WHERE license_key = $1",
        )
        .bind(license_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Customer::from))
    }

    async fn upsert_instance(&self, sighting: &InstanceSighting) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO customer_instances (instance_id, customer_id, version, origin, last_seen)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (instance_id)
               DO UPDATE SET version = EXCLUDED.version, origin = EXCLUDED.origin, last_seen = NOW()"#,
        )
        .bind(&sighting.instance_id)
        .bind(sighting.customer_id)
        .bind(&sighting.version)
        .bind(&sighting.origin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// -- Credential Vault --

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> anyhow::Result<Option<StoredCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"SELECT id, customer_id, service, credential_type, encrypted_dek, dek_nonce,
                      encrypted_secret, secret_nonce, token_type, expires_at, scope, base_url,
                      identity, enabled, needs_reauth, last_refreshed
               FROM oauth_credentials WHERE customer_id = $1 AND service = $2"#,
        )
        .bind(customer_id)
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decrypt_row(r)).transpose()
    }

    async fn upsert_credential(&self, upsert: &CredentialUpsert) -> anyhow::Result<()> {
        let material = serde_json::to_string(&TokenPair {
            access_token: upsert.access_token.clone(),
            refresh_token: upsert.refresh_token.clone(),
        })?;
        let (enc_dek, dek_nonce, enc_secret, secret_nonce) =
            self.crypto.encrypt_string(&material)?;

        sqlx::query(
            r#"INSERT INTO oauth_credentials
                   (customer_id, service, credential_type, encrypted_dek, dek_nonce,
                    encrypted_secret, secret_nonce, token_type, expires_at, scope, base_url,
                    identity, enabled, needs_reauth, last_refreshed)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, TRUE, FALSE, NOW())
               ON CONFLICT (customer_id, service)
               DO UPDATE SET credential_type = EXCLUDED.credential_type,
                             encrypted_dek = EXCLUDED.encrypted_dek,
                             dek_nonce = EXCLUDED.dek_nonce,
                             encrypted_secret = EXCLUDED.encrypted_secret,
                             secret_nonce = EXCLUDED.secret_nonce,
                             token_type = EXCLUDED.token_type,
                             expires_at = EXCLUDED.expires_at,
                             scope = EXCLUDED.scope,
                             base_url = EXCLUDED.base_url,
                             identity = EXCLUDED.identity,
                             enabled = TRUE,
                             needs_reauth = FALSE,
                             last_refreshed = NOW(),
                             updated_at = NOW()"#,
        )
        .bind(upsert.customer_id)
        .bind(upsert.service.as_str())
        .bind(upsert.credential_type.as_str())
        .bind(&enc_dek)
        .bind(&dek_nonce)
        .bind(&enc_secret)
        .bind(&secret_nonce)
        .bind(&upsert.token_type)
        .bind(upsert.expires_at)
        .bind(&upsert.scope)
        .bind(&upsert.base_url)
        .bind(&upsert.identity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_needs_reauth(&self, customer_id: Uuid, service: Service) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE oauth_credentials
               SET encrypted_dek = NULL, dek_nonce = NULL,
                   encrypted_secret = NULL, secret_nonce = NULL,
                   expires_at = NULL, needs_reauth = TRUE, updated_at = NOW()
               WHERE customer_id = $1 AND service = $2"#,
        )
        .bind(customer_id)
        .bind(service.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_credential_enabled(
        &self,
        customer_id: Uuid,
        service: Service,
        enabled: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE oauth_credentials SET enabled = $1, updated_at = NOW() WHERE customer_id = $2 AND service = $3",
        )
        .bind(enabled)
        .bind(customer_id)
        .bind(service.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> anyhow::Result<bool> {
        let result =
            sqlx::query("DELETE FROM oauth_credentials WHERE customer_id = $1 AND service = $2")
                .bind(customer_id)
                .bind(service.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_credentials(&self, customer_id: Uuid) -> anyhow::Result<Vec<StoredCredential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"SELECT id, customer_id, service, credential_type, encrypted_dek, dek_nonce,
                      encrypted_secret, secret_nonce, token_type, expires_at, scope, base_url,
                      identity, enabled, needs_reauth, last_refreshed
               FROM oauth_credentials WHERE customer_id = $1 ORDER BY service"#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| self.decrypt_row(r)).collect()
    }
}

impl PgStore {
    fn decrypt_row(&self, row: CredentialRow) -> anyhow::Result<StoredCredential> {
        let tokens = match (
            &row.encrypted_dek,
            &row.dek_nonce,
            &row.encrypted_secret,
            &row.secret_nonce,
        ) {
            (Some(dek), Some(dn), Some(sec), Some(sn)) => {
                let material = self.crypto.decrypt_string(dek, dn, sec, sn)?;
                Some(serde_json::from_str::<TokenPair>(&material)?)
            }
            _ => None,
        };

        let service = Service::parse(&row.service)
            .ok_or_else(|| anyhow::anyhow!("unknown service in credential row: {}", row.service))?;

        Ok(StoredCredential {
            id: row.id,
            customer_id: row.customer_id,
            service,
            credential_type: CredentialType::parse(&row.credential_type),
            tokens,
            token_type: row.token_type,
            expires_at: row.expires_at,
            scope: row.scope,
            base_url: row.base_url.unwrap_or_default(),
            identity: row.identity,
            enabled: row.enabled,
            needs_reauth: row.needs_reauth,
            last_refreshed: row.last_refreshed,
        })
    }
}

// -- Usage Metering --

#[async_trait]
impl UsageStore for PgStore {
    async fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_logs
                   (customer_id, instance_id, tool_name, category, success, duration_ms,
                    error_message, request_params, origin)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(record.customer_id)
        .bind(&record.instance_id)
        .bind(&record.tool_name)
        .bind(&record.category)
        .bind(record.success)
        .bind(record.duration_ms)
        .bind(&record.error_message)
        .bind(&record.request_params)
        .bind(&record.origin)
        .execute(&self.pool)
        .await?;

        // Running per-customer counter; the usage log stays append-only.
        sqlx::query(
            "UPDATE customers SET total_api_calls = total_api_calls + 1 WHERE id = $1",
        )
        .bind(record.customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_usage(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<UsageLogEntry>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"SELECT id, customer_id, instance_id, tool_name, category, success, duration_ms,
                      error_message, request_params, origin, created_at
               FROM usage_logs WHERE customer_id = $1
               ORDER BY created_at DESC LIMIT $2"#,
        )
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UsageLogEntry::from).collect())
    }

    async fn usage_by_tool(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        let rows = sqlx::query_as::<_, UsageAggregate>(
            r#"SELECT tool_name AS group_key,
                      COUNT(*) AS calls,
                      COUNT(*) FILTER (WHERE NOT success) AS failures,
                      COALESCE(AVG(duration_ms), 0)::FLOAT8 AS avg_duration_ms
               FROM usage_logs
               WHERE customer_id = $1 AND created_at > NOW() - ($2 || ' hours')::INTERVAL
               GROUP BY tool_name ORDER BY calls DESC"#,
        )
        .bind(customer_id)
        .bind(window_hours.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn usage_by_category(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        let rows = sqlx::query_as::<_, UsageAggregate>(
            r#"SELECT category AS group_key,
                      COUNT(*) AS calls,
                      COUNT(*) FILTER (WHERE NOT success) AS failures,
                      COALESCE(AVG(duration_ms), 0)::FLOAT8 AS avg_duration_ms
               FROM usage_logs
               WHERE customer_id = $1 AND created_at > NOW() - ($2 || ' hours')::INTERVAL
               GROUP BY category ORDER BY calls DESC"#,
        )
        .bind(customer_id)
        .bind(window_hours.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// -- Row types --

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    service_integrator_id: Option<Uuid>,
    name: String,
    license_key: String,
    status: String,
    theme: Option<String>,
    total_api_calls: i64,
    created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(r: CustomerRow) -> Self {
        Customer {
            id: r.id,
            service_integrator_id: r.service_integrator_id,
            name: r.name,
            license_key: r.license_key,
            status: TenantStatus::parse(&r.status),
            theme: r.theme,
            total_api_calls: r.total_api_calls,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IntegratorRow {
    id: Uuid,
    company_name: String,
    license_key: String,
    white_label: bool,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<IntegratorRow> for ServiceIntegrator {
    fn from(r: IntegratorRow) -> Self {
        ServiceIntegrator {
            id: r.id,
            company_name: r.company_name,
            license_key: r.license_key,
            white_label: r.white_label,
            status: TenantStatus::parse(&r.status),
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    customer_id: Uuid,
    service: String,
    credential_type: String,
    encrypted_dek: Option<Vec<u8>>,
    dek_nonce: Option<Vec<u8>>,
    encrypted_secret: Option<Vec<u8>>,
    secret_nonce: Option<Vec<u8>>,
    token_type: Option<String>,
    expires_at: Option<i64>,
    scope: Option<String>,
    base_url: Option<String>,
    identity: Option<String>,
    enabled: bool,
    needs_reauth: bool,
    last_refreshed: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: Uuid,
    customer_id: Uuid,
    instance_id: Option<String>,
    tool_name: String,
    category: String,
    success: bool,
    duration_ms: i32,
    error_message: Option<String>,
    request_params: Option<serde_json::Value>,
    origin: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UsageRow> for UsageLogEntry {
    fn from(r: UsageRow) -> Self {
        UsageLogEntry {
            id: r.id,
            customer_id: r.customer_id,
            instance_id: r.instance_id,
            tool_name: r.tool_name,
            category: r.category,
            success: r.success,
            duration_ms: r.duration_ms,
            error_message: r.error_message,
            request_params: r.request_params,
            origin: r.origin,
            created_at: r.created_at,
        }
    }
}
