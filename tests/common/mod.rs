//! Shared in-memory fakes for integration tests: a store covering all
//! three persistence traits and a scriptable token client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use snowgate::models::credential::{
    CredentialType, CredentialUpsert, OAuthApp, Service, StoredCredential, TokenPair,
};
use snowgate::models::tenant::{Customer, InstanceSighting, TenantStatus};
use snowgate::models::usage::{UsageAggregate, UsageLogEntry, UsageRecord};
use snowgate::store::{CredentialStore, TenantStore, UsageStore};
use snowgate::vault::oauth::{TokenClient, TokenError, TokenGrant};

// ── In-memory store ───────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    pub customers: Mutex<Vec<Customer>>,
    pub credentials: Mutex<HashMap<(Uuid, Service), StoredCredential>>,
    pub usage: Mutex<Vec<UsageRecord>>,
    pub sightings: Mutex<Vec<InstanceSighting>>,
    pub customer_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn with_customer(status: TenantStatus) -> (Self, Customer) {
        let customer = Customer {
            id: Uuid::new_v4(),
            service_integrator_id: None,
            name: "Acme Corp".into(),
            license_key: "SNOW-ENT-ACME-1234".into(),
            status,
            theme: None,
            total_api_calls: 0,
            created_at: Utc::now(),
        };
        let store = MemoryStore::default();
        store.customers.lock().unwrap().push(customer.clone());
        (store, customer)
    }

    pub fn lookup_count(&self) -> usize {
        self.customer_lookups.load(Ordering::SeqCst)
    }

    pub fn credential_rows(&self) -> usize {
        self.credentials.lock().unwrap().len()
    }

    pub fn credential(&self, customer_id: Uuid, service: Service) -> Option<StoredCredential> {
        self.credentials
            .lock()
            .unwrap()
            .get(&(customer_id, service))
            .cloned()
    }

    pub fn seed_credential(&self, cred: StoredCredential) {
        self.credentials
            .lock()
            .unwrap()
            .insert((cred.customer_id, cred.service), cred);
    }

    pub fn usage_entries(&self) -> Vec<UsageRecord> {
        self.usage.lock().unwrap().clone()
    }
}

/// Builds an Active oauth2 credential row for seeding.
pub fn oauth_credential(
    customer_id: Uuid,
    service: Service,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<i64>,
) -> StoredCredential {
    StoredCredential {
        id: Uuid::new_v4(),
        customer_id,
        service,
        credential_type: CredentialType::Oauth2,
        tokens: Some(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(String::from),
        }),
        token_type: Some("Bearer".into()),
        expires_at,
        scope: None,
        base_url: "https://acme.atlassian.net".into(),
        identity: Some("ops@acme.test".into()),
        enabled: true,
        needs_reauth: false,
        last_refreshed: None,
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn customer_by_license(&self, license_key: &str) -> anyhow::Result<Option<Customer>> {
        self.customer_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.license_key == license_key)
            .cloned())
    }

    async fn upsert_instance(&self, sighting: &InstanceSighting) -> anyhow::Result<()> {
        let mut sightings = self.sightings.lock().unwrap();
        sightings.retain(|s| s.instance_id != sighting.instance_id);
        sightings.push(sighting.clone());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> anyhow::Result<Option<StoredCredential>> {
        Ok(self.credential(customer_id, service))
    }

    async fn upsert_credential(&self, upsert: &CredentialUpsert) -> anyhow::Result<()> {
        let mut creds = self.credentials.lock().unwrap();
        creds.insert(
            (upsert.customer_id, upsert.service),
            StoredCredential {
                id: Uuid::new_v4(),
                customer_id: upsert.customer_id,
                service: upsert.service,
                credential_type: upsert.credential_type,
                tokens: Some(TokenPair {
                    access_token: upsert.access_token.clone(),
                    refresh_token: upsert.refresh_token.clone(),
                }),
                token_type: upsert.token_type.clone(),
                expires_at: upsert.expires_at,
                scope: upsert.scope.clone(),
                base_url: upsert.base_url.clone(),
                identity: upsert.identity.clone(),
                enabled: true,
                needs_reauth: false,
                last_refreshed: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn mark_needs_reauth(&self, customer_id: Uuid, service: Service) -> anyhow::Result<()> {
        if let Some(cred) = self
            .credentials
            .lock()
            .unwrap()
            .get_mut(&(customer_id, service))
        {
            cred.tokens = None;
            cred.expires_at = None;
            cred.needs_reauth = true;
        }
        Ok(())
    }

    async fn set_credential_enabled(
        &self,
        customer_id: Uuid,
        service: Service,
        enabled: bool,
    ) -> anyhow::Result<()> {
        if let Some(cred) = self
            .credentials
            .lock()
            .unwrap()
            .get_mut(&(customer_id, service))
        {
            cred.enabled = enabled;
        }
        Ok(())
    }

    async fn delete_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> anyhow::Result<bool> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .remove(&(customer_id, service))
            .is_some())
    }

    async fn list_credentials(&self, customer_id: Uuid) -> anyhow::Result<Vec<StoredCredential>> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn insert_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.usage.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent_usage(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<UsageLogEntry>> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.customer_id == customer_id)
            .take(limit as usize)
            .map(|r| UsageLogEntry {
                id: Uuid::new_v4(),
                customer_id: r.customer_id,
                instance_id: r.instance_id.clone(),
                tool_name: r.tool_name.clone(),
                category: r.category.clone(),
                success: r.success,
                duration_ms: r.duration_ms,
                error_message: r.error_message.clone(),
                request_params: r.request_params.clone(),
                origin: r.origin.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn usage_by_tool(
        &self,
        customer_id: Uuid,
        _window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        Ok(aggregate(
            &self.usage.lock().unwrap(),
            customer_id,
            |r| r.tool_name.clone(),
        ))
    }

    async fn usage_by_category(
        &self,
        customer_id: Uuid,
        _window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        Ok(aggregate(
            &self.usage.lock().unwrap(),
            customer_id,
            |r| r.category.clone(),
        ))
    }
}

fn aggregate(
    records: &[UsageRecord],
    customer_id: Uuid,
    key: impl Fn(&UsageRecord) -> String,
) -> Vec<UsageAggregate> {
    let mut groups: HashMap<String, (i64, i64, i64)> = HashMap::new();
    for r in records.iter().filter(|r| r.customer_id == customer_id) {
        let entry = groups.entry(key(r)).or_default();
        entry.0 += 1;
        if !r.success {
            entry.1 += 1;
        }
        entry.2 += r.duration_ms as i64;
    }
    groups
        .into_iter()
        .map(|(group_key, (calls, failures, total_ms))| UsageAggregate {
            group_key,
            calls,
            failures,
            avg_duration_ms: total_ms as f64 / calls as f64,
        })
        .collect()
}

// ── Scriptable token client ───────────────────────────────────

pub enum TokenBehavior {
    /// Succeed with this access token after an optional delay.
    Grant { access_token: String, delay: Duration },
    /// Permanent rejection (revoked refresh token).
    InvalidGrant,
    /// Transient provider failure.
    ProviderError,
}

pub struct MockTokenClient {
    pub behavior: Mutex<TokenBehavior>,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
}

impl MockTokenClient {
    pub fn granting(access_token: &str, delay: Duration) -> Self {
        Self {
            behavior: Mutex::new(TokenBehavior::Grant {
                access_token: access_token.to_string(),
                delay,
            }),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            behavior: Mutex::new(TokenBehavior::InvalidGrant),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Mutex::new(TokenBehavior::ProviderError),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<TokenGrant, TokenError> {
        let (token, delay) = {
            match &*self.behavior.lock().unwrap() {
                TokenBehavior::Grant { access_token, delay } => {
                    (access_token.clone(), *delay)
                }
                TokenBehavior::InvalidGrant => {
                    return Err(TokenError::InvalidGrant("invalid_grant".into()))
                }
                TokenBehavior::ProviderError => {
                    return Err(TokenError::Provider("503 upstream down".into()))
                }
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(TokenGrant {
            access_token: token,
            refresh_token: Some("rotated-refresh".into()),
            token_type: Some("Bearer".into()),
            expires_in: Some(3600),
            scope: None,
        })
    }
}

#[async_trait]
impl TokenClient for MockTokenClient {
    async fn exchange_code(
        &self,
        _app: &OAuthApp,
        _base_url: &str,
        _code: &str,
    ) -> Result<TokenGrant, TokenError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await
    }

    async fn refresh(
        &self,
        _app: &OAuthApp,
        _base_url: &str,
        _refresh_token: &str,
    ) -> Result<TokenGrant, TokenError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await
    }
}

// ── OAuth app fixture ─────────────────────────────────────────

pub fn app_registrations() -> HashMap<Service, OAuthApp> {
    Service::ALL
        .into_iter()
        .map(|service| {
            (
                service,
                OAuthApp {
                    service,
                    client_id: format!("client-{}", service),
                    client_secret: "shhh".into(),
                    redirect_uri: format!(
                        "http://localhost:8443/credentials/{}/oauth-callback",
                        service
                    ),
                    scopes: "read write".into(),
                },
            )
        })
        .collect()
}

pub const TEST_STATE_KEY: [u8; 32] = [42u8; 32];
