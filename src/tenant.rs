//! Tenant Registry — resolves a license key to an active tenant.
//!
//! Format validation happens before any storage lookup, and the status
//! check runs on every call. Resolved customers are cached for a few
//! seconds only, so operational suspension takes effect almost
//! immediately without hitting the database on every request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::GatewayError;
use crate::models::tenant::{Customer, InstanceSighting, TenantStatus};
use crate::store::TenantStore;

/// `SNOW-ENT-XXXX-XXXX` for end customers, `SNOW-MSP-XXXX-XXXX` for
/// service-integrator master keys. Segments are 2-12 of [A-Z0-9].
static LICENSE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SNOW-(ENT|MSP)-[A-Z0-9]{2,12}-[A-Z0-9]{2,12}$").unwrap()
});

pub fn is_valid_license_format(key: &str) -> bool {
    LICENSE_KEY_RE.is_match(key)
}

pub fn is_master_key(key: &str) -> bool {
    key.starts_with("SNOW-MSP-") && is_valid_license_format(key)
}

/// Issue a new license key. Ambiguous characters (0/O, 1/I/L) are left
/// out of the segments so keys survive being read over the phone.
pub fn generate_license_key(master: bool) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

    fn segment(rng: &mut impl rand::Rng) -> String {
        (0..4)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    }

    let mut rng = rand::thread_rng();
    format!(
        "SNOW-{}-{}-{}",
        if master { "MSP" } else { "ENT" },
        segment(&mut rng),
        segment(&mut rng)
    )
}

struct CacheEntry {
    customer: Customer,
    expires_at: Instant,
}

pub struct TenantRegistry {
    store: Arc<dyn TenantStore>,
    cache: DashMap<String, CacheEntry>,
    cache_ttl: Duration,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn TenantStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    /// Resolve a license key to an active customer.
    ///
    /// Malformed keys are rejected without touching the store. Suspended
    /// and churned tenants fail closed even when served from cache — the
    /// cached row carries the status and the TTL bounds how stale it can
    /// be.
    pub async fn resolve_license(&self, key: &str) -> Result<Customer, GatewayError> {
        if !is_valid_license_format(key) {
            return Err(GatewayError::InvalidLicenseFormat);
        }

        if let Some(entry) = self.cache.get(key) {
            if Instant::now() < entry.expires_at {
                return Self::check_status(entry.customer.clone());
            }
            drop(entry);
            self.cache.remove(key);
        }

        let customer = self
            .store
            .customer_by_license(key)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::LicenseNotFound)?;

        self.cache.insert(
            key.to_string(),
            CacheEntry {
                customer: customer.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );

        Self::check_status(customer)
    }

    fn check_status(customer: Customer) -> Result<Customer, GatewayError> {
        match customer.status {
            TenantStatus::Active => Ok(customer),
            status => Err(GatewayError::forbidden(status)),
        }
    }

    /// Record a client-process sighting. Best-effort: failures are logged
    /// and swallowed, a broken instance table must not break tool calls.
    pub async fn record_sighting(&self, sighting: InstanceSighting) {
        if let Err(e) = self.store.upsert_instance(&sighting).await {
            tracing::warn!(
                instance_id = %sighting.instance_id,
                "failed to upsert instance sighting: {}",
                e
            );
        }
    }

    /// Drop a cached entry (used by tests and by operator status flips).
    pub fn invalidate(&self, key: &str) {
        self.cache.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct SpyStore {
        lookups: AtomicUsize,
        customer: Option<Customer>,
    }

    #[async_trait]
    impl TenantStore for SpyStore {
        async fn customer_by_license(&self, _key: &str) -> anyhow::Result<Option<Customer>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.customer.clone())
        }

        async fn upsert_instance(&self, _s: &InstanceSighting) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn customer(status: TenantStatus) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            service_integrator_id: None,
            name: "Acme".into(),
            license_key: "SNOW-ENT-ACME-1234".into(),
            status,
            theme: None,
            total_api_calls: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_license_format() {
        assert!(is_valid_license_format("SNOW-ENT-ACME-1234"));
        assert!(is_valid_license_format("SNOW-MSP-GLOBEX-77"));
        assert!(!is_valid_license_format("snow-ent-acme-1234"));
        assert!(!is_valid_license_format("SNOW-ENT-ACME"));
        assert!(!is_valid_license_format("SNOW-DEV-ACME-1234"));
        assert!(!is_valid_license_format("SNOW-ENT-ACME-1234-EXTRA"));
        assert!(!is_valid_license_format(""));
        assert!(is_master_key("SNOW-MSP-GLOBEX-77"));
        assert!(!is_master_key("SNOW-ENT-ACME-1234"));
    }

    #[test]
    fn test_generated_keys_are_valid() {
        for _ in 0..50 {
            assert!(is_valid_license_format(&generate_license_key(false)));
            assert!(is_master_key(&generate_license_key(true)));
        }
    }

    #[tokio::test]
    async fn test_malformed_key_never_touches_store() {
        let store = Arc::new(SpyStore {
            lookups: AtomicUsize::new(0),
            customer: None,
        });
        let registry = TenantRegistry::new(store.clone(), Duration::from_secs(5));

        for key in ["", "garbage", "SNOW-ENT-acme-1", "PREFIX-ENT-AAAA-BBBB"] {
            let err = registry.resolve_license(key).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidLicenseFormat));
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let store = Arc::new(SpyStore {
            lookups: AtomicUsize::new(0),
            customer: None,
        });
        let registry = TenantRegistry::new(store, Duration::from_secs(5));
        let err = registry
            .resolve_license("SNOW-ENT-NOPE-0000")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::LicenseNotFound));
    }

    #[tokio::test]
    async fn test_suspended_customer_is_forbidden() {
        let store = Arc::new(SpyStore {
            lookups: AtomicUsize::new(0),
            customer: Some(customer(TenantStatus::Suspended)),
        });
        let registry = TenantRegistry::new(store, Duration::from_secs(5));
        let err = registry
            .resolve_license("SNOW-ENT-ACME-1234")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::LicenseSuspended));
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl_and_expires() {
        let store = Arc::new(SpyStore {
            lookups: AtomicUsize::new(0),
            customer: Some(customer(TenantStatus::Active)),
        });
        let registry = TenantRegistry::new(store.clone(), Duration::from_millis(50));

        registry.resolve_license("SNOW-ENT-ACME-1234").await.unwrap();
        registry.resolve_license("SNOW-ENT-ACME-1234").await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.resolve_license("SNOW-ENT-ACME-1234").await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
