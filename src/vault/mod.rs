//! Credential Vault — stores, issues, and refreshes third-party
//! credentials per (customer, service) pair.
//!
//! Lifecycle per pair: Unconfigured → AuthorizationPending → Active →
//! (RefreshInFlight) → Active | NeedsReauth. `AuthorizationPending` is
//! stateless: the signed `state` parameter carries everything, so
//! abandoned flows leave no rows behind.

pub mod crypto;
pub mod oauth;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::models::credential::{
    CredentialSummary, CredentialTuple, CredentialType, CredentialUpsert, OAuthApp, Service,
    StoredCredential,
};
use crate::store::CredentialStore;
use oauth::{AuthState, TokenClient, TokenError};

pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenClient>,
    /// Per-service app registrations; immutable after boot.
    apps: HashMap<Service, OAuthApp>,
    /// Single-flight guards keyed by (customer, service). Refreshes for
    /// different pairs proceed fully in parallel; the lock covers only
    /// the refresh call, never downstream tool execution.
    refresh_guards: DashMap<(Uuid, Service), Arc<Mutex<()>>>,
    state_key: [u8; 32],
    skew_ms: i64,
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenClient>,
        apps: HashMap<Service, OAuthApp>,
        state_key: [u8; 32],
        skew_ms: i64,
    ) -> Self {
        Self {
            store,
            tokens,
            apps,
            refresh_guards: DashMap::new(),
            state_key,
            skew_ms,
        }
    }

    fn app(&self, service: Service) -> Result<&OAuthApp, GatewayError> {
        self.apps.get(&service).ok_or_else(|| {
            GatewayError::InvalidArguments(format!(
                "no OAuth application registered for {}",
                service
            ))
        })
    }

    /// Build the provider authorization URL with a signed state token.
    /// Persists nothing; the row is created when the callback arrives.
    pub fn initiate_authorization(
        &self,
        customer_id: Uuid,
        service: Service,
        base_url: &str,
        identity: Option<String>,
    ) -> Result<String, GatewayError> {
        let app = self.app(service)?;

        let state = AuthState {
            customer_id,
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
            issued_at: Utc::now().timestamp(),
        };
        let state_token =
            oauth::sign_state(&self.state_key, &state).map_err(GatewayError::Internal)?;

        let mut url = url::Url::parse(&oauth::authorize_endpoint(service, base_url))
            .map_err(|e| GatewayError::Internal(e.into()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &app.client_id)
            .append_pair("redirect_uri", &app.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &app.scopes)
            .append_pair("state", &state_token);
        if matches!(service, Service::Jira | Service::Confluence) {
            url.query_pairs_mut()
                .append_pair("audience", "api.atlassian.com")
                .append_pair("prompt", "consent");
        }

        Ok(url.to_string())
    }

    /// Exchange the provider callback for tokens and upsert the row as
    /// Active. Rejected codes (expired, reused) surface as
    /// `ExchangeFailed`.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state_token: &str,
    ) -> Result<(Uuid, Service), GatewayError> {
        let state = oauth::verify_state(&self.state_key, state_token, Utc::now().timestamp())
            .map_err(|e| GatewayError::ExchangeFailed(e.to_string()))?;
        let app = self.app(state.service)?;

        let grant = self
            .tokens
            .exchange_code(app, &state.base_url, code)
            .await
            .map_err(|e| GatewayError::ExchangeFailed(e.to_string()))?;

        let now_ms = Utc::now().timestamp_millis();
        self.store
            .upsert_credential(&CredentialUpsert {
                customer_id: state.customer_id,
                service: state.service,
                credential_type: CredentialType::Oauth2,
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                token_type: grant.token_type.or_else(|| Some("Bearer".into())),
                expires_at: grant.expires_in.map(|s| now_ms + s * 1000),
                scope: grant.scope.or_else(|| Some(app.scopes.clone())),
                base_url: state.base_url.clone(),
                identity: state.identity.clone(),
            })
            .await
            .map_err(GatewayError::Internal)?;

        tracing::info!(
            customer_id = %state.customer_id,
            service = %state.service,
            "oauth authorization completed"
        );
        Ok((state.customer_id, state.service))
    }

    /// Store an api_token/basic credential directly as Active. Upsert:
    /// calling twice with the same input leaves exactly one row.
    pub async fn store_static_credential(
        &self,
        customer_id: Uuid,
        service: Service,
        credential_type: CredentialType,
        secret: &str,
        base_url: &str,
        identity: Option<String>,
    ) -> Result<(), GatewayError> {
        self.store
            .upsert_credential(&CredentialUpsert {
                customer_id,
                service,
                credential_type,
                access_token: secret.to_string(),
                refresh_token: None,
                token_type: None,
                expires_at: None,
                scope: None,
                base_url: base_url.trim_end_matches('/').to_string(),
                identity,
            })
            .await
            .map_err(GatewayError::Internal)
    }

    /// Return a credential that is valid for at least the skew window,
    /// refreshing through the single-flight guard when necessary. A
    /// failed refresh never falls back to the stale token.
    pub async fn get_valid_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> Result<CredentialTuple, GatewayError> {
        let cred = self.read_usable(customer_id, service).await?;

        if cred.fresh_at(Utc::now().timestamp_millis(), self.skew_ms) {
            return cred
                .tuple()
                .ok_or(GatewayError::CredentialNeedsReauth { service });
        }

        self.refresh_locked(customer_id, service, false).await
    }

    /// Force a provider refresh regardless of remaining lifetime.
    pub async fn refresh_credential(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> Result<CredentialTuple, GatewayError> {
        // Validate the row exists before taking the guard.
        self.read_usable(customer_id, service).await?;
        self.refresh_locked(customer_id, service, true).await
    }

    async fn read_usable(
        &self,
        customer_id: Uuid,
        service: Service,
    ) -> Result<StoredCredential, GatewayError> {
        let cred = self
            .store
            .get_credential(customer_id, service)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or(GatewayError::CredentialNeedsReauth { service })?;

        if cred.needs_reauth || !cred.enabled || cred.tokens.is_none() {
            return Err(GatewayError::CredentialNeedsReauth { service });
        }
        Ok(cred)
    }

    async fn refresh_locked(
        &self,
        customer_id: Uuid,
        service: Service,
        force: bool,
    ) -> Result<CredentialTuple, GatewayError> {
        let guard = self
            .refresh_guards
            .entry((customer_id, service))
            .or_default()
            .clone();
        let _lock = guard.lock().await;

        // Re-read under the lock: a concurrent caller may have already
        // refreshed, in which case no second provider call is made.
        let cred = self.read_usable(customer_id, service).await?;
        if !force && cred.fresh_at(Utc::now().timestamp_millis(), self.skew_ms) {
            return cred
                .tuple()
                .ok_or(GatewayError::CredentialNeedsReauth { service });
        }

        // Static credentials have nothing to refresh.
        if cred.credential_type != CredentialType::Oauth2 {
            return cred
                .tuple()
                .ok_or(GatewayError::CredentialNeedsReauth { service });
        }

        let refresh_token = match cred.tokens.as_ref().and_then(|t| t.refresh_token.clone()) {
            Some(rt) => rt,
            None => {
                // Expiring token with no refresh token: dead end.
                self.transition_needs_reauth(customer_id, service).await;
                return Err(GatewayError::CredentialNeedsReauth { service });
            }
        };

        let app = self.app(service)?;
        match self.tokens.refresh(app, &cred.base_url, &refresh_token).await {
            Ok(grant) => {
                let now_ms = Utc::now().timestamp_millis();
                let upsert = CredentialUpsert {
                    customer_id,
                    service,
                    credential_type: CredentialType::Oauth2,
                    access_token: grant.access_token.clone(),
                    // Providers may rotate the refresh token; keep the old
                    // one only when no replacement was issued.
                    refresh_token: grant.refresh_token.or(Some(refresh_token)),
                    token_type: grant.token_type.or(cred.token_type.clone()),
                    expires_at: grant.expires_in.map(|s| now_ms + s * 1000),
                    scope: grant.scope.or(cred.scope.clone()),
                    base_url: cred.base_url.clone(),
                    identity: cred.identity.clone(),
                };
                self.store
                    .upsert_credential(&upsert)
                    .await
                    .map_err(GatewayError::Internal)?;

                tracing::debug!(
                    customer_id = %customer_id,
                    service = %service,
                    "credential refreshed"
                );
                Ok(CredentialTuple {
                    credential_type: CredentialType::Oauth2,
                    access_token: upsert.access_token,
                    token_type: upsert.token_type,
                    scope: upsert.scope,
                    base_url: upsert.base_url,
                    identity: upsert.identity,
                })
            }
            Err(TokenError::InvalidGrant(detail)) => {
                tracing::warn!(
                    customer_id = %customer_id,
                    service = %service,
                    "refresh token rejected by provider: {}",
                    detail
                );
                self.transition_needs_reauth(customer_id, service).await;
                Err(GatewayError::CredentialNeedsReauth { service })
            }
            Err(e) => Err(GatewayError::RefreshFailed(e.to_string())),
        }
    }

    /// Clear tokens, keep configuration, so repeated calls fail fast
    /// instead of burning a revoked refresh token.
    async fn transition_needs_reauth(&self, customer_id: Uuid, service: Service) {
        if let Err(e) = self.store.mark_needs_reauth(customer_id, service).await {
            tracing::error!(
                customer_id = %customer_id,
                service = %service,
                "failed to mark credential needs_reauth: {}",
                e
            );
        }
    }

    /// Idempotent delete.
    pub async fn revoke(&self, customer_id: Uuid, service: Service) -> Result<bool, GatewayError> {
        self.store
            .delete_credential(customer_id, service)
            .await
            .map_err(GatewayError::Internal)
    }

    pub async fn set_enabled(
        &self,
        customer_id: Uuid,
        service: Service,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        self.store
            .set_credential_enabled(customer_id, service, enabled)
            .await
            .map_err(GatewayError::Internal)
    }

    /// Redacted listing for API responses.
    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<CredentialSummary>, GatewayError> {
        let creds = self
            .store
            .list_credentials(customer_id)
            .await
            .map_err(GatewayError::Internal)?;
        Ok(creds.iter().map(CredentialSummary::from).collect())
    }
}
