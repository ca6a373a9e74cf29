use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External services the vault can hold credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Jira,
    Azure,
    Confluence,
    Servicenow,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Jira => "jira",
            Service::Azure => "azure",
            Service::Confluence => "confluence",
            Service::Servicenow => "servicenow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jira" => Some(Service::Jira),
            "azure" => Some(Service::Azure),
            "confluence" => Some(Service::Confluence),
            "servicenow" => Some(Service::Servicenow),
            _ => None,
        }
    }

    pub const ALL: [Service; 4] = [
        Service::Jira,
        Service::Azure,
        Service::Confluence,
        Service::Servicenow,
    ];
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Oauth2,
    ApiToken,
    Basic,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Oauth2 => "oauth2",
            CredentialType::ApiToken => "api_token",
            CredentialType::Basic => "basic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "api_token" => CredentialType::ApiToken,
            "basic" => CredentialType::Basic,
            _ => CredentialType::Oauth2,
        }
    }
}

/// Decrypted token material. Absent on rows that have been cleared after a
/// failed refresh (the row then only retains configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// A credential row as read from the store, token material decrypted.
/// At most one exists per (customer_id, service); updates are upserts on
/// that pair.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service: Service,
    pub credential_type: CredentialType,
    pub tokens: Option<TokenPair>,
    pub token_type: Option<String>,
    /// Epoch milliseconds; `None` for static credentials.
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
    pub base_url: String,
    pub identity: Option<String>,
    pub enabled: bool,
    pub needs_reauth: bool,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl StoredCredential {
    /// True when the access token is still valid `skew_ms` from now.
    /// Static credentials (no expiry) are always fresh.
    pub fn fresh_at(&self, now_ms: i64, skew_ms: i64) -> bool {
        match self.expires_at {
            Some(exp) => exp > now_ms + skew_ms,
            None => true,
        }
    }

    /// Assemble the handler-facing tuple, if token material is present.
    pub fn tuple(&self) -> Option<CredentialTuple> {
        self.tokens.as_ref().map(|t| CredentialTuple {
            credential_type: self.credential_type,
            access_token: t.access_token.clone(),
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            base_url: self.base_url.clone(),
            identity: self.identity.clone(),
        })
    }
}

/// What a tool handler receives: enough to authenticate against the
/// external service. Never serialized into logs or API responses.
#[derive(Debug, Clone)]
pub struct CredentialTuple {
    pub credential_type: CredentialType,
    pub access_token: String,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub base_url: String,
    pub identity: Option<String>,
}

/// Fields for upserting a credential row, keyed on (customer_id, service).
#[derive(Debug, Clone)]
pub struct CredentialUpsert {
    pub customer_id: Uuid,
    pub service: Service,
    pub credential_type: CredentialType,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
    pub base_url: String,
    pub identity: Option<String>,
}

/// Per-service OAuth application registration: process-wide configuration,
/// not tenant-scoped. Built once at boot from the environment.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub service: Service,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
}

/// Redacted view of a credential for API responses: no token material.
#[derive(Debug, Serialize)]
pub struct CredentialSummary {
    pub service: Service,
    pub credential_type: CredentialType,
    pub base_url: String,
    pub identity: Option<String>,
    pub enabled: bool,
    pub needs_reauth: bool,
    pub expires_at: Option<i64>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl From<&StoredCredential> for CredentialSummary {
    fn from(c: &StoredCredential) -> Self {
        Self {
            service: c.service,
            credential_type: c.credential_type,
            base_url: c.base_url.clone(),
            identity: c.identity.clone(),
            enabled: c.enabled,
            needs_reauth: c.needs_reauth,
            expires_at: c.expires_at,
            last_refreshed: c.last_refreshed,
        }
    }
}
