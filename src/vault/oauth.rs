//! OAuth2 provider plumbing: per-service endpoints, the signed `state`
//! parameter, and the token-endpoint client used for code exchange and
//! refresh.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::models::credential::{OAuthApp, Service};

type HmacSha256 = Hmac<Sha256>;

// ── Provider endpoints ────────────────────────────────────────

/// Authorization endpoint for a service. Atlassian and Microsoft use
/// central identity hosts; ServiceNow authorizes against the instance.
pub fn authorize_endpoint(service: Service, base_url: &str) -> String {
    match service {
        Service::Jira | Service::Confluence => {
            "https://auth.atlassian.com/authorize".to_string()
        }
        Service::Azure => {
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string()
        }
        Service::Servicenow => format!("{}/oauth_auth.do", base_url.trim_end_matches('/')),
    }
}

pub fn token_endpoint(service: Service, base_url: &str) -> String {
    match service {
        Service::Jira | Service::Confluence => {
            "https://auth.atlassian.com/oauth/token".to_string()
        }
        Service::Azure => {
            "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string()
        }
        Service::Servicenow => format!("{}/oauth_token.do", base_url.trim_end_matches('/')),
    }
}

// ── Signed state parameter ────────────────────────────────────

/// Payload round-tripped through the provider redirect. Nothing is
/// persisted until the callback arrives; the signature is the only thing
/// tying the callback to a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    pub customer_id: Uuid,
    pub service: Service,
    pub base_url: String,
    pub identity: Option<String>,
    /// Epoch seconds.
    pub issued_at: i64,
}

/// Abandoned flows age out instead of leaving orphaned rows.
pub const STATE_MAX_AGE_SECS: i64 = 600;

pub fn sign_state(key: &[u8; 32], state: &AuthState) -> anyhow::Result<String> {
    let payload = serde_json::to_vec(state)?;
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(&payload);
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(sig)
    ))
}

pub fn verify_state(key: &[u8; 32], token: &str, now_secs: i64) -> anyhow::Result<AuthState> {
    let (payload_b64, sig_b64) = token
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("malformed state token"))?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64)?;

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(&payload);
    let expected = mac.finalize().into_bytes();
    if expected.ct_eq(sig.as_slice()).unwrap_u8() != 1 {
        anyhow::bail!("state signature mismatch");
    }

    let state: AuthState = serde_json::from_slice(&payload)?;
    if now_secs - state.issued_at > STATE_MAX_AGE_SECS {
        anyhow::bail!("state token expired");
    }
    Ok(state)
}

// ── Token endpoint client ─────────────────────────────────────

/// Tokens as granted by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until expiry, absent for non-expiring grants.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug)]
pub enum TokenError {
    /// The provider permanently rejected the grant (invalid_grant or
    /// similar). The refresh token is dead; re-authorization required.
    InvalidGrant(String),
    /// Provider answered with a non-grant error (bad client, 5xx, …).
    Provider(String),
    /// The provider was unreachable.
    Transport(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::InvalidGrant(m) => write!(f, "invalid_grant: {}", m),
            TokenError::Provider(m) => write!(f, "provider error: {}", m),
            TokenError::Transport(m) => write!(f, "transport error: {}", m),
        }
    }
}

/// Seam for the provider token endpoint, so refresh behavior (including
/// the single-flight invariant) is testable without a live provider.
#[async_trait]
pub trait TokenClient: Send + Sync {
    async fn exchange_code(
        &self,
        app: &OAuthApp,
        base_url: &str,
        code: &str,
    ) -> Result<TokenGrant, TokenError>;

    async fn refresh(
        &self,
        app: &OAuthApp,
        base_url: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant, TokenError>;
}

pub struct HttpTokenClient {
    http: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant, TokenError> {
        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map_err(|e| TokenError::Provider(format!("unparseable grant: {}", e)))
        } else if body.contains("invalid_grant") {
            Err(TokenError::InvalidGrant(body))
        } else {
            Err(TokenError::Provider(format!("{}: {}", status, body)))
        }
    }
}

impl Default for HttpTokenClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    async fn exchange_code(
        &self,
        app: &OAuthApp,
        base_url: &str,
        code: &str,
    ) -> Result<TokenGrant, TokenError> {
        let url = token_endpoint(app.service, base_url);
        self.post_form(
            &url,
            &[
                ("grant_type", "authorization_code"),
                ("client_id", &app.client_id),
                ("client_secret", &app.client_secret),
                ("code", code),
                ("redirect_uri", &app.redirect_uri),
            ],
        )
        .await
    }

    async fn refresh(
        &self,
        app: &OAuthApp,
        base_url: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant, TokenError> {
        let url = token_endpoint(app.service, base_url);
        self.post_form(
            &url,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &app.client_id),
                ("client_secret", &app.client_secret),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [7u8; 32]
    }

    fn state(issued_at: i64) -> AuthState {
        AuthState {
            customer_id: Uuid::new_v4(),
            service: Service::Jira,
            base_url: "https://acme.atlassian.net".into(),
            identity: Some("ops@acme.test".into()),
            issued_at,
        }
    }

    #[test]
    fn test_state_roundtrip() {
        let s = state(1_000);
        let token = sign_state(&key(), &s).unwrap();
        let decoded = verify_state(&key(), &token, 1_100).unwrap();
        assert_eq!(decoded.customer_id, s.customer_id);
        assert_eq!(decoded.service, Service::Jira);
        assert_eq!(decoded.base_url, s.base_url);
    }

    #[test]
    fn test_tampered_state_rejected() {
        let token = sign_state(&key(), &state(1_000)).unwrap();
        let mut tampered = token.clone();
        // Flip a char inside the payload half.
        tampered.replace_range(2..3, if &token[2..3] == "A" { "B" } else { "A" });
        assert!(verify_state(&key(), &tampered, 1_100).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = sign_state(&key(), &state(1_000)).unwrap();
        assert!(verify_state(&[9u8; 32], &token, 1_100).is_err());
    }

    #[test]
    fn test_expired_state_rejected() {
        let token = sign_state(&key(), &state(1_000)).unwrap();
        assert!(verify_state(&key(), &token, 1_000 + STATE_MAX_AGE_SECS + 1).is_err());
    }

    #[test]
    fn test_endpoints_per_service() {
        assert_eq!(
            token_endpoint(Service::Servicenow, "https://dev.service-now.com/"),
            "https://dev.service-now.com/oauth_token.do"
        );
        assert!(token_endpoint(Service::Jira, "ignored").contains("auth.atlassian.com"));
        assert!(authorize_endpoint(Service::Azure, "ignored").contains("login.microsoftonline"));
    }
}
