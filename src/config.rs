use std::collections::HashMap;

use crate::models::credential::{OAuthApp, Service};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// 64-char hex key: KEK for credential envelope encryption and HMAC key
    /// for the OAuth `state` parameter.
    pub master_key: String,
    /// Calls per window per customer. 0 = disabled.
    /// Set via SNOWGATE_RATE_LIMIT env var. Default: 100.
    pub rate_limit: u64,
    /// Window in seconds for the rate limit.
    /// Set via SNOWGATE_RATE_LIMIT_WINDOW env var. Default: 60.
    pub rate_limit_window: u64,
    /// How long a resolved tenant may be served from cache before the
    /// status is re-read. Seconds, not minutes: suspension must take
    /// effect quickly. Default: 5.
    pub tenant_cache_ttl_secs: u64,
    /// Hard wall-clock budget for one tool execution. Default: 120.
    pub execution_timeout_secs: u64,
    /// Safety margin subtracted from token expiry before a refresh is
    /// triggered. Default: 60.
    pub token_skew_secs: u64,
    /// Per-service OAuth application registrations. Immutable after boot.
    pub oauth_apps: HashMap<Service, OAuthApp>,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let master_key = std::env::var("SNOWGATE_MASTER_KEY")
        .unwrap_or_else(|_| "CHANGE_ME_32_BYTE_HEX_KEY".into());

    if master_key == "CHANGE_ME_32_BYTE_HEX_KEY" {
        let env_mode = std::env::var("SNOWGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "SNOWGATE_MASTER_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
        eprintln!("⚠️  SNOWGATE_MASTER_KEY is not set — using insecure placeholder. Set a 64-char hex key for production.");
    }

    Ok(Config {
        port: std::env::var("SNOWGATE_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/snowgate".into()),
        master_key,
        rate_limit: env_u64("SNOWGATE_RATE_LIMIT", 100),
        rate_limit_window: env_u64("SNOWGATE_RATE_LIMIT_WINDOW", 60),
        tenant_cache_ttl_secs: env_u64("SNOWGATE_TENANT_CACHE_TTL_SECS", 5),
        execution_timeout_secs: env_u64("SNOWGATE_EXEC_TIMEOUT_SECS", 120),
        token_skew_secs: env_u64("SNOWGATE_TOKEN_SKEW_SECS", 60),
        oauth_apps: load_oauth_apps(),
    })
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read per-service app registrations from the environment, e.g.
/// SNOWGATE_JIRA_CLIENT_ID / _CLIENT_SECRET / _REDIRECT_URI / _SCOPES.
/// A service with no client id configured is simply absent from the map;
/// the vault rejects authorization attempts for it.
fn load_oauth_apps() -> HashMap<Service, OAuthApp> {
    let mut apps = HashMap::new();
    for service in Service::ALL {
        let prefix = format!("SNOWGATE_{}", service.as_str().to_uppercase());
        let client_id = match std::env::var(format!("{prefix}_CLIENT_ID")) {
            Ok(v) if !v.is_empty() => v,
            _ => continue,
        };
        apps.insert(
            service,
            OAuthApp {
                service,
                client_id,
                client_secret: std::env::var(format!("{prefix}_CLIENT_SECRET"))
                    .unwrap_or_default(),
                redirect_uri: std::env::var(format!("{prefix}_REDIRECT_URI"))
                    .unwrap_or_else(|_| {
                        format!(
                            "http://localhost:8443/credentials/{}/oauth-callback",
                            service.as_str()
                        )
                    }),
                scopes: std::env::var(format!("{prefix}_SCOPES"))
                    .unwrap_or_else(|_| default_scopes(service).to_string()),
            },
        );
    }
    apps
}

fn default_scopes(service: Service) -> &'static str {
    match service {
        Service::Jira => "read:jira-work write:jira-work offline_access",
        Service::Confluence => "read:confluence-content.all offline_access",
        Service::Azure => "https://management.azure.com/.default offline_access",
        Service::Servicenow => "useraccount",
    }
}
