//! Execution Gateway — the request lifecycle for one tool call.
//!
//! Order matters: tenant resolution rejects early with no usage entry
//! (there is no authenticated customer to attribute it to); every outcome
//! after that point — success, business error, timeout, rate-limited —
//! lands in the usage log with redacted parameters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GatewayError;
use crate::metering::UsageMeter;
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::redact::redact_params;
use crate::models::credential::{CredentialTuple, CredentialType};
use crate::models::tenant::{Customer, InstanceSighting};
use crate::models::usage::UsageRecord;
use crate::tenant::TenantRegistry;
use crate::tools::registry::ToolRegistry;
use crate::tools::{ToolContext, ToolInfo};
use crate::vault::CredentialVault;

/// Inline credential override supplied on the call body instead of the
/// vault. Field names are part of the wire contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineCredentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl InlineCredentials {
    fn into_tuple(self) -> Option<CredentialTuple> {
        if let Some(token) = self.api_token {
            Some(CredentialTuple {
                credential_type: CredentialType::ApiToken,
                access_token: token,
                token_type: None,
                scope: None,
                base_url: self.base_url,
                identity: self.email,
            })
        } else {
            self.access_token.map(|token| CredentialTuple {
                credential_type: CredentialType::Oauth2,
                access_token: token,
                token_type: Some("Bearer".into()),
                scope: None,
                base_url: self.base_url,
                identity: self.email,
            })
        }
    }
}

#[derive(Debug)]
pub struct CallRequest {
    pub license_key: String,
    pub instance_id: Option<String>,
    pub client_version: Option<String>,
    pub origin: Option<String>,
    pub tool: String,
    pub arguments: Value,
    pub credentials: Option<InlineCredentials>,
}

#[derive(Debug, Serialize)]
pub struct CallOutcome {
    pub tool: String,
    pub result: Value,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct ExecutionGateway {
    tenants: Arc<TenantRegistry>,
    vault: Arc<CredentialVault>,
    tools: Arc<ToolRegistry>,
    limiter: RateLimiter,
    meter: UsageMeter,
    http: reqwest::Client,
    timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(
        tenants: Arc<TenantRegistry>,
        vault: Arc<CredentialVault>,
        tools: Arc<ToolRegistry>,
        limiter: RateLimiter,
        meter: UsageMeter,
        timeout: Duration,
    ) -> Self {
        Self {
            tenants,
            vault,
            tools,
            limiter,
            meter,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// List the registry for a valid, active, non-rate-limited tenant.
    pub async fn list_tools(
        &self,
        license_key: &str,
        instance_id: Option<&str>,
        origin: Option<&str>,
    ) -> Result<Vec<ToolInfo>, GatewayError> {
        let customer = self.tenants.resolve_license(license_key).await?;
        self.limiter.check(customer.id)?;
        if let Some(id) = instance_id {
            self.tenants
                .record_sighting(InstanceSighting {
                    instance_id: id.to_string(),
                    customer_id: customer.id,
                    version: None,
                    origin: origin.map(String::from),
                })
                .await;
        }
        Ok(self.tools.list())
    }

    /// Execute one tool call through the full lifecycle.
    pub async fn call(&self, req: CallRequest) -> Result<CallOutcome, GatewayError> {
        // 1. Authenticate; failures are rejected before any accounting.
        let customer = self.tenants.resolve_license(&req.license_key).await?;

        let started = Instant::now();
        let redacted = redact_params(&req.arguments);

        let result = self.execute_inner(&customer, &req).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        // 7. Every outcome past authentication is metered.
        self.meter.record(UsageRecord {
            customer_id: customer.id,
            instance_id: req.instance_id.clone(),
            tool_name: req.tool.clone(),
            category: self
                .tools
                .lookup(&req.tool)
                .map(|d| d.category.clone())
                .unwrap_or_else(|_| "unknown".to_string()),
            success: result.is_ok(),
            duration_ms: duration_ms as i32,
            error_message: result.as_ref().err().map(|e| e.code().to_string()),
            request_params: Some(redacted),
            origin: req.origin.clone(),
        });

        match result {
            Ok(value) => Ok(CallOutcome {
                tool: req.tool,
                result: value,
                duration_ms,
                timestamp: Utc::now(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn execute_inner(
        &self,
        customer: &Customer,
        req: &CallRequest,
    ) -> Result<Value, GatewayError> {
        // 2. Rate limit before doing any real work.
        self.limiter.check(customer.id)?;

        // 3. Best-effort instance sighting; never aborts the call.
        if let Some(instance_id) = &req.instance_id {
            self.tenants
                .record_sighting(InstanceSighting {
                    instance_id: instance_id.clone(),
                    customer_id: customer.id,
                    version: req.client_version.clone(),
                    origin: req.origin.clone(),
                })
                .await;
        }

        // 4. Resolve the handler and validate arguments.
        let tool = self.tools.lookup(&req.tool)?;
        self.tools.validate_arguments(&req.tool, &req.arguments)?;

        // 5. Obtain credentials: inline override wins, else the vault.
        let credential = match tool.service {
            Some(service) => Some(match req.credentials.clone().and_then(|c| c.into_tuple()) {
                Some(tuple) => tuple,
                None => self.vault.get_valid_credential(customer.id, service).await?,
            }),
            None => None,
        };

        let ctx = ToolContext {
            customer_id: customer.id,
            credential,
            http: self.http.clone(),
        };

        // 6. Race the handler against the wall clock. Dropping the future
        // on timeout aborts its in-flight HTTP call; if the external side
        // cannot be cancelled, the eventual result is discarded.
        let handler = tool.handler.clone();
        match tokio::time::timeout(self.timeout, handler.execute(&ctx, &req.arguments)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(
                    customer_id = %customer.id,
                    tool = %req.tool,
                    "tool execution failed: {:#}",
                    e
                );
                Err(GatewayError::ExecutionFailed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    customer_id = %customer.id,
                    tool = %req.tool,
                    timeout_secs = self.timeout.as_secs(),
                    "tool execution timed out"
                );
                Err(GatewayError::ExecutionTimeout)
            }
        }
    }

    pub fn meter(&self) -> &UsageMeter {
        &self.meter
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }
}
