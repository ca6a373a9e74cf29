//! Execution Gateway lifecycle tests against in-memory fakes: early
//! tenant rejection, rate limiting, timeout enforcement, redacted usage
//! records, and credential resolution.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{app_registrations, MemoryStore, MockTokenClient, TEST_STATE_KEY};
use snowgate::errors::GatewayError;
use snowgate::gateway::{CallRequest, ExecutionGateway, InlineCredentials};
use snowgate::metering::UsageMeter;
use snowgate::middleware::rate_limit::RateLimiter;
use snowgate::models::credential::Service;
use snowgate::models::tenant::TenantStatus;
use snowgate::tenant::TenantRegistry;
use snowgate::tools::registry::ToolRegistry;
use snowgate::tools::{ToolContext, ToolDefinition, ToolHandler};
use snowgate::vault::CredentialVault;

const LICENSE: &str = "SNOW-ENT-ACME-1234";

struct PingHandler;

#[async_trait]
impl ToolHandler for PingHandler {
    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> anyhow::Result<Value> {
        Ok(json!({ "pong": true }))
    }
}

struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<Value> {
        Ok(args.clone())
    }
}

struct HangHandler;

#[async_trait]
impl ToolHandler for HangHandler {
    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> anyhow::Result<Value> {
        futures::future::pending::<()>().await;
        unreachable!()
    }
}

/// Reports which credential the gateway resolved for it.
struct CredentialProbeHandler;

#[async_trait]
impl ToolHandler for CredentialProbeHandler {
    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> anyhow::Result<Value> {
        let cred = ctx
            .credential
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no credential resolved"))?;
        Ok(json!({ "baseUrl": cred.base_url, "token": cred.access_token }))
    }
}

fn open_schema() -> Value {
    json!({ "type": "object" })
}

fn test_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .register(ToolDefinition {
            name: "snow_gateway_ping".into(),
            description: "ping".into(),
            category: "diagnostics".into(),
            service: None,
            input_schema: open_schema(),
            handler: Arc::new(PingHandler),
        })
        .register(ToolDefinition {
            name: "snow_echo".into(),
            description: "echo".into(),
            category: "diagnostics".into(),
            service: None,
            input_schema: open_schema(),
            handler: Arc::new(EchoHandler),
        })
        .register(ToolDefinition {
            name: "snow_hang".into(),
            description: "never resolves".into(),
            category: "diagnostics".into(),
            service: None,
            input_schema: open_schema(),
            handler: Arc::new(HangHandler),
        })
        .register(ToolDefinition {
            name: "snow_jira_get_issue".into(),
            description: "jira issue".into(),
            category: "jira".into(),
            service: Some(Service::Jira),
            input_schema: open_schema(),
            handler: Arc::new(CredentialProbeHandler),
        })
        .build()
        .unwrap()
}

fn build_gateway(store: Arc<MemoryStore>, rate_limit: u64, timeout: Duration) -> ExecutionGateway {
    let tenants = Arc::new(TenantRegistry::new(store.clone(), Duration::from_secs(5)));
    let vault = Arc::new(CredentialVault::new(
        store.clone(),
        Arc::new(MockTokenClient::granting("unused", Duration::ZERO)),
        app_registrations(),
        TEST_STATE_KEY,
        60_000,
    ));
    ExecutionGateway::new(
        tenants,
        vault,
        Arc::new(test_registry()),
        RateLimiter::new(rate_limit, Duration::from_secs(60)),
        UsageMeter::new(store),
        timeout,
    )
}

fn call(tool: &str, arguments: Value) -> CallRequest {
    CallRequest {
        license_key: LICENSE.to_string(),
        instance_id: Some("inst-1".into()),
        client_version: Some("1.4.2".into()),
        origin: Some("203.0.113.9".into()),
        tool: tool.to_string(),
        arguments,
        credentials: None,
    }
}

/// The usage write happens off the response path; poll for it.
async fn wait_for_usage(store: &MemoryStore, count: usize) {
    for _ in 0..100 {
        if store.usage_entries().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "usage log never reached {} entries (has {})",
        count,
        store.usage_entries().len()
    );
}

#[tokio::test]
async fn successful_call_returns_result_and_meters() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    let outcome = gateway.call(call("snow_gateway_ping", json!({}))).await.unwrap();
    assert_eq!(outcome.result, json!({ "pong": true }));
    assert_eq!(outcome.tool, "snow_gateway_ping");

    wait_for_usage(&store, 1).await;
    let entries = store.usage_entries();
    assert!(entries[0].success);
    assert_eq!(entries[0].tool_name, "snow_gateway_ping");
    assert_eq!(entries[0].category, "diagnostics");
    assert_eq!(entries[0].instance_id.as_deref(), Some("inst-1"));

    // The sighting was upserted too.
    assert_eq!(store.sightings.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_license_is_rejected_without_storage_access() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    let mut req = call("snow_gateway_ping", json!({}));
    req.license_key = "not-a-license".into();
    let err = gateway.call(req).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidLicenseFormat));
    assert_eq!(store.lookup_count(), 0);
    assert!(store.usage_entries().is_empty());
}

#[tokio::test]
async fn suspended_customer_is_forbidden_for_every_tool() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Suspended);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    for tool in ["snow_gateway_ping", "snow_jira_get_issue", "snow_echo", "unknown"] {
        let err = gateway.call(call(tool, json!({}))).await.unwrap_err();
        assert!(matches!(err, GatewayError::LicenseSuspended), "tool {}", tool);
    }

    // tools/list is equally forbidden.
    let err = gateway.list_tools(LICENSE, None, None).await.unwrap_err();
    assert!(matches!(err, GatewayError::LicenseSuspended));
}

#[tokio::test]
async fn churned_customer_gets_distinct_error() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Churned);
    let gateway = build_gateway(Arc::new(store), 100, Duration::from_secs(5));

    let err = gateway.call(call("snow_gateway_ping", json!({}))).await.unwrap_err();
    assert!(matches!(err, GatewayError::LicenseChurned));
}

#[tokio::test]
async fn unknown_tool_lists_known_names_and_is_metered() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    let err = gateway.call(call("snow_missing", json!({}))).await.unwrap_err();
    match &err {
        GatewayError::ToolNotFound { name, known } => {
            assert_eq!(name, "snow_missing");
            assert!(known.contains(&"snow_gateway_ping".to_string()));
        }
        other => panic!("expected ToolNotFound, got {:?}", other),
    }

    wait_for_usage(&store, 1).await;
    let entries = store.usage_entries();
    assert!(!entries[0].success);
    assert_eq!(entries[0].category, "unknown");
    assert_eq!(entries[0].error_message.as_deref(), Some("tool_not_found"));
}

#[tokio::test]
async fn rate_limit_rejects_call_101_with_retry_hint() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    for _ in 0..100 {
        gateway
            .call(call("snow_gateway_ping", json!({})))
            .await
            .unwrap();
    }

    let err = gateway.call(call("snow_gateway_ping", json!({}))).await.unwrap_err();
    match err {
        GatewayError::RateLimited { retry_after_secs } => {
            assert!(retry_after_secs <= 60);
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }

    // The rejected call is metered like any other outcome.
    wait_for_usage(&store, 101).await;
    let entries = store.usage_entries();
    assert!(entries
        .iter()
        .any(|e| e.error_message.as_deref() == Some("rate_limited")));
}

#[tokio::test]
async fn hanging_handler_times_out_within_budget() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_millis(200));

    let started = Instant::now();
    let err = gateway.call(call("snow_hang", json!({}))).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, GatewayError::ExecutionTimeout));
    assert!(
        elapsed < Duration::from_secs(2),
        "timeout took {:?}",
        elapsed
    );

    wait_for_usage(&store, 1).await;
    let entries = store.usage_entries();
    assert_eq!(entries[0].error_message.as_deref(), Some("execution_timeout"));
}

#[tokio::test]
async fn secret_arguments_never_reach_the_usage_log() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    gateway
        .call(call(
            "snow_echo",
            json!({
                "summary": "open tickets",
                "apiToken": "super-secret-123",
                "nested": { "password": "hunter2" }
            }),
        ))
        .await
        .unwrap();

    wait_for_usage(&store, 1).await;
    let entries = store.usage_entries();
    let params = serde_json::to_string(entries[0].request_params.as_ref().unwrap()).unwrap();
    assert!(!params.contains("super-secret-123"));
    assert!(!params.contains("hunter2"));
    assert!(params.contains("open tickets"));
    assert!(params.contains("[REDACTED]"));
}

#[tokio::test]
async fn missing_credential_is_an_actionable_reauth_error() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    let err = gateway
        .call(call("snow_jira_get_issue", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::CredentialNeedsReauth { service: Service::Jira }
    ));

    wait_for_usage(&store, 1).await;
    let entries = store.usage_entries();
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("credential_needs_reauth")
    );
}

#[tokio::test]
async fn inline_credentials_bypass_the_vault() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let store = Arc::new(store);
    let gateway = build_gateway(store.clone(), 100, Duration::from_secs(5));

    let mut req = call("snow_jira_get_issue", json!({}));
    req.credentials = Some(InlineCredentials {
        access_token: None,
        api_token: Some("inline-token".into()),
        base_url: "https://inline.example.net".into(),
        email: Some("ops@acme.test".into()),
    });

    let outcome = gateway.call(req).await.unwrap();
    assert_eq!(outcome.result["baseUrl"], "https://inline.example.net");
    assert_eq!(outcome.result["token"], "inline-token");
}

#[tokio::test]
async fn list_tools_returns_catalog_for_active_tenant() {
    let (store, _) = MemoryStore::with_customer(TenantStatus::Active);
    let gateway = build_gateway(Arc::new(store), 100, Duration::from_secs(5));

    let tools = gateway
        .list_tools(LICENSE, Some("inst-9"), None)
        .await
        .unwrap();
    assert_eq!(tools.len(), 4);
    let ping = tools.iter().find(|t| t.name == "snow_gateway_ping").unwrap();
    assert_eq!(ping.category, "diagnostics");
}
