//! Built-in tool catalog: thin pass-through wrappers over the wrapped
//! REST APIs. The gateway owns authentication, rate limiting, timeouts
//! and auditing; handlers here only shape one HTTP call each.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::models::credential::{CredentialType, Service};
use crate::tools::registry::ToolRegistry;
use crate::tools::{ToolContext, ToolDefinition, ToolHandler};

/// Generic REST pass-through. `path` is a template with `{param}`
/// placeholders filled from the arguments; remaining arguments become
/// query parameters on GET and the JSON body otherwise.
struct RestTool {
    method: Method,
    path: &'static str,
}

#[async_trait]
impl ToolHandler for RestTool {
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<Value> {
        let cred = ctx
            .credential
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tool requires a credential"))?;

        let mut remaining = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => anyhow::bail!("arguments must be a JSON object"),
        };
        let path = fill_template(self.path, &mut remaining)?;
        let url = format!("{}{}", cred.base_url.trim_end_matches('/'), path);

        let mut req = ctx.http.request(self.method.clone(), &url);
        req = match cred.credential_type {
            // Basic/api-token auth uses identity:secret; OAuth2 a bearer.
            CredentialType::Basic | CredentialType::ApiToken => req.basic_auth(
                cred.identity.clone().unwrap_or_default(),
                Some(cred.access_token.clone()),
            ),
            CredentialType::Oauth2 => req.bearer_auth(&cred.access_token),
        };

        if self.method == Method::GET {
            for (key, value) in &remaining {
                req = req.query(&[(key.as_str(), query_value(value))]);
            }
        } else if !remaining.is_empty() {
            req = req.json(&Value::Object(remaining));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            anyhow::bail!("upstream returned {}: {}", status, body);
        }
        Ok(body)
    }
}

/// Replace `{param}` placeholders from the argument map, consuming the
/// keys used so they are not re-sent as query/body parameters. Values
/// are percent-encoded into the path.
fn fill_template(template: &str, args: &mut Map<String, Value>) -> anyhow::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let end = rest[start..]
            .find('}')
            .map(|i| start + i)
            .ok_or_else(|| anyhow::anyhow!("unclosed placeholder in path template"))?;
        out.push_str(&rest[..start]);
        let key = &rest[start + 1..end];
        let value = args
            .remove(key)
            .ok_or_else(|| anyhow::anyhow!("missing path argument '{}'", key))?;
        out.push_str(&urlencoding::encode(&query_value(&value)));
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn query_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Diagnostic tool that needs no external credential.
struct PingTool;

#[async_trait]
impl ToolHandler for PingTool {
    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> anyhow::Result<Value> {
        Ok(json!({ "pong": true, "customerId": ctx.customer_id }))
    }
}

fn rest(
    name: &str,
    description: &str,
    category: &str,
    service: Service,
    method: Method,
    path: &'static str,
    schema: Value,
) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        service: Some(service),
        input_schema: schema,
        handler: Arc::new(RestTool { method, path }),
    }
}

/// The static catalog registered at process start.
pub fn builtin_registry() -> anyhow::Result<ToolRegistry> {
    ToolRegistry::builder()
        .register(ToolDefinition {
            name: "snow_gateway_ping".into(),
            description: "Round-trip check through the gateway; no external call.".into(),
            category: "diagnostics".into(),
            service: None,
            input_schema: json!({ "type": "object", "properties": {} }),
            handler: Arc::new(PingTool),
        })
        .register(rest(
            "snow_jira_get_issue",
            "Fetch a Jira issue by key.",
            "jira",
            Service::Jira,
            Method::GET,
            "/rest/api/2/issue/{issueKey}",
            json!({
                "type": "object",
                "properties": {
                    "issueKey": { "type": "string", "description": "e.g. PROJ-123" }
                },
                "required": ["issueKey"]
            }),
        ))
        .register(rest(
            "snow_jira_search",
            "Search Jira issues with JQL.",
            "jira",
            Service::Jira,
            Method::GET,
            "/rest/api/2/search",
            json!({
                "type": "object",
                "properties": {
                    "jql": { "type": "string" },
                    "maxResults": { "type": "integer", "minimum": 1, "maximum": 100 }
                },
                "required": ["jql"]
            }),
        ))
        .register(rest(
            "snow_jira_create_issue",
            "Create a Jira issue.",
            "jira",
            Service::Jira,
            Method::POST,
            "/rest/api/2/issue",
            json!({
                "type": "object",
                "properties": {
                    "fields": { "type": "object" }
                },
                "required": ["fields"]
            }),
        ))
        .register(rest(
            "snow_confluence_get_page",
            "Fetch a Confluence page by id.",
            "confluence",
            Service::Confluence,
            Method::GET,
            "/wiki/rest/api/content/{pageId}",
            json!({
                "type": "object",
                "properties": {
                    "pageId": { "type": "string" },
                    "expand": { "type": "string" }
                },
                "required": ["pageId"]
            }),
        ))
        .register(rest(
            "snow_servicenow_get_record",
            "Fetch a ServiceNow record from a table.",
            "servicenow",
            Service::Servicenow,
            Method::GET,
            "/api/now/table/{table}/{sysId}",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string" },
                    "sysId": { "type": "string" }
                },
                "required": ["table", "sysId"]
            }),
        ))
        .register(rest(
            "snow_servicenow_create_record",
            "Insert a ServiceNow record into a table.",
            "servicenow",
            Service::Servicenow,
            Method::POST,
            "/api/now/table/{table}",
            json!({
                "type": "object",
                "properties": {
                    "table": { "type": "string" },
                    "fields": { "type": "object" }
                },
                "required": ["table"]
            }),
        ))
        .register(rest(
            "snow_azure_list_resource_groups",
            "List Azure resource groups in a subscription.",
            "azure",
            Service::Azure,
            Method::GET,
            "/subscriptions/{subscriptionId}/resourcegroups",
            json!({
                "type": "object",
                "properties": {
                    "subscriptionId": { "type": "string" },
                    "api-version": { "type": "string", "default": "2021-04-01" }
                },
                "required": ["subscriptionId"]
            }),
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_builds() {
        let registry = builtin_registry().unwrap();
        assert!(registry.lookup("snow_jira_get_issue").is_ok());
        assert!(registry.lookup("snow_gateway_ping").is_ok());
        assert_eq!(
            registry.lookup("snow_jira_get_issue").unwrap().category,
            "jira"
        );
    }

    #[test]
    fn test_fill_template_consumes_args() {
        let mut args = serde_json::from_value::<Map<String, Value>>(json!({
            "issueKey": "PROJ 1",
            "fields": "summary"
        }))
        .unwrap();
        let path = fill_template("/rest/api/2/issue/{issueKey}", &mut args).unwrap();
        assert_eq!(path, "/rest/api/2/issue/PROJ%201");
        assert!(args.contains_key("fields"));
        assert!(!args.contains_key("issueKey"));
    }

    #[test]
    fn test_fill_template_missing_arg() {
        let mut args = Map::new();
        assert!(fill_template("/x/{y}", &mut args).is_err());
    }
}
