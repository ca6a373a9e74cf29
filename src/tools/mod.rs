//! Tool Registry — immutable catalog of named remote operations.
//!
//! The registry is built once at process start and injected by reference;
//! no runtime mutation. Each tool carries an explicit category set at
//! registration — it is never inferred from the tool name.

pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::credential::{CredentialTuple, Service};

/// Execution context handed to a handler: the resolved tenant, the
/// credential tuple (when the tool requires one), and a shared HTTP
/// client. Handlers must be safely abandonable — the gateway may drop
/// the future on timeout.
pub struct ToolContext {
    pub customer_id: Uuid,
    pub credential: Option<CredentialTuple>,
    pub http: reqwest::Client,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<Value>;
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    /// The external service whose credential the handler needs, if any.
    pub service: Option<Service>,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("category", &self.category)
            .field("service", &self.service)
            .field("input_schema", &self.input_schema)
            .field("handler", &"<dyn ToolHandler>")
            .finish()
    }
}

/// Listing view: schema and description only, no handler internals.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl From<&ToolDefinition> for ToolInfo {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            category: def.category.clone(),
            input_schema: def.input_schema.clone(),
        }
    }
}
