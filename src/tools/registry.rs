use std::collections::BTreeMap;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::errors::GatewayError;
use crate::tools::{ToolDefinition, ToolInfo};

/// Immutable name → tool mapping with pre-compiled argument schemas.
/// BTreeMap keeps listings and "known tools" error output stable.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

struct RegisteredTool {
    def: ToolDefinition,
    schema: JSONSchema,
}

pub struct ToolRegistryBuilder {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, def: ToolDefinition) -> Self {
        self.tools.push(def);
        self
    }

    pub fn build(self) -> anyhow::Result<ToolRegistry> {
        let mut tools = BTreeMap::new();
        for def in self.tools {
            let schema = JSONSchema::compile(&def.input_schema)
                .map_err(|e| anyhow::anyhow!("invalid schema for tool '{}': {}", def.name, e))?;
            if tools
                .insert(def.name.clone(), RegisteredTool { def, schema })
                .is_some()
            {
                anyhow::bail!("duplicate tool registration");
            }
        }
        Ok(ToolRegistry { tools })
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder { tools: Vec::new() }
    }

    /// Resolve a tool by name. The not-found error lists the known names
    /// to aid client debugging — the registry contents are not secret.
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, GatewayError> {
        self.tools
            .get(name)
            .map(|t| &t.def)
            .ok_or_else(|| GatewayError::ToolNotFound {
                name: name.to_string(),
                known: self.names(),
            })
    }

    /// Validate call arguments against the tool's input schema.
    pub fn validate_arguments(&self, name: &str, args: &Value) -> Result<(), GatewayError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::ToolNotFound {
                name: name.to_string(),
                known: self.names(),
            })?;

        if let Err(errors) = tool.schema.validate(args) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GatewayError::InvalidArguments(detail));
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.values().map(|t| ToolInfo::from(&t.def)).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
