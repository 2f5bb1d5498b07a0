//! Provider implementations: in-process function tables and composition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::result::ToolResult;
use super::{ProviderError, ToolSchema};

/// Default tool execution timeout (2 minutes)
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Uniform contract over heterogeneous tool backends.
///
/// `call_tool` returns `Ok(ToolResult { is_error: true, .. })` for execution
/// failures; `Err(_)` is reserved for transport/configuration problems and
/// is converted to an error result by callers before reaching the model.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ProviderError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError>;
}

/// An in-process tool implementation.
#[async_trait]
pub trait FunctionTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> ToolResult;
}

/// Provider backed by an in-process table of `FunctionTool`s.
///
/// Each call runs under a timeout; a timed-out tool produces an error
/// result rather than stalling the run.
pub struct FunctionProvider {
    tools: HashMap<String, Arc<dyn FunctionTool>>,
    timeout: Duration,
}

impl Default for FunctionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionProvider {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Registering the same name twice is a configuration
    /// error surfaced eagerly.
    pub fn register(&mut self, tool: Arc<dyn FunctionTool>) -> Result<(), ProviderError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ProviderError::DuplicateTool { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }
}

#[async_trait]
impl ToolProvider for FunctionProvider {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ProviderError> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schemas)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ProviderError::UnknownTool {
                name: name.to_string(),
            })?;

        match tokio::time::timeout(self.timeout, tool.execute(arguments)).await {
            Ok(result) => Ok(result),
            Err(_) => {
                tracing::warn!(
                    tool = name,
                    timeout_secs = self.timeout.as_secs(),
                    "Tool execution timed out"
                );
                Ok(ToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    name,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

/// Aggregates several providers behind one tool namespace.
///
/// Tool names must be globally unique across members; a collision is a
/// configuration error raised at composition time.
pub struct CompositeProvider {
    providers: Vec<Arc<dyn ToolProvider>>,
    /// tool name → index into `providers`
    routes: HashMap<String, usize>,
}

impl fmt::Debug for CompositeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeProvider")
            .field("providers", &self.providers.len())
            .field("routes", &self.routes)
            .finish()
    }
}

impl CompositeProvider {
    /// Build a composite, eagerly listing every member's tools to verify
    /// name uniqueness and construct the routing table.
    pub async fn compose(providers: Vec<Arc<dyn ToolProvider>>) -> Result<Self, ProviderError> {
        let mut routes = HashMap::new();
        for (idx, provider) in providers.iter().enumerate() {
            for schema in provider.list_tools().await? {
                if routes.insert(schema.name.clone(), idx).is_some() {
                    return Err(ProviderError::DuplicateTool { name: schema.name });
                }
            }
        }
        Ok(Self { providers, routes })
    }
}

#[async_trait]
impl ToolProvider for CompositeProvider {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ProviderError> {
        let mut all = Vec::new();
        for provider in &self.providers {
            all.extend(provider.list_tools().await?);
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        let idx = self
            .routes
            .get(name)
            .copied()
            .ok_or_else(|| ProviderError::UnknownTool {
                name: name.to_string(),
            })?;
        self.providers[idx].call_tool(name, arguments).await
    }
}

/// Parse raw tool-call arguments into a JSON object.
///
/// Malformed arguments are a model mistake, not a crash: the error text is
/// fed back through a `ToolResult` so the model can retry.
pub fn parse_arguments(raw: &str) -> Result<Value, ToolResult> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| ToolResult::error(format!("Invalid JSON in tool arguments: {}", e)))?;
    if !parsed.is_object() {
        return Err(ToolResult::error(format!(
            "Tool arguments must be a JSON object, got {}",
            json_type_name(&parsed)
        )));
    }
    Ok(parsed)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
