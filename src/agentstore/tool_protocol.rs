//! Tool Protocol Abstraction Layer
//!
//! Agents reach the data store through tools: a named operation with a JSON parameter
//! object and a JSON result. A [`ToolProtocol`] serves one or more tools; a
//! [`ToolRegistry`] routes calls from an agent runtime to whichever protocol serves
//! the named tool.
//!
//! # Architecture
//!
//! ```text
//! Agent runtime → ToolRegistry → ToolProtocol (trait) → [DataStoreProtocol | user-defined]
//! ```
//!
//! # Example
//!
//! ```rust
//! use agentstore::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType};
//!
//! let metadata = ToolMetadata::new("data_store", "Persistent key-value storage")
//!     .with_parameter(
//!         ToolParameter::new("command", ToolParameterType::String)
//!             .with_description("Operation to run")
//!             .required(),
//!     );
//! assert_eq!(metadata.parameters.len(), 1);
//! ```

use crate::agentstore::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Represents the result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    /// `ERR:<CODE>` style message when `success` is false
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Failure carrying the error's code, e.g. `ERR:CONFLICT: <details>`.
    pub fn from_store_error(error: &StoreError) -> Self {
        Self::failure(format!("ERR:{}: {}", error.code(), error))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value. Stored values are opaque to the data store.
    Any,
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    /// For array types, the type of the items
    pub items: Option<Box<ToolParameterType>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            items: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(Box::new(item_type));
        self
    }
}

/// Metadata about a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Trait for implementing tool execution protocols
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Execute a tool with the given parameters
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    /// Get metadata about available tools
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Get metadata about a specific tool
    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g. "data_store")
    fn protocol_name(&self) -> &str;
}

/// Error types for tool operations
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Requested tool is not served by this registry/protocol.
    NotFound(String),
    /// The provided JSON parameters failed validation.
    InvalidParameters(String),
    /// The underlying protocol failed before producing a result.
    ProtocolError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Routes tool calls to the protocol serving each tool name.
#[derive(Default)]
pub struct ToolRegistry {
    routes: HashMap<String, (ToolMetadata, Arc<dyn ToolProtocol>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool `protocol` advertises. Later registrations replace earlier
    /// ones with the same tool name.
    pub async fn register(
        &mut self,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let tools = protocol.list_tools().await?;
        let count = tools.len();
        for metadata in tools {
            log::debug!(
                "registering tool {} from protocol {}",
                metadata.name,
                protocol.protocol_name()
            );
            self.routes
                .insert(metadata.name.clone(), (metadata, Arc::clone(&protocol)));
        }
        Ok(count)
    }

    /// Metadata of every registered tool, sorted by name.
    pub fn list_tools(&self) -> Vec<&ToolMetadata> {
        let mut tools: Vec<&ToolMetadata> = self.routes.values().map(|(m, _)| m).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolMetadata> {
        self.routes.get(name).map(|(metadata, _)| metadata)
    }

    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let (_, protocol) = self
            .routes
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        protocol.execute(tool_name, parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProtocol;

    #[async_trait]
    impl ToolProtocol for EchoProtocol {
        async fn execute(
            &self,
            tool_name: &str,
            parameters: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(serde_json::json!({
                "tool": tool_name,
                "echo": parameters
            })))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
            Ok(vec![
                ToolMetadata::new("echo", "Echo parameters"),
                ToolMetadata::new("alpha", "Echo parameters too"),
            ])
        }

        async fn get_tool_metadata(
            &self,
            tool_name: &str,
        ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
            Ok(ToolMetadata::new(tool_name, "Echo parameters"))
        }

        fn protocol_name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_tool_parameter_builder() {
        let param = ToolParameter::new("keys", ToolParameterType::Array)
            .with_description("Keys to fetch")
            .with_items(ToolParameterType::String)
            .required();

        assert_eq!(param.name, "keys");
        assert_eq!(param.param_type, ToolParameterType::Array);
        assert_eq!(param.items.as_deref(), Some(&ToolParameterType::String));
        assert!(param.required);
    }

    #[test]
    fn test_failure_from_store_error() {
        let result = ToolResult::from_store_error(&StoreError::not_found("db", "x"));
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("ERR:NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_registry_routes_by_tool_name() {
        let mut registry = ToolRegistry::new();
        let count = registry.register(Arc::new(EchoProtocol)).await.unwrap();
        assert_eq!(count, 2);

        let names: Vec<&str> = registry.list_tools().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "echo"]);

        let result = registry
            .execute_tool("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["echo"]["x"], 1);

        let missing = registry.execute_tool("nope", serde_json::json!({})).await;
        assert!(missing.is_err());
    }
}
