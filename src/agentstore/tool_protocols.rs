//! Tool protocol implementations.
//!
//! - **DataStoreProtocol**: exposes an [`AgentDataStoreProxy`] to agents as the
//!   `data_store` tool

use crate::agentstore::error::StoreError;
use crate::agentstore::proxy::AgentDataStoreProxy;
use crate::agentstore::tool_protocol::{
    ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::error::Error;

/// Name of the tool served by [`DataStoreProtocol`].
pub const DATA_STORE_TOOL: &str = "data_store";

/// Data Store Tool Adapter
///
/// Translates `data_store` tool calls into operations on one agent's
/// [`AgentDataStoreProxy`]. The proxy fixes the user and agent; a call may pass
/// `namespace` to work outside the proxy's current namespace for that call only.
///
/// # Commands
///
/// Sent as `{"command": "<name>", ...arguments}`:
/// - `get` `key` [`default`] - read a value
/// - `set` `key` `value` [`metadata`] - write a value
/// - `delete` `key` - remove a key
/// - `list_keys` [`prefix`] - sorted keys of the namespace
/// - `list_namespaces` - namespaces holding the user's data
/// - `get_all` - every key and value of the namespace
/// - `get_many` `keys` - values for the listed keys that exist
/// - `set_many` `items` [`metadata`] - write an object of key/value pairs
/// - `clear` - delete the whole namespace
///
/// Command names are case-insensitive. Failures come back as unsuccessful results
/// with `ERR:` codes such as `ERR:NOT_FOUND` or `ERR:CONFLICT`.
///
/// # Example
///
/// ```rust
/// use agentstore::backends::MemoryStore;
/// use agentstore::data_store::DataStoreService;
/// use agentstore::proxy::AgentDataStoreProxy;
/// use agentstore::tool_protocol::ToolProtocol;
/// use agentstore::tool_protocols::DataStoreProtocol;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let service = Arc::new(DataStoreService::new(Arc::new(MemoryStore::new())));
/// let protocol = DataStoreProtocol::new(AgentDataStoreProxy::new(service, "u1", "planner"));
///
/// protocol
///     .execute("data_store", json!({"command": "set", "key": "goal", "value": "ship"}))
///     .await?;
/// let result = protocol
///     .execute("data_store", json!({"command": "get", "key": "goal"}))
///     .await?;
/// assert_eq!(result.output["value"], "ship");
/// # Ok(())
/// # }
/// ```
pub struct DataStoreProtocol {
    proxy: AgentDataStoreProxy,
}

impl DataStoreProtocol {
    pub fn new(proxy: AgentDataStoreProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &AgentDataStoreProxy {
        &self.proxy
    }

    fn data_store_tool_metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            DATA_STORE_TOOL,
            "Persistent key-value storage shared by every agent of the same user. \
             Keys live in namespaces (current: the agent's own unless 'namespace' is given). \
             Pass a 'command' plus its arguments:\n\
             \n\
             {\"command\": \"get\", \"key\": \"k\"}\n\
             {\"command\": \"set\", \"key\": \"k\", \"value\": <any JSON>}\n\
             {\"command\": \"delete\", \"key\": \"k\"}\n\
             {\"command\": \"list_keys\", \"prefix\": \"optional\"}\n\
             {\"command\": \"list_namespaces\"}\n\
             {\"command\": \"get_all\"}\n\
             {\"command\": \"get_many\", \"keys\": [\"a\", \"b\"]}\n\
             {\"command\": \"set_many\", \"items\": {\"a\": 1, \"b\": 2}}\n\
             {\"command\": \"clear\"}",
        )
        .with_parameter(
            ToolParameter::new("command", ToolParameterType::String)
                .with_description(
                    "One of get, set, delete, list_keys, list_namespaces, get_all, \
                     get_many, set_many, clear",
                )
                .required(),
        )
        .with_parameter(
            ToolParameter::new("key", ToolParameterType::String)
                .with_description("Key for get, set and delete"),
        )
        .with_parameter(
            ToolParameter::new("value", ToolParameterType::Any)
                .with_description("Value for set; any JSON value"),
        )
        .with_parameter(
            ToolParameter::new("default", ToolParameterType::Any)
                .with_description("Returned by get when the key does not exist"),
        )
        .with_parameter(
            ToolParameter::new("keys", ToolParameterType::Array)
                .with_items(ToolParameterType::String)
                .with_description("Keys for get_many"),
        )
        .with_parameter(
            ToolParameter::new("items", ToolParameterType::Object)
                .with_description("Key/value pairs for set_many"),
        )
        .with_parameter(
            ToolParameter::new("metadata", ToolParameterType::Object)
                .with_description("Metadata merged into the stored record(s) on set/set_many"),
        )
        .with_parameter(
            ToolParameter::new("prefix", ToolParameterType::String)
                .with_description("Only list keys starting with this prefix"),
        )
        .with_parameter(
            ToolParameter::new("namespace", ToolParameterType::String)
                .with_description("Run this one call in another namespace"),
        )
    }

    async fn run_command(
        &self,
        proxy: &AgentDataStoreProxy,
        command: &str,
        parameters: &JsonValue,
    ) -> Result<ToolResult, StoreError> {
        let result = match command {
            "get" => {
                let Some(key) = str_param(parameters, "key") else {
                    return Ok(invalid_syntax("GET"));
                };
                match proxy.get(key).await? {
                    Some(value) => ToolResult::success(json!({ "key": key, "value": value })),
                    None => match parameters.get("default") {
                        Some(default) => {
                            ToolResult::success(json!({ "key": key, "value": default }))
                        }
                        None => ToolResult::failure("ERR:NOT_FOUND".to_string()),
                    },
                }
            }
            "set" => {
                let (Some(key), Some(value)) =
                    (str_param(parameters, "key"), parameters.get("value"))
                else {
                    return Ok(invalid_syntax("SET"));
                };
                proxy
                    .set(key, value.clone(), object_param(parameters, "metadata"))
                    .await?;
                ToolResult::success(json!({"status": "OK"}))
            }
            "delete" => {
                let Some(key) = str_param(parameters, "key") else {
                    return Ok(invalid_syntax("DELETE"));
                };
                if proxy.delete(key).await? {
                    ToolResult::success(json!({"status": "OK"}))
                } else {
                    ToolResult::failure("ERR:NOT_FOUND".to_string())
                }
            }
            "list_keys" => {
                let keys = proxy.list_keys(str_param(parameters, "prefix")).await?;
                ToolResult::success(json!({ "keys": keys }))
            }
            "list_namespaces" => {
                let namespaces = proxy.list_namespaces().await?;
                ToolResult::success(json!({ "namespaces": namespaces }))
            }
            "get_all" => {
                let items = proxy.get_all().await?;
                ToolResult::success(json!({ "items": items }))
            }
            "get_many" => {
                let Some(keys) = parameters.get("keys").and_then(JsonValue::as_array) else {
                    return Ok(invalid_syntax("GET_MANY"));
                };
                let keys: Vec<&str> = keys.iter().filter_map(JsonValue::as_str).collect();
                let items = proxy.get_many(keys).await?;
                ToolResult::success(json!({ "items": items }))
            }
            "set_many" => {
                let Some(items) = object_param(parameters, "items") else {
                    return Ok(invalid_syntax("SET_MANY"));
                };
                let written = proxy
                    .set_many(items, object_param(parameters, "metadata"))
                    .await?;
                ToolResult::success(json!({ "written": written }))
            }
            "clear" => {
                let deleted = proxy.clear().await?;
                ToolResult::success(json!({ "deleted": deleted }))
            }
            _ => ToolResult::failure("ERR:Unknown Command".to_string()),
        };
        Ok(result.with_metadata("namespace", json!(proxy.namespace())))
    }
}

fn str_param<'a>(parameters: &'a JsonValue, name: &str) -> Option<&'a str> {
    parameters.get(name).and_then(JsonValue::as_str)
}

fn object_param(parameters: &JsonValue, name: &str) -> Option<Map<String, JsonValue>> {
    parameters.get(name).and_then(JsonValue::as_object).cloned()
}

fn invalid_syntax(command: &str) -> ToolResult {
    ToolResult::failure(format!("ERR:Invalid {} Syntax", command))
}

#[async_trait]
impl ToolProtocol for DataStoreProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        if tool_name != DATA_STORE_TOOL {
            return Err(Box::new(ToolError::NotFound(tool_name.to_string())));
        }

        let command = str_param(&parameters, "command")
            .ok_or_else(|| {
                ToolError::InvalidParameters(
                    "Missing 'command' field. Use e.g. {\"command\": \"get\", \"key\": \"k\"}"
                        .to_string(),
                )
            })?
            .trim()
            .to_lowercase();

        let scoped;
        let proxy = match str_param(&parameters, "namespace") {
            Some(namespace) if !namespace.is_empty() => {
                scoped = self.proxy.use_namespace(namespace);
                &scoped
            }
            _ => &self.proxy,
        };

        match self.run_command(proxy, &command, &parameters).await {
            Ok(result) => Ok(result),
            Err(e) => {
                log::warn!(
                    "data_store {} failed for agent {}: {}",
                    command,
                    proxy.agent_name(),
                    e
                );
                Ok(ToolResult::from_store_error(&e))
            }
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(vec![self.data_store_tool_metadata()])
    }

    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        if tool_name != DATA_STORE_TOOL {
            return Err(Box::new(ToolError::NotFound(tool_name.to_string())));
        }
        Ok(self.data_store_tool_metadata())
    }

    fn protocol_name(&self) -> &str {
        DATA_STORE_TOOL
    }
}
