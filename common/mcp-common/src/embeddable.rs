//! Embeddable MCP trait for in-process execution
//!
//! [`EmbeddableMcp`] lets a host call a server's tools directly, without a
//! subprocess or stdio transport in between.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::EmbeddableMcp;
//! use sql_gateway_mcp::SqlGatewayServer;
//!
//! let server = SqlGatewayServer::try_new()?;
//! let tools = server.list_tools();
//! let result = server
//!     .call_tool("execute_query", serde_json::json!({"sql": "SELECT 1"}))
//!     .await?;
//! ```

use async_trait::async_trait;
use rmcp::model::{CallToolResult, Tool};
use serde_json::Value;

/// Error type for embeddable MCP operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddableError {
    /// Tool was not found in the server
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Parameters did not deserialize into the tool's parameter type
    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] serde_json::Error),

    /// MCP protocol error
    #[error("mcp error: {0}")]
    McpError(String),
}

impl From<rmcp::ErrorData> for EmbeddableError {
    fn from(err: rmcp::ErrorData) -> Self {
        EmbeddableError::McpError(err.message.to_string())
    }
}

/// Result type for embeddable MCP operations
pub type EmbeddableResult<T> = Result<T, EmbeddableError>;

/// Trait for MCP servers that can be executed in-process
///
/// Implementations must be `Send + Sync`; tool calls may arrive from several
/// tasks at once. Servers built with `#[tool_router]` list their tools from
/// the router and dispatch `call_tool` by name.
#[async_trait]
pub trait EmbeddableMcp: Send + Sync {
    /// Server name, matching the name used in MCP configuration files
    fn server_name(&self) -> &str;

    /// All available tools with their input schemas
    fn list_tools(&self) -> Vec<Tool>;

    /// Execute a tool by name
    ///
    /// `params` is the JSON object the tool would receive over the wire.
    async fn call_tool(&self, name: &str, params: Value) -> EmbeddableResult<CallToolResult>;

    fn server_description(&self) -> Option<&str> {
        None
    }

    fn server_version(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoServer;

    #[async_trait]
    impl EmbeddableMcp for EchoServer {
        fn server_name(&self) -> &str {
            "echo"
        }

        fn list_tools(&self) -> Vec<Tool> {
            vec![]
        }

        async fn call_tool(&self, name: &str, params: Value) -> EmbeddableResult<CallToolResult> {
            match name {
                "echo" => {
                    let text: String = serde_json::from_value(params)?;
                    Ok(crate::text_success(text))
                }
                _ => Err(EmbeddableError::ToolNotFound(name.to_string())),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let server = EchoServer;
        assert_eq!(server.server_name(), "echo");
        assert!(server.list_tools().is_empty());
        assert!(server.server_version().is_none());
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let result = EchoServer.call_tool("unknown", serde_json::json!({})).await;
        assert!(matches!(result, Err(EmbeddableError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_bad_params_are_invalid_params() {
        let result = EchoServer.call_tool("echo", serde_json::json!({"x": 1})).await;
        assert!(matches!(result, Err(EmbeddableError::InvalidParams(_))));
    }
}
