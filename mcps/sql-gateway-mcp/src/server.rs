//! SQL gateway MCP server implementation

use std::sync::Arc;

use mcp_common::{
    async_trait, text_error, text_success, EmbeddableError, EmbeddableMcp, EmbeddableResult,
    McpError,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo, Tool},
    tool, tool_handler, tool_router,
};
use serde_json::Value;

use crate::backend::{Backend, SqliteBackend};
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::params::{DescribeTableParams, ExecuteQueryParams, ListTablesParams};
use crate::types::{GatewayError, ToolResponse};

/// SQL gateway MCP server
#[derive(Clone)]
pub struct SqlGatewayServer {
    gateway: Arc<Gateway<SqliteBackend>>,
    tool_router: ToolRouter<Self>,
}

impl SqlGatewayServer {
    /// Load configuration from the environment and connect
    ///
    /// A missing database target or an unreachable database fails here,
    /// before the server starts accepting calls.
    pub fn try_new() -> anyhow::Result<Self> {
        let config = GatewayConfig::load()?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let gateway = Gateway::from_config(config)?;
        gateway.check_connection()?;
        tracing::info!(
            database = %gateway.executor().pool().backend().describe(),
            "SQL gateway ready"
        );
        Ok(Self::with_gateway(gateway))
    }

    pub fn with_gateway(gateway: Gateway<SqliteBackend>) -> Self {
        Self {
            gateway: Arc::new(gateway),
            tool_router: Self::tool_router(),
        }
    }

    pub fn gateway(&self) -> &Gateway<SqliteBackend> {
        &self.gateway
    }

    /// Run a gateway call on the blocking pool
    async fn call<F>(&self, f: F) -> CallToolResult
    where
        F: FnOnce(&Gateway<SqliteBackend>) -> ToolResponse + Send + 'static,
    {
        let gateway = self.gateway.clone();
        let response = tokio::task::spawn_blocking(move || f(&gateway))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Gateway worker failed");
                ToolResponse::failure(&GatewayError::execution(format!(
                    "Query worker failed: {}",
                    e
                )))
            });

        if response.is_error {
            text_error(response.text)
        } else {
            text_success(response.text)
        }
    }
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl SqlGatewayServer {
    #[tool(
        description = "Execute a single read-only SELECT statement with optional named bind parameters. \
                       Returns a JSON array with one object per row. A trailing record with \"_truncated\" \
                       means more rows (\"rows\") or more output (\"bytes\") exist; raise max_rows or \
                       max_bytes to see them."
    )]
    async fn execute_query(
        &self,
        Parameters(params): Parameters<ExecuteQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.call(move |gateway| gateway.execute_query(params)).await)
    }

    #[tool(
        description = "Describe the columns of a table: name, nullability, declared type, length or \
                       precision, and column comment."
    )]
    async fn describe_table(
        &self,
        Parameters(params): Parameters<DescribeTableParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.call(move |gateway| gateway.describe_table(params)).await)
    }

    #[tool(
        description = "List tables and views with their owner, type and column count. Filter with a \
                       LIKE pattern and sort by NAME or CREATED. Internal tables are hidden unless \
                       include_internal is true."
    )]
    async fn list_tables(
        &self,
        Parameters(params): Parameters<ListTablesParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.call(move |gateway| gateway.list_tables(params)).await)
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for SqlGatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Read-only SQL gateway. Use list_tables to find tables, describe_table to see \
                 their columns, and execute_query to run a single SELECT with bind parameters. \
                 Results are capped by max_rows and max_bytes."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ============================================================================
// EmbeddableMcp Implementation
// ============================================================================

#[async_trait]
impl EmbeddableMcp for SqlGatewayServer {
    fn server_name(&self) -> &str {
        "sql-gateway"
    }

    fn server_description(&self) -> Option<&str> {
        Some("Read-only SQL gateway with validated, row- and byte-bounded query results")
    }

    fn server_version(&self) -> Option<&str> {
        Some(env!("CARGO_PKG_VERSION"))
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    async fn call_tool(&self, name: &str, params: Value) -> EmbeddableResult<CallToolResult> {
        match name {
            "execute_query" => {
                let params: ExecuteQueryParams = serde_json::from_value(params)?;
                self.execute_query(Parameters(params)).await.map_err(Into::into)
            }

            "describe_table" => {
                let params: DescribeTableParams = serde_json::from_value(params)?;
                self.describe_table(Parameters(params)).await.map_err(Into::into)
            }

            "list_tables" => {
                let params: ListTablesParams = serde_json::from_value(params)?;
                self.list_tables(Parameters(params)).await.map_err(Into::into)
            }

            _ => Err(EmbeddableError::ToolNotFound(name.to_string())),
        }
    }
}
