//! SQL Gateway MCP Server
//!
//! Serves execute_query, describe_table and list_tables over stdio against a
//! read-only SQLite database.

use sql_gateway_mcp::SqlGatewayServer;

mcp_common::serve_stdio!(SqlGatewayServer, "sql_gateway_mcp");
