//! SQL Gateway MCP Library
//!
//! Guarded, read-only SQL execution. A statement must pass the validator
//! before it reaches the database, results are fetched one bounded page at a
//! time, and the rendered output never exceeds the caller's byte budget.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use sql_gateway_mcp::{Gateway, GatewayConfig, ExecuteQueryParams};
//!
//! let gateway = Gateway::from_config(&GatewayConfig::with_database("hr.db"))?;
//! let response = gateway.execute_query(ExecuteQueryParams {
//!     sql: "SELECT id, name FROM employees WHERE id < :p1".into(),
//!     params: serde_json::json!({"p1": 5}).as_object().cloned(),
//!     ..Default::default()
//! });
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod gateway;
pub mod normalize;
pub mod params;
pub mod pool;
pub mod request;
pub mod serializer;
pub mod server;
pub mod types;
pub mod validator;

// Re-export main server type
pub use server::SqlGatewayServer;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use types::{GatewayError, PolicyViolation, TableOrder, ToolResponse};
pub use validator::{validate, ValidatedStatement};

// Re-export parameter types for direct API usage
pub use params::*;
