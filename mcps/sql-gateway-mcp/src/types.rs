//! Type definitions for the SQL gateway
//!
//! Request, page and cell types that flow through the pipeline, plus the
//! error taxonomy every tool call is reduced to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Reasons the statement validator rejects a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Multiple SQL statements are not allowed; submit exactly one SELECT")]
    MultiStatement,

    #[error("Only SELECT statements can be executed (found {0})")]
    NotSelect(String),

    #[error("Forbidden keyword '{0}' detected")]
    ForbiddenKeyword(String),

    #[error("{clause} is not allowed. {guidance}")]
    ForbiddenClause {
        clause: &'static str,
        guidance: &'static str,
    },

    #[error("UNION must be followed directly by a SELECT (found {0})")]
    MalformedUnion(String),

    #[error("Nested block comments are not allowed")]
    NestedComment,
}

/// Every failure a gateway call can end in
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed request shape: bad parameter, identifier, limit or SQL text
    #[error("{0}")]
    Validation(String),

    /// Statement rejected by the validator
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Backend rejected or failed the query
    #[error("{0}")]
    Execution(String),

    /// Rendering the result failed
    #[error("{0}")]
    Serialization(String),
}

impl GatewayError {
    /// Short kind label used in error responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "ValidationError",
            GatewayError::Policy(_) => "PolicyViolation",
            GatewayError::Execution(_) => "ExecutionError",
            GatewayError::Serialization(_) => "SerializationError",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        GatewayError::Execution(message.into())
    }
}

/// Error reported by a database backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// The connection is no longer usable and must not go back to the pool
    pub broken: bool,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            broken: false,
        }
    }

    pub fn broken(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            broken: true,
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// A scalar bind value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Named bind parameters, ordered by name for deterministic logging
pub type BindParams = BTreeMap<String, BindValue>;

/// A query as received from the caller
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub params: BindParams,
    /// `None` fetches every row and relies on the byte budget alone
    pub max_rows: Option<usize>,
    pub max_bytes: usize,
}

/// Catalog ordering for table listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableOrder {
    #[default]
    Name,
    Created,
}

impl FromStr for TableOrder {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NAME" => Ok(TableOrder::Name),
            "CREATED" => Ok(TableOrder::Created),
            _ => Err(GatewayError::validation(format!(
                "order_by must be NAME or CREATED (found {:?})",
                s
            ))),
        }
    }
}

/// A table listing request
#[derive(Debug, Clone)]
pub struct ListTablesRequest {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub name_pattern: Option<String>,
    pub order_by: TableOrder,
    pub include_internal: bool,
    pub owner: Option<String>,
}

// ============================================================================
// Result Types
// ============================================================================

/// Column metadata reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared type, when the backend knows it
    pub type_name: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
        }
    }
}

/// A large object whose content is read on demand
pub trait LargeObject: fmt::Debug + Send {
    /// Size in bytes
    fn size(&self) -> Result<u64, BackendError>;

    /// Full content
    fn read(&self) -> Result<Vec<u8>, BackendError>;
}

impl LargeObject for Vec<u8> {
    fn size(&self) -> Result<u64, BackendError> {
        Ok(self.len() as u64)
    }

    fn read(&self) -> Result<Vec<u8>, BackendError> {
        Ok(self.clone())
    }
}

/// A column value exactly as the backend delivered it
#[derive(Debug)]
pub enum RawValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Character data that has not been decoded yet
    Bytes(Vec<u8>),
    /// Large binary object
    Blob(Box<dyn LargeObject>),
    /// Large character object
    Clob(Box<dyn LargeObject>),
    /// Reference to a file outside the database
    FileRef,
}

/// One bounded page of results
#[derive(Debug)]
pub struct RowPage<T = RawValue> {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<T>>,
    /// A row beyond this page exists
    pub truncated: bool,
}

impl<T> RowPage<T> {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Response text handed back to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn failure(err: &GatewayError) -> Self {
        Self {
            text: format!("{}: {}", err.kind(), err),
            is_error: true,
        }
    }
}

impl From<Result<String, GatewayError>> for ToolResponse {
    fn from(result: Result<String, GatewayError>) -> Self {
        match result {
            Ok(text) => ToolResponse::success(text),
            Err(e) => ToolResponse::failure(&e),
        }
    }
}
