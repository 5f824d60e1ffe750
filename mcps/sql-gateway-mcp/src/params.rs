//! Parameter types for SQL gateway tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    #[schemars(description = "A single SELECT statement. Reference bind parameters as :name")]
    pub sql: String,

    #[schemars(
        description = "Bind parameters by name (without the colon). Values must be strings, numbers, booleans or null"
    )]
    #[serde(default)]
    pub params: Option<Value>,

    #[schemars(description = "Maximum rows to return (default: 100)")]
    #[serde(default)]
    pub max_rows: Option<i64>,

    #[schemars(description = "Maximum size of the output in bytes (default: 10000, minimum: 256)")]
    #[serde(default)]
    pub max_bytes: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct DescribeTableParams {
    #[schemars(description = "Table name (letters, digits and underscores)")]
    pub table_name: String,

    #[schemars(description = "Schema that owns the table (default: main)")]
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListTablesParams {
    #[schemars(description = "Maximum tables to return (default: 100)")]
    #[serde(default)]
    pub max_rows: Option<i64>,

    #[schemars(description = "Maximum size of the output in bytes (default: 10000, minimum: 256)")]
    #[serde(default)]
    pub max_bytes: Option<i64>,

    #[schemars(description = "SQL LIKE pattern for table names, e.g. '%EMP%'")]
    #[serde(default)]
    pub name_pattern: Option<String>,

    #[schemars(description = "Sort by NAME (default) or CREATED")]
    #[serde(default)]
    pub order_by: Option<String>,

    #[schemars(description = "Include internal tables whose names contain '$' or start with 'sqlite_'")]
    #[serde(default)]
    pub include_internal: Option<bool>,

    #[schemars(description = "Schema to list (default: main)")]
    #[serde(default)]
    pub owner: Option<String>,
}
