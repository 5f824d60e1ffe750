//! Gateway pipeline
//!
//! Each call runs validate → execute → normalize → serialize and is reduced
//! to a [`ToolResponse`]; nothing here returns an error to the transport.
//! Statements are validated before a connection is acquired.

use std::time::Instant;

use anyhow::Context;

use crate::backend::{Backend, SqliteBackend};
use crate::catalog;
use crate::config::{GatewayConfig, LimitsConfig};
use crate::executor::BoundedExecutor;
use crate::params::{DescribeTableParams, ExecuteQueryParams, ListTablesParams};
use crate::pool::ConnectionPool;
use crate::request;
use crate::serializer;
use crate::types::{GatewayError, ListTablesRequest, QueryRequest, TableOrder, ToolResponse};
use crate::validator;

pub struct Gateway<B: Backend> {
    executor: BoundedExecutor<B>,
    limits: LimitsConfig,
}

impl Gateway<SqliteBackend> {
    /// Build a SQLite gateway from configuration
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let backend = SqliteBackend::new(config.database_path()?)
            .read_only(config.database.read_only)
            .busy_timeout(config.database.busy_timeout());
        Ok(Self::new(backend, config))
    }
}

impl<B: Backend> Gateway<B> {
    pub fn new(backend: B, config: &GatewayConfig) -> Self {
        let pool = ConnectionPool::new(backend, config.pool.options());
        Self {
            executor: BoundedExecutor::new(
                pool,
                config.database.statement_timeout(),
                config.limits.max_query_length,
            ),
            limits: config.limits.clone(),
        }
    }

    pub fn executor(&self) -> &BoundedExecutor<B> {
        &self.executor
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Open one connection to prove the database is reachable
    pub fn check_connection(&self) -> anyhow::Result<()> {
        let pool = self.executor.pool();
        pool.acquire()
            .with_context(|| format!("Cannot connect to {}", pool.backend().describe()))?;
        Ok(())
    }

    // ========================================================================
    // Tool entry points
    // ========================================================================

    pub fn execute_query(&self, params: ExecuteQueryParams) -> ToolResponse {
        let started = Instant::now();
        let result = self
            .query_request(params)
            .and_then(|request| self.run_query(&request));
        respond("execute_query", started, result)
    }

    pub fn describe_table(&self, params: DescribeTableParams) -> ToolResponse {
        let started = Instant::now();
        let result =
            catalog::describe_table(&self.executor, &params.table_name, params.owner.as_deref());
        respond("describe_table", started, result)
    }

    pub fn list_tables(&self, params: ListTablesParams) -> ToolResponse {
        let started = Instant::now();
        let result = self
            .list_request(params)
            .and_then(|request| catalog::list_tables(&self.executor, &request));
        respond("list_tables", started, result)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Check the request shape and apply limit defaults
    pub fn query_request(&self, params: ExecuteQueryParams) -> Result<QueryRequest, GatewayError> {
        request::check_sql_length(&params.sql, self.limits.max_query_length)?;
        Ok(QueryRequest {
            params: request::bind_params_from_json(params.params)?,
            max_rows: Some(request::resolve_max_rows(params.max_rows, &self.limits)?),
            max_bytes: request::resolve_max_bytes(params.max_bytes, &self.limits)?,
            sql: params.sql,
        })
    }

    /// Validate, execute, normalize and serialize one query
    pub fn run_query(&self, request: &QueryRequest) -> Result<String, GatewayError> {
        tracing::debug!(sql = %request.sql, params = request.params.len(), "Executing query");

        let statement = validator::validate(&request.sql).inspect_err(|e| {
            if let GatewayError::Policy(violation) = e {
                tracing::warn!(%violation, "Statement rejected");
            }
        })?;

        let page = self
            .executor
            .run(&statement, &request.params, request.max_rows)?;
        tracing::debug!(
            rows = page.rows.len(),
            columns = page.columns.len(),
            row_truncated = page.truncated,
            "Fetched page"
        );

        serializer::serialize(&page.normalize(), request.max_bytes)
    }

    fn list_request(&self, params: ListTablesParams) -> Result<ListTablesRequest, GatewayError> {
        Ok(ListTablesRequest {
            max_rows: request::resolve_max_rows(params.max_rows, &self.limits)?,
            max_bytes: request::resolve_max_bytes(params.max_bytes, &self.limits)?,
            name_pattern: params.name_pattern,
            order_by: params
                .order_by
                .as_deref()
                .map(str::parse::<TableOrder>)
                .transpose()?
                .unwrap_or_default(),
            include_internal: params.include_internal.unwrap_or(false),
            owner: params.owner,
        })
    }
}

fn respond(tool: &str, started: Instant, result: Result<String, GatewayError>) -> ToolResponse {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(text) => tracing::info!(
            tool,
            outcome = "ok",
            bytes = text.len(),
            byte_truncated = text.contains(r#""_truncated":"bytes""#),
            elapsed_ms,
            "Call completed"
        ),
        Err(e @ GatewayError::Serialization(_)) => tracing::error!(
            tool,
            outcome = e.kind(),
            error = %e,
            elapsed_ms,
            "Call failed"
        ),
        Err(e) => tracing::info!(
            tool,
            outcome = e.kind(),
            error = %e,
            elapsed_ms,
            "Call failed"
        ),
    }
    ToolResponse::from(result)
}
