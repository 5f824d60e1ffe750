//! Bounded executor
//!
//! Runs one statement on a pooled connection and fetches at most one page.
//! Rows are pulled in batches of at most [`FETCH_BATCH_CAP`]; when the page
//! fills up exactly, a single probe row is fetched to learn whether more
//! rows exist, and then thrown away.

use std::time::Duration;

use crate::backend::{Backend, BoundQuery, Connection, Cursor};
use crate::pool::ConnectionPool;
use crate::request;
use crate::types::{BackendError, BindParams, GatewayError, RawValue, RowPage};
use crate::validator::ValidatedStatement;

/// Upper bound on rows requested from the driver in one fetch
pub const FETCH_BATCH_CAP: usize = 100;

pub struct BoundedExecutor<B: Backend> {
    pool: ConnectionPool<B>,
    statement_timeout: Option<Duration>,
    max_query_length: usize,
}

impl<B: Backend> BoundedExecutor<B> {
    pub fn new(
        pool: ConnectionPool<B>,
        statement_timeout: Option<Duration>,
        max_query_length: usize,
    ) -> Self {
        Self {
            pool,
            statement_timeout,
            max_query_length,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<B> {
        &self.pool
    }

    /// Run a validated statement; `max_rows = None` fetches everything
    pub fn run(
        &self,
        statement: &ValidatedStatement,
        params: &BindParams,
        max_rows: Option<usize>,
    ) -> Result<RowPage, GatewayError> {
        self.run_sql(statement.sql(), params, max_rows)
    }

    /// Run SQL the gateway built itself (catalog lookups)
    pub(crate) fn run_sql(
        &self,
        sql: &str,
        params: &BindParams,
        max_rows: Option<usize>,
    ) -> Result<RowPage, GatewayError> {
        request::check_sql_length(sql, self.max_query_length)?;
        request::check_bind_params(params)?;
        if max_rows == Some(0) {
            return Err(GatewayError::validation("max_rows must be at least 1"));
        }

        let mut conn = self
            .pool
            .acquire()
            .map_err(|e| GatewayError::Execution(e.message))?;

        let query = BoundQuery {
            sql,
            params,
            timeout: self.statement_timeout,
        };
        let mut page = None;
        let outcome = conn.run_query(query, &mut |cursor| {
            page = Some(fetch_page(cursor, max_rows)?);
            Ok(())
        });

        match outcome {
            Ok(()) => page.ok_or_else(|| GatewayError::execution("Query produced no result set")),
            Err(e) => {
                if e.broken {
                    conn.mark_broken();
                }
                tracing::debug!(error = %e, "Statement failed");
                Err(GatewayError::Execution(e.message))
            }
        }
    }
}

fn fetch_page(cursor: &mut dyn Cursor, max_rows: Option<usize>) -> Result<RowPage, BackendError> {
    let columns = cursor.columns().to_vec();
    let width = columns.len();
    let batch_size = max_rows.map_or(FETCH_BATCH_CAP, |m| m.min(FETCH_BATCH_CAP));
    let mut rows: Vec<Vec<RawValue>> = Vec::new();
    let mut truncated = false;

    let accept = |batch: Vec<Vec<RawValue>>, rows: &mut Vec<Vec<RawValue>>, take: usize| {
        for row in batch.into_iter().take(take) {
            if row.len() != width {
                return Err(BackendError::new(format!(
                    "Backend returned a row with {} values for {} columns",
                    row.len(),
                    width
                )));
            }
            rows.push(row);
        }
        Ok(())
    };

    match max_rows {
        Some(limit) => {
            // Every non-empty batch adds at least one row, so this runs at
            // most `limit` times even if the cursor misreports its size
            let mut exhausted = false;
            while rows.len() < limit {
                let want = (limit - rows.len()).min(batch_size);
                let batch = cursor.fetch_many(want)?;
                if batch.is_empty() {
                    exhausted = true;
                    break;
                }
                accept(batch, &mut rows, want)?;
            }
            if !exhausted {
                truncated = !cursor.fetch_many(1)?.is_empty();
            }
        }
        None => loop {
            let batch = cursor.fetch_many(batch_size)?;
            if batch.is_empty() {
                break;
            }
            accept(batch, &mut rows, batch_size)?;
        },
    }

    Ok(RowPage {
        columns,
        rows,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolOptions;
    use crate::types::{BindValue, ColumnDescriptor};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fake source of integer rows; `None` rows means an endless source
    #[derive(Clone, Default)]
    struct FakeBackend {
        rows: Option<usize>,
        /// Rows handed out per fetch regardless of the request
        overfill: bool,
        fail_with: Option<BackendError>,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct FakeConnection(FakeBackend);

    struct FakeCursor<'a> {
        backend: &'a FakeBackend,
        columns: Vec<ColumnDescriptor>,
        served: usize,
    }

    impl Cursor for FakeCursor<'_> {
        fn columns(&self) -> &[ColumnDescriptor] {
            &self.columns
        }

        fn fetch_many(&mut self, max: usize) -> Result<Vec<Vec<RawValue>>, BackendError> {
            self.backend.log.lock().push(format!("fetch {}", max));
            let remaining = self.backend.rows.map_or(usize::MAX, |n| n - self.served);
            let count = if self.backend.overfill { max * 2 } else { max }.min(remaining);
            let batch = (0..count)
                .map(|i| vec![RawValue::Integer((self.served + i) as i64)])
                .collect();
            self.served += count;
            Ok(batch)
        }
    }

    impl Connection for FakeConnection {
        fn run_query(
            &mut self,
            query: BoundQuery<'_>,
            visit: &mut dyn FnMut(&mut dyn Cursor) -> Result<(), BackendError>,
        ) -> Result<(), BackendError> {
            let params: Vec<String> = query
                .params
                .iter()
                .map(|(k, v)| format!("{}={:?}", k, v))
                .collect();
            self.0
                .log
                .lock()
                .push(format!("run {} [{}]", query.sql, params.join(",")));
            if let Some(e) = &self.0.fail_with {
                return Err(e.clone());
            }
            let mut cursor = FakeCursor {
                backend: &self.0,
                columns: vec![ColumnDescriptor::new("N")],
                served: 0,
            };
            visit(&mut cursor)
        }
    }

    impl Backend for FakeBackend {
        type Conn = FakeConnection;

        fn connect(&self) -> Result<FakeConnection, BackendError> {
            Ok(FakeConnection(self.clone()))
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn executor(backend: FakeBackend) -> BoundedExecutor<FakeBackend> {
        BoundedExecutor::new(
            ConnectionPool::new(backend, PoolOptions::default()),
            None,
            1_000_000,
        )
    }

    fn statement(sql: &str) -> ValidatedStatement {
        crate::validator::validate(sql).unwrap()
    }

    fn values(page: &RowPage) -> Vec<i64> {
        page.rows
            .iter()
            .map(|r| match r[0] {
                RawValue::Integer(i) => i,
                _ => panic!("unexpected value"),
            })
            .collect()
    }

    #[test]
    fn test_page_smaller_than_source_is_truncated() {
        let exec = executor(FakeBackend {
            rows: Some(10),
            ..Default::default()
        });
        let page = exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(5))
            .unwrap();
        assert_eq!(values(&page), vec![0, 1, 2, 3, 4]);
        assert!(page.truncated);
    }

    #[test]
    fn test_exact_fit_is_not_truncated() {
        let exec = executor(FakeBackend {
            rows: Some(5),
            ..Default::default()
        });
        let page = exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(5))
            .unwrap();
        assert_eq!(page.rows.len(), 5);
        assert!(!page.truncated);
    }

    #[test]
    fn test_short_source_skips_probe() {
        let backend = FakeBackend {
            rows: Some(3),
            ..Default::default()
        };
        let log = backend.log.clone();
        let page = executor(backend)
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(200))
            .unwrap();
        assert_eq!(page.rows.len(), 3);
        assert!(!page.truncated);
        let log = log.lock();
        assert_eq!(log[1], "fetch 100");
        assert_eq!(log.last().unwrap(), "fetch 100");
    }

    #[test]
    fn test_batches_are_capped() {
        let backend = FakeBackend {
            rows: Some(1_000),
            ..Default::default()
        };
        let log = backend.log.clone();
        let page = executor(backend)
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(250))
            .unwrap();
        assert_eq!(page.rows.len(), 250);
        assert!(page.truncated);
        let fetches: Vec<String> = log.lock()[1..].to_vec();
        assert_eq!(fetches, vec!["fetch 100", "fetch 100", "fetch 50", "fetch 1"]);
    }

    #[test]
    fn test_endless_overfilling_source_terminates() {
        let exec = executor(FakeBackend {
            rows: None,
            overfill: true,
            ..Default::default()
        });
        let page = exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(7))
            .unwrap();
        assert_eq!(values(&page), (0..7).collect::<Vec<_>>());
        assert!(page.truncated);
    }

    #[test]
    fn test_unbounded_mode_fetches_everything_without_probe() {
        let exec = executor(FakeBackend {
            rows: Some(345),
            ..Default::default()
        });
        let page = exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), None)
            .unwrap();
        assert_eq!(page.rows.len(), 345);
        assert!(!page.truncated);
    }

    #[test]
    fn test_params_passed_by_name() {
        let backend = FakeBackend {
            rows: Some(3),
            ..Default::default()
        };
        let log = backend.log.clone();
        let mut params = BindParams::new();
        params.insert("p1".into(), BindValue::Integer(5));
        executor(backend)
            .run(&statement("SELECT id, name FROM t WHERE id < :p1"), &params, Some(200))
            .unwrap();
        assert_eq!(log.lock()[0], "run SELECT id, name FROM t WHERE id < :p1 [p1=Integer(5)]");
    }

    #[test]
    fn test_backend_failure_is_execution_error() {
        let exec = executor(FakeBackend {
            fail_with: Some(BackendError::new("no such table: t")),
            ..Default::default()
        });
        let err = exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(5))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Execution(ref m) if m == "no such table: t"));
        // The connection went back to the pool
        assert_eq!(exec.pool().idle_connections(), 1);
    }

    #[test]
    fn test_broken_connection_not_reused() {
        let exec = executor(FakeBackend {
            fail_with: Some(BackendError::broken("disk I/O error")),
            ..Default::default()
        });
        assert!(exec
            .run(&statement("SELECT n FROM t"), &BindParams::new(), Some(5))
            .is_err());
        assert_eq!(exec.pool().open_connections(), 0);
    }

    #[test]
    fn test_bad_params_rejected_before_connecting() {
        let backend = FakeBackend::default();
        let log = backend.log.clone();
        let mut params = BindParams::new();
        params.insert("bad-name".into(), BindValue::Integer(1));
        let err = executor(backend)
            .run(&statement("SELECT 1"), &params, Some(5))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(log.lock().is_empty());
    }
}
