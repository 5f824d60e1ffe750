//! SQLite backend built on rusqlite
//!
//! Connections are opened read-only with `query_only` set, and every prepared
//! statement is checked with `sqlite3_stmt_readonly` before it runs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{ErrorCode, OpenFlags, Rows, Statement, ToSql};

use super::{Backend, BoundQuery, Connection, Cursor};
use crate::types::{BackendError, BindValue, ColumnDescriptor, RawValue};

/// Virtual machine instructions between deadline checks
const PROGRESS_OPS: i32 = 1_000;

/// Placeholder prefixes SQLite accepts for named parameters
const PARAM_PREFIXES: [char; 3] = [':', '@', '$'];

/// Opens connections to one SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    read_only: bool,
    busy_timeout: Duration,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: true,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Allow the connection itself to write; statements are still validated
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Backend for SqliteBackend {
    type Conn = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection, BackendError> {
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        flags |= if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        let conn = rusqlite::Connection::open_with_flags(&self.path, flags).map_err(|e| {
            BackendError::broken(format!(
                "Failed to open database at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| BackendError::broken(format!("Failed to set busy timeout: {}", e)))?;
        if self.read_only {
            conn.pragma_update(None, "query_only", true)
                .map_err(|e| BackendError::broken(format!("Failed to enable query_only: {}", e)))?;
        }

        Ok(SqliteConnection { conn })
    }

    fn describe(&self) -> String {
        format!(
            "sqlite:{} ({})",
            self.path.display(),
            if self.read_only { "read-only" } else { "read-write" }
        )
    }
}

/// A single SQLite connection
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn run_query(
        &mut self,
        query: BoundQuery<'_>,
        visit: &mut dyn FnMut(&mut dyn Cursor) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        if let Some(timeout) = query.timeout {
            let deadline = Instant::now() + timeout;
            self.conn
                .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        }

        let result = run_statement(&self.conn, query, visit);

        if query.timeout.is_some() {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
        result
    }
}

fn run_statement(
    conn: &rusqlite::Connection,
    query: BoundQuery<'_>,
    visit: &mut dyn FnMut(&mut dyn Cursor) -> Result<(), BackendError>,
) -> Result<(), BackendError> {
    let timeout = query.timeout;
    let mut stmt = conn
        .prepare(query.sql)
        .map_err(|e| sqlite_error(e, timeout))?;

    if !stmt.readonly() {
        return Err(BackendError::new(
            "Statement would modify the database and was refused",
        ));
    }

    bind_named(&mut stmt, query)?;

    let columns = stmt
        .columns()
        .iter()
        .map(|c| ColumnDescriptor {
            name: c.name().to_string(),
            type_name: c.decl_type().map(str::to_string),
        })
        .collect();

    let mut cursor = SqliteCursor {
        columns,
        rows: stmt.raw_query(),
        timeout,
    };
    visit(&mut cursor)
}

/// Bind every supplied parameter by name and require that nothing is left
/// unbound
fn bind_named(stmt: &mut Statement<'_>, query: BoundQuery<'_>) -> Result<(), BackendError> {
    let mut bound = vec![false; stmt.parameter_count() + 1];

    for (name, value) in query.params {
        let index = parameter_index(stmt, name)?.ok_or_else(|| {
            BackendError::new(format!(
                "Bind parameter '{}' is not referenced by the query",
                name
            ))
        })?;
        stmt.raw_bind_parameter(index, value)
            .map_err(|e| BackendError::new(format!("Failed to bind '{}': {}", name, e)))?;
        bound[index] = true;
    }

    if let Some(index) = (1..bound.len()).find(|&i| !bound[i]) {
        let name = stmt
            .parameter_name(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("?{}", index));
        return Err(BackendError::new(format!(
            "No value supplied for bind parameter {}",
            name
        )));
    }
    Ok(())
}

fn parameter_index(stmt: &Statement<'_>, name: &str) -> Result<Option<usize>, BackendError> {
    for prefix in PARAM_PREFIXES {
        let placeholder = format!("{}{}", prefix, name);
        let index = stmt
            .parameter_index(&placeholder)
            .map_err(|e| BackendError::new(e.to_string()))?;
        if index.is_some() {
            return Ok(index);
        }
    }
    Ok(None)
}

struct SqliteCursor<'s> {
    columns: Vec<ColumnDescriptor>,
    rows: Rows<'s>,
    timeout: Option<Duration>,
}

impl Cursor for SqliteCursor<'_> {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn fetch_many(&mut self, max: usize) -> Result<Vec<Vec<RawValue>>, BackendError> {
        let width = self.columns.len();
        let timeout = self.timeout;
        let mut batch = Vec::new();

        while batch.len() < max {
            let Some(row) = self.rows.next().map_err(|e| sqlite_error(e, timeout))? else {
                break;
            };
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                let value = row.get_ref(index).map_err(|e| sqlite_error(e, timeout))?;
                values.push(raw_value(value));
            }
            batch.push(values);
        }
        Ok(batch)
    }
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Float(f),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => RawValue::Text(text.to_string()),
            Err(_) => RawValue::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => RawValue::Blob(Box::new(bytes.to_vec())),
    }
}

fn sqlite_error(err: rusqlite::Error, timeout: Option<Duration>) -> BackendError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => match timeout {
            Some(t) => BackendError::new(format!(
                "Statement cancelled after exceeding the {}ms timeout",
                t.as_millis()
            )),
            None => BackendError::new("Statement was interrupted"),
        },
        Some(
            ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure,
        ) => BackendError::broken(err.to_string()),
        _ => BackendError::new(err.to_string()),
    }
}

impl ToSql for BindValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            BindValue::Null => ToSqlOutput::Owned(Value::Null),
            BindValue::Boolean(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            BindValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            BindValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            BindValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BindParams;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SqliteBackend) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name VARCHAR(20), payload BLOB);
             INSERT INTO t VALUES (1, 'one', x'00ff'), (2, NULL, NULL), (3, 'three', NULL);",
        )
        .unwrap();
        (dir, SqliteBackend::new(path))
    }

    fn collect(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &BindParams,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ColumnDescriptor>, Vec<Vec<RawValue>>), BackendError> {
        let mut out = (Vec::new(), Vec::new());
        conn.run_query(
            BoundQuery {
                sql,
                params,
                timeout,
            },
            &mut |cursor| {
                out.0 = cursor.columns().to_vec();
                loop {
                    let batch = cursor.fetch_many(2)?;
                    if batch.is_empty() {
                        return Ok(());
                    }
                    out.1.extend(batch);
                }
            },
        )?;
        Ok(out)
    }

    #[test]
    fn test_named_binding_and_value_mapping() {
        let (_dir, backend) = fixture();
        let mut conn = backend.connect().unwrap();
        let mut params = BindParams::new();
        params.insert("p1".into(), BindValue::Integer(3));

        let (columns, rows) = collect(
            &mut conn,
            "SELECT id, name, payload FROM t WHERE id < :p1 ORDER BY id",
            &params,
            None,
        )
        .unwrap();

        assert_eq!(columns[1].name, "name");
        assert_eq!(columns[1].type_name.as_deref(), Some("VARCHAR(20)"));
        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[0][0], RawValue::Integer(1)));
        assert!(matches!(&rows[0][1], RawValue::Text(s) if s == "one"));
        assert!(matches!(&rows[0][2], RawValue::Blob(b) if b.size().unwrap() == 2));
        assert!(matches!(rows[1][1], RawValue::Null));
    }

    #[test]
    fn test_unknown_and_missing_parameters_rejected() {
        let (_dir, backend) = fixture();
        let mut conn = backend.connect().unwrap();

        let mut extra = BindParams::new();
        extra.insert("nope".into(), BindValue::Integer(1));
        let err = collect(&mut conn, "SELECT id FROM t", &extra, None).unwrap_err();
        assert!(err.message.contains("not referenced"));

        let err = collect(&mut conn, "SELECT id FROM t WHERE id = :p1", &BindParams::new(), None)
            .unwrap_err();
        assert!(err.message.contains(":p1"));
    }

    #[test]
    fn test_connection_is_read_only() {
        let (_dir, backend) = fixture();
        let mut conn = backend.connect().unwrap();
        let err = collect(&mut conn, "DELETE FROM t", &BindParams::new(), None).unwrap_err();
        assert!(err.message.contains("refused"));
    }

    #[test]
    fn test_runaway_statement_times_out() {
        let (_dir, backend) = fixture();
        let mut conn = backend.connect().unwrap();
        let err = collect(
            &mut conn,
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION SELECT x + 1 FROM c) SELECT max(x) FROM c",
            &BindParams::new(),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
        assert!(err.message.contains("timeout"), "{}", err.message);
        assert!(!err.broken);

        // The handler is cleared, so the connection stays usable
        let (_, rows) = collect(&mut conn, "SELECT 1", &BindParams::new(), None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_missing_database_is_broken_connection() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("absent.db"));
        let err = backend.connect().err().unwrap();
        assert!(err.broken);
    }
}
