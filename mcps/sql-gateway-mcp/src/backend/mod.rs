//! Database backend seam
//!
//! The gateway only needs a way to open connections, run one statement with
//! named bind parameters and walk the resulting cursor in batches. Anything
//! that can do that (the bundled SQLite driver, or a fake in tests) plugs in
//! here.

pub mod sqlite;

use std::time::Duration;

use crate::types::{BackendError, BindParams, ColumnDescriptor, RawValue};

pub use sqlite::SqliteBackend;

/// One statement ready to run
#[derive(Debug, Clone, Copy)]
pub struct BoundQuery<'a> {
    pub sql: &'a str,
    pub params: &'a BindParams,
    /// Interrupt the statement once this much time has passed
    pub timeout: Option<Duration>,
}

/// Cursor over the rows of a running statement
pub trait Cursor {
    fn columns(&self) -> &[ColumnDescriptor];

    /// Fetch up to `max` rows; an empty batch means the source is exhausted
    fn fetch_many(&mut self, max: usize) -> Result<Vec<Vec<RawValue>>, BackendError>;
}

/// An open database connection
pub trait Connection: Send + 'static {
    /// Run `query` and hand its cursor to `visit`
    ///
    /// The cursor borrows the statement handle, so it only lives for the
    /// duration of the callback; the handle is finalized before this returns.
    fn run_query(
        &mut self,
        query: BoundQuery<'_>,
        visit: &mut dyn FnMut(&mut dyn Cursor) -> Result<(), BackendError>,
    ) -> Result<(), BackendError>;
}

/// Factory for connections to one database
pub trait Backend: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(&self) -> Result<Self::Conn, BackendError>;

    /// Human-readable target description for logs
    fn describe(&self) -> String;
}
