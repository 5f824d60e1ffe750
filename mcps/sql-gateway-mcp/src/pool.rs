//! Bounded connection pool
//!
//! Connections are handed out as [`PooledConnection`] guards. Dropping the
//! guard returns the connection on every exit path, including early returns
//! and unwinding; a guard marked broken closes its connection instead.

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::Backend;
use crate::types::BackendError;

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Connections open at the same time, idle or in use
    pub max_size: usize,
    /// Idle connections kept between calls
    pub max_idle: usize,
    /// How long `acquire` waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 4,
            max_idle: 2,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

struct PoolState<C> {
    idle: Vec<C>,
    open: usize,
}

pub struct ConnectionPool<B: Backend> {
    backend: B,
    options: PoolOptions,
    state: Mutex<PoolState<B::Conn>>,
    available: Condvar,
}

impl<B: Backend> ConnectionPool<B> {
    pub fn new(backend: B, options: PoolOptions) -> Self {
        Self {
            backend,
            options: PoolOptions {
                max_size: options.max_size.max(1),
                ..options
            },
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take an idle connection, open a new one, or wait for a release
    pub fn acquire(&self) -> Result<PooledConnection<'_, B>, BackendError> {
        let deadline = Instant::now() + self.options.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection::new(self, conn));
            }

            if state.open < self.options.max_size {
                // Reserve the slot, then connect without holding the lock
                state.open += 1;
                drop(state);
                return match self.backend.connect() {
                    Ok(conn) => Ok(PooledConnection::new(self, conn)),
                    Err(e) => {
                        self.release_slot();
                        Err(e)
                    }
                };
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(BackendError::new(format!(
                    "Timed out after {:?} waiting for a database connection",
                    self.options.acquire_timeout
                )));
            }
        }
    }

    /// Connections currently open (idle plus checked out)
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    pub fn idle_connections(&self) -> usize {
        self.state.lock().idle.len()
    }

    fn release(&self, conn: B::Conn, reusable: bool) {
        let mut state = self.state.lock();
        if reusable && state.idle.len() < self.options.max_idle {
            state.idle.push(conn);
        } else {
            state.open -= 1;
            drop(state);
            drop(conn);
        }
        self.available.notify_one();
    }

    fn release_slot(&self) {
        self.state.lock().open -= 1;
        self.available.notify_one();
    }
}

/// A checked-out connection
pub struct PooledConnection<'p, B: Backend> {
    pool: &'p ConnectionPool<B>,
    conn: Option<B::Conn>,
    broken: bool,
}

impl<'p, B: Backend> PooledConnection<'p, B> {
    fn new(pool: &'p ConnectionPool<B>, conn: B::Conn) -> Self {
        Self {
            pool,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Close the connection on release instead of reusing it
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<B: Backend> Deref for PooledConnection<'_, B> {
    type Target = B::Conn;

    fn deref(&self) -> &B::Conn {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<B: Backend> DerefMut for PooledConnection<'_, B> {
    fn deref_mut(&mut self) -> &mut B::Conn {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<B: Backend> Drop for PooledConnection<'_, B> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let reusable = !self.broken && !std::thread::panicking();
            self.pool.release(conn, reusable);
        }
    }
}
