//! Bounded pool of reusable storage connections.
//!
//! Connections move through `free -> checked_out -> free`, or end in `closed`
//! when a validity check fails, when they sit idle past the idle timeout, or
//! when the pool shuts down. All state lives behind one `parking_lot::Mutex`;
//! waiters for capacity park on a `parking_lot::Condvar` that is signalled
//! whenever a connection is returned or a slot is freed.
//!
//! Checkouts are scoped: [`PooledConnection`] returns itself to the pool on
//! drop, so every exit path (including `?` on an error) releases it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::background::BackgroundTask;
use crate::core::PoolError;
use crate::util::clock::{duration_ms, Clock, SystemClock, TimestampMs};

/// Opens, validates and closes connections for a [`ResourcePool`].
pub trait ConnectionManager: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: Send + 'static;
    /// Error returned when a connection cannot be opened.
    type Error: std::fmt::Display;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the connection cannot be established.
    fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap liveness probe, run on checkout and on release.
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Close a connection that leaves the pool. Defaults to dropping it.
    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Capacity and idle limits.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Maximum open connections (free plus checked out).
    pub max_size: usize,
    /// Free connections idle longer than this are closed by the reaper.
    pub idle_timeout: Duration,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured capacity.
    pub max_size: usize,
    /// Open connections, free or checked out.
    pub open: usize,
    /// Free connections.
    pub idle: usize,
    /// Checked-out connections.
    pub in_use: usize,
    /// Connections opened over the pool's lifetime.
    pub created: u64,
    /// Connections closed over the pool's lifetime.
    pub closed: u64,
    /// Connections closed because a validity check failed.
    pub invalidated: u64,
    /// Acquisitions that failed with [`PoolError::Exhausted`].
    pub exhausted: u64,
}

struct IdleConnection<C> {
    conn: C,
    idle_since_ms: TimestampMs,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    /// Free plus checked out. A slot is reserved before `connect` runs.
    open: usize,
    shutdown: bool,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    closed: AtomicU64,
    invalidated: AtomicU64,
    exhausted: AtomicU64,
}

struct PoolShared<M: ConnectionManager> {
    manager: M,
    limits: PoolLimits,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<M::Connection>>,
    available: Condvar,
    counters: PoolCounters,
}

impl<M: ConnectionManager> PoolShared<M> {
    /// Close a connection and free its slot.
    fn discard(&self, conn: M::Connection) {
        self.manager.close(conn);
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            state.open = state.open.saturating_sub(1);
        }
        self.available.notify_one();
    }

    fn release(&self, mut conn: M::Connection, broken: bool) {
        if broken || !self.manager.is_valid(&mut conn) {
            self.counters.invalidated.fetch_add(1, Ordering::Relaxed);
            debug!("closing invalid connection on release");
            self.discard(conn);
            return;
        }

        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            self.discard(conn);
            return;
        }
        state.idle.push_back(IdleConnection {
            conn,
            idle_since_ms: self.clock.now_ms(),
        });
        drop(state);
        self.available.notify_one();
    }
}

/// Bounded, validity-checked connection pool. Cheap to clone; clones share
/// the same connections.
pub struct ResourcePool<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
}

impl<M: ConnectionManager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> ResourcePool<M> {
    /// Create an empty pool. Connections are opened lazily.
    pub fn new(manager: M, limits: PoolLimits) -> Self {
        Self::with_clock(manager, limits, Arc::new(SystemClock))
    }

    /// Create an empty pool that measures idle time with `clock`.
    pub fn with_clock(manager: M, limits: PoolLimits, clock: Arc<dyn Clock>) -> Self {
        info!(
            max_size = limits.max_size,
            idle_timeout_ms = limits.idle_timeout.as_millis(),
            "connection pool created"
        );
        Self {
            shared: Arc::new(PoolShared {
                manager,
                limits,
                clock,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    open: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                counters: PoolCounters::default(),
            }),
        }
    }

    /// The connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> &PoolLimits {
        &self.shared.limits
    }

    /// Check out a connection, waiting up to `timeout` for one to free up.
    ///
    /// Free connections are reused most-recently-returned first and are
    /// validated before being handed out; an invalid one is closed and the
    /// search continues. Below capacity a new connection is opened.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Exhausted`] if the pool stayed at capacity until the timeout
    /// - [`PoolError::Connect`] if opening a new connection failed
    /// - [`PoolError::Shutdown`] if the pool has been shut down
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let shared = &self.shared;
        let mut state = shared.state.lock();

        loop {
            if state.shutdown {
                return Err(PoolError::Shutdown);
            }

            if let Some(idle) = state.idle.pop_back() {
                drop(state);
                let mut conn = idle.conn;
                if shared.manager.is_valid(&mut conn) {
                    return Ok(self.wrap(conn));
                }
                shared.counters.invalidated.fetch_add(1, Ordering::Relaxed);
                debug!("closing invalid connection on checkout");
                shared.discard(conn);
                state = shared.state.lock();
                continue;
            }

            if state.open < shared.limits.max_size {
                state.open += 1;
                drop(state);
                return match shared.manager.connect() {
                    Ok(conn) => {
                        let created = shared.counters.created.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(created, "opened new pooled connection");
                        Ok(self.wrap(conn))
                    }
                    Err(e) => {
                        {
                            let mut state = shared.state.lock();
                            state.open = state.open.saturating_sub(1);
                        }
                        shared.available.notify_one();
                        warn!(error = %e, "failed to open pooled connection");
                        Err(PoolError::Connect(e.to_string()))
                    }
                };
            }

            let timed_out = match deadline {
                Some(deadline) => shared.available.wait_until(&mut state, deadline).timed_out(),
                None => {
                    shared.available.wait(&mut state);
                    false
                }
            };
            let still_full = state.idle.is_empty() && state.open >= shared.limits.max_size;
            if timed_out && still_full && !state.shutdown {
                shared.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                let waited = started.elapsed();
                warn!(
                    max_size = shared.limits.max_size,
                    waited_ms = waited.as_millis(),
                    "connection pool exhausted"
                );
                return Err(PoolError::Exhausted { waited });
            }
        }
    }

    fn wrap(&self, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            shared: Arc::clone(&self.shared),
            conn: Some(conn),
            broken: false,
        }
    }

    /// Close free connections idle longer than the idle timeout.
    ///
    /// Returns how many were closed.
    pub fn reap_idle(&self) -> usize {
        let shared = &self.shared;
        let now = shared.clock.now_ms();
        let max_idle_ms = duration_ms(shared.limits.idle_timeout);

        let expired: VecDeque<IdleConnection<M::Connection>> = {
            let mut state = shared.state.lock();
            let (expired, keep): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|c| now.saturating_sub(c.idle_since_ms) > max_idle_ms);
            state.idle = keep;
            state.open = state.open.saturating_sub(expired.len());
            expired
        };

        let reaped = expired.len();
        for idle in expired {
            shared.manager.close(idle.conn);
        }
        if reaped > 0 {
            shared.counters.closed.fetch_add(reaped as u64, Ordering::Relaxed);
            shared.available.notify_all();
            debug!(reaped, "closed idle pooled connections");
        }
        reaped
    }

    /// Run [`Self::reap_idle`] every `interval` on a background thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the reaper thread could not be spawned.
    pub fn spawn_reaper(&self, interval: Duration) -> std::io::Result<BackgroundTask> {
        let pool = self.clone();
        BackgroundTask::spawn("broker-pool-reaper", interval, move || {
            pool.reap_idle();
        })
    }

    /// Close all free connections and refuse further checkouts. Connections
    /// still checked out are closed when they are returned.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let drained: Vec<IdleConnection<M::Connection>> = {
            let mut state = shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(drained.len());
            drained
        };
        let closed = drained.len();
        for idle in drained {
            shared.manager.close(idle.conn);
        }
        shared.counters.closed.fetch_add(closed as u64, Ordering::Relaxed);
        shared.available.notify_all();
        info!(closed, "connection pool shut down");
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let (open, idle) = {
            let state = shared.state.lock();
            (state.open, state.idle.len())
        };
        PoolStats {
            max_size: shared.limits.max_size,
            open,
            idle,
            in_use: open.saturating_sub(idle),
            created: shared.counters.created.load(Ordering::Relaxed),
            closed: shared.counters.closed.load(Ordering::Relaxed),
            invalidated: shared.counters.invalidated.load(Ordering::Relaxed),
            exhausted: shared.counters.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out connection. Returned to the pool when dropped.
pub struct PooledConnection<M: ConnectionManager> {
    shared: Arc<PoolShared<M>>,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Close this connection on release instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.broken);
        }
    }
}
