//! Connection Pool
//!
//! Bounded pool of reusable connections to one data source.
//!
//! ## Accounting
//!
//! The active count and the high-water mark are updated under the same lock
//! as the borrow decision, so the high-water mark always equals the true
//! maximum number of simultaneously borrowed connections.
//!
//! ## Exhaustion
//!
//! With [`ExhaustionPolicy::Fail`] a borrow beyond `max_active` fails
//! immediately. With [`ExhaustionPolicy::Block`] it waits for a connection to
//! be returned, up to the configured timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metamirror_config::{ExhaustionMode, PoolConfig};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::source::{Connection, ConnectionError, ConnectionFactory, DataSourceParams, MetadataSource};

/// Default maximum number of active connections per pool
pub const DEFAULT_MAX_ACTIVE: usize = metamirror_config::DEFAULT_MAX_ACTIVE;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted ({max_active} connections active)")]
    Exhausted { max_active: usize },

    #[error("Connection pool is closed")]
    Closed,

    #[error("Failed to open connection: {0}")]
    Connect(#[source] ConnectionError),

    #[error("Timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    #[error("No data source configured")]
    NotConfigured,
}

/// Behaviour when every connection is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    Fail,
    Block { timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_active: usize,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            exhaustion: ExhaustionPolicy::Fail,
        }
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        let exhaustion = match config.exhaustion {
            ExhaustionMode::Fail => ExhaustionPolicy::Fail,
            ExhaustionMode::Block => ExhaustionPolicy::Block {
                timeout: Duration::from_millis(config.block_timeout_ms),
            },
        };
        Self {
            max_active: config.max_active,
            exhaustion,
        }
    }
}

/// Pool usage counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Connections opened through the factory
    pub created: u64,
    pub borrowed: u64,
    pub returned: u64,
    /// Borrows refused because the pool was exhausted
    pub exhausted: u64,
    /// Connections closed by the pool
    pub closed: u64,
}

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    active: usize,
    high_water: usize,
    closed: bool,
    metrics: PoolMetrics,
}

/// Bounded, thread-safe pool of connections for one data source
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    params: DataSourceParams,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        params: DataSourceParams,
        settings: PoolSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            params,
            settings,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
                high_water: 0,
                closed: false,
                metrics: PoolMetrics::default(),
            }),
            available: Condvar::new(),
        })
    }

    /// Borrow a connection, opening a new one if none is idle
    pub fn get_connection(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        let deadline = match self.settings.exhaustion {
            ExhaustionPolicy::Fail => None,
            ExhaustionPolicy::Block { timeout } => Some((Instant::now() + timeout, timeout)),
        };

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if state.active < self.settings.max_active {
                break;
            }
            match deadline {
                None => {
                    state.metrics.exhausted += 1;
                    warn!(
                        data_source = %self.params.name,
                        max_active = self.settings.max_active,
                        "Connection pool exhausted"
                    );
                    return Err(PoolError::Exhausted {
                        max_active: self.settings.max_active,
                    });
                }
                Some((deadline, timeout)) => {
                    let waited = self.available.wait_until(&mut state, deadline);
                    if waited.timed_out()
                        && !state.closed
                        && state.active >= self.settings.max_active
                    {
                        state.metrics.exhausted += 1;
                        return Err(PoolError::Timeout(timeout));
                    }
                }
            }
        }

        state.active += 1;
        state.high_water = state.high_water.max(state.active);
        state.metrics.borrowed += 1;
        let idle = std::iter::from_fn(|| state.idle.pop()).find(|c| !c.is_closed());
        drop(state);

        let conn = match idle {
            Some(conn) => conn,
            None => match self.factory.connect(&self.params) {
                Ok(conn) => {
                    self.state.lock().metrics.created += 1;
                    debug!(data_source = %self.params.name, "Opened connection");
                    conn
                }
                Err(e) => {
                    self.state.lock().active -= 1;
                    self.available.notify_one();
                    return Err(PoolError::Connect(e));
                }
            },
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    fn release(&self, mut conn: Box<dyn Connection>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        state.metrics.returned += 1;
        if state.closed || conn.is_closed() {
            state.metrics.closed += 1;
            drop(state);
            if let Err(e) = conn.close() {
                warn!(data_source = %self.params.name, "Failed to close connection: {}", e);
            }
        } else {
            state.idle.push(conn);
            drop(state);
        }
        self.available.notify_one();
    }

    /// Close idle connections and refuse further borrows.
    ///
    /// Connections still borrowed are closed when returned.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            state.metrics.closed += state.idle.len() as u64;
            std::mem::take(&mut state.idle)
        };
        for mut conn in idle {
            if let Err(e) = conn.close() {
                warn!(data_source = %self.params.name, "Failed to close connection: {}", e);
            }
        }
        self.available.notify_all();
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Highest number of simultaneously active connections
    pub fn high_water_mark(&self) -> usize {
        self.state.lock().high_water
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }
}

/// A borrowed connection, returned to its pool on drop
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    fn inner(&self) -> Result<&dyn Connection, ConnectionError> {
        self.conn.as_deref().ok_or(ConnectionError::Closed)
    }

    pub fn metadata(&self) -> Result<Box<dyn MetadataSource + '_>, ConnectionError> {
        self.inner()?.metadata()
    }

    pub fn execute(&self, sql: &str) -> Result<usize, ConnectionError> {
        self.inner()?.execute(sql)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.as_ref().is_none_or(|c| c.is_closed())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("data_source", &self.pool.params.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Pool Manager
// ============================================================================

/// Lazily creates, and on demand destroys, the pool for one database.
pub struct PoolManager {
    factory: Option<Arc<dyn ConnectionFactory>>,
    params: Mutex<Option<DataSourceParams>>,
    settings: PoolSettings,
    pool: Mutex<Option<Arc<ConnectionPool>>>,
}

impl PoolManager {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        params: DataSourceParams,
        settings: PoolSettings,
    ) -> Self {
        Self {
            factory: Some(factory),
            params: Mutex::new(Some(params)),
            settings,
            pool: Mutex::new(None),
        }
    }

    /// Manager with no data source; every borrow fails with `NotConfigured`
    pub fn unconfigured() -> Self {
        Self {
            factory: None,
            params: Mutex::new(None),
            settings: PoolSettings::default(),
            pool: Mutex::new(None),
        }
    }

    pub fn params(&self) -> Option<DataSourceParams> {
        self.params.lock().clone()
    }

    /// Replace the data source parameters, discarding the current pool
    pub fn set_params(&self, params: Option<DataSourceParams>) {
        self.disconnect();
        *self.params.lock() = params;
    }

    pub fn get_connection(&self) -> Result<PooledConnection, PoolError> {
        let pool = {
            let mut guard = self.pool.lock();
            match guard.as_ref() {
                Some(pool) => Arc::clone(pool),
                None => {
                    let factory = self.factory.as_ref().ok_or(PoolError::NotConfigured)?;
                    let params = self.params().ok_or(PoolError::NotConfigured)?;
                    info!(
                        data_source = %params.name,
                        max_active = self.settings.max_active,
                        "Creating connection pool"
                    );
                    let pool = ConnectionPool::new(Arc::clone(factory), params, self.settings);
                    *guard = Some(Arc::clone(&pool));
                    pool
                }
            }
        };
        pool.get_connection()
    }

    /// Close and discard the pool, if one exists
    pub fn disconnect(&self) {
        if let Some(pool) = self.pool.lock().take() {
            debug!(data_source = %pool.params.name, "Closing connection pool");
            pool.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// High-water mark of the current pool, zero when disconnected
    pub fn max_active_connections(&self) -> usize {
        self.pool
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.high_water_mark())
    }

    pub fn metrics(&self) -> Option<PoolMetrics> {
        self.pool.lock().as_ref().map(|pool| pool.metrics())
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("params", &self.params())
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .finish()
    }
}
