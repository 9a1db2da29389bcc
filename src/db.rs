//! Database connection pooling.
//!
//! The wire protocol is opaque to the pool: a [`ConnectionDriver`]
//! supplies connect/ping/close for a concrete database, and
//! [`DatabaseConnectionPool`] layers pooled lifecycle management plus
//! per-connection instrumentation counters on top.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::factory::ResourceFactory;
use crate::guard::PoolGuard;
use crate::pool::Pool;
use crate::stats::PoolStats;

// ---------------------------------------------------------------------------
// DbConfig
// ---------------------------------------------------------------------------

/// Connection parameters handed to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Driver-specific options, passed through untouched.
    pub options: BTreeMap<String, String>,
    /// Upper bound on open connections; enforced as the pool's `max_size`.
    pub max_connections: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            options: BTreeMap::new(),
            max_connections: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionDriver
// ---------------------------------------------------------------------------

/// Opens, pings, and closes connections for one database flavor.
///
/// The pool never looks inside `Connection`; drivers own the transport.
#[async_trait]
pub trait ConnectionDriver: Send + Sync + 'static {
    /// The raw connection type. `Sync` because validation pings hold a
    /// shared reference across an await point.
    type Connection: Send + Sync + 'static;

    /// Open a connection to `host:port/database`.
    ///
    /// # Errors
    /// Any error here counts as a creation failure and is retried per
    /// the pool's retry configuration.
    async fn connect(&self, config: &DbConfig) -> Result<Self::Connection>;

    /// Lightweight liveness probe.
    async fn ping(&self, connection: &Self::Connection) -> bool;

    /// Close the connection. Best-effort.
    async fn close(&self, connection: Self::Connection);
}

// ---------------------------------------------------------------------------
// DbConnection
// ---------------------------------------------------------------------------

/// A pooled connection with instrumentation counters.
#[derive(Debug)]
pub struct DbConnection<C> {
    raw: C,
    id: Uuid,
    created_at: Instant,
    last_used_at: Instant,
    query_count: u64,
    healthy: AtomicBool,
}

impl<C> DbConnection<C> {
    fn new(raw: C) -> Self {
        let now = Instant::now();
        Self {
            raw,
            id: Uuid::new_v4(),
            created_at: now,
            last_used_at: now,
            query_count: 0,
            healthy: AtomicBool::new(true),
        }
    }

    /// Connection identity, stable for the connection's lifetime.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The raw driver connection.
    #[must_use]
    pub fn raw(&self) -> &C {
        &self.raw
    }

    /// The raw driver connection, mutably.
    pub fn raw_mut(&mut self) -> &mut C {
        self.last_used_at = Instant::now();
        &mut self.raw
    }

    /// Bump the per-connection query counter.
    pub fn record_query(&mut self) {
        self.query_count += 1;
        self.last_used_at = Instant::now();
    }

    /// Queries recorded against this connection.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    /// Age since the driver opened this connection.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Time since the last recorded use.
    #[must_use]
    pub fn idle_time(&self) -> std::time::Duration {
        self.last_used_at.elapsed()
    }

    /// Result of the most recent ping.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Factory and pool
// ---------------------------------------------------------------------------

/// [`ResourceFactory`] over a [`ConnectionDriver`].
pub struct DbConnectionFactory<D> {
    driver: D,
    config: DbConfig,
}

impl<D: ConnectionDriver> DbConnectionFactory<D> {
    /// Create a factory for the given driver and connection parameters.
    pub fn new(driver: D, config: DbConfig) -> Self {
        Self { driver, config }
    }
}

#[async_trait]
impl<D: ConnectionDriver> ResourceFactory for DbConnectionFactory<D> {
    type Resource = DbConnection<D::Connection>;

    fn name(&self) -> &str {
        &self.config.database
    }

    async fn create(&self) -> Result<Self::Resource> {
        let raw = self.driver.connect(&self.config).await?;
        let connection = DbConnection::new(raw);
        debug!(
            database = %self.config.database,
            connection = %connection.id,
            "opened database connection"
        );
        Ok(connection)
    }

    async fn destroy(&self, resource: Self::Resource) {
        debug!(
            database = %self.config.database,
            connection = %resource.id,
            queries = resource.query_count,
            "closing database connection"
        );
        self.driver.close(resource.raw).await;
    }

    async fn validate(&self, resource: &Self::Resource) -> bool {
        let alive = self.driver.ping(&resource.raw).await;
        resource.healthy.store(alive, Ordering::Relaxed);
        alive
    }

    async fn reset(&self, resource: &mut Self::Resource) -> Result<()> {
        resource.last_used_at = Instant::now();
        Ok(())
    }
}

/// Connection pool for one database.
pub struct DatabaseConnectionPool<D: ConnectionDriver> {
    pool: Pool<DbConnectionFactory<D>>,
}

impl<D: ConnectionDriver> DatabaseConnectionPool<D> {
    /// Create a connection pool.
    ///
    /// `db_config.max_connections` overrides `pool_config.max_size`.
    ///
    /// # Errors
    /// Returns a configuration error when the merged config is invalid.
    pub fn new(db_config: DbConfig, mut pool_config: PoolConfig, driver: D) -> Result<Self> {
        pool_config.max_size = db_config.max_connections;
        let factory = DbConnectionFactory::new(driver, db_config);
        Ok(Self {
            pool: Pool::new(pool_config, factory)?,
        })
    }

    /// Acquire a connection.
    ///
    /// # Errors
    /// See [`Pool::acquire`].
    pub async fn acquire(&self) -> Result<PoolGuard<DbConnectionFactory<D>>> {
        self.pool.acquire().await
    }

    /// Pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Orderly shutdown; see [`Pool::drain`].
    ///
    /// # Errors
    /// See [`Pool::drain`].
    pub async fn drain(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.pool.drain(timeout).await
    }

    /// Forceful teardown; see [`Pool::cleanup`].
    pub async fn cleanup(&self) {
        self.pool.cleanup().await;
    }
}
