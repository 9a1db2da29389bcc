//! # Tidepool
//!
//! Generic async resource pooling. A [`Pool`] manages a bounded set of
//! resources created through a [`ResourceFactory`]: acquisitions reuse
//! idle resources, create new ones up to `max_size`, and queue FIFO with
//! a timeout beyond that. A background loop validates idle resources,
//! evicts stale ones, and replenishes toward `min_size`.
//!
//! Three specializations build on the engine: database connections
//! ([`db::DatabaseConnectionPool`]), file handles ([`fs::FileHandlePool`]
//! with path security and policy checks), and task-serving workers
//! ([`worker::WorkerPool`] with crash detection and bounded respawns).

pub mod config;
pub mod db;
pub mod error;
pub mod factory;
pub mod fs;
pub mod guard;
pub mod pool;
pub mod stats;
pub mod worker;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use factory::ResourceFactory;
pub use guard::PoolGuard;
pub use pool::{Lifecycle, Pool};
pub use stats::{LatencySummary, PoolStats};

pub use db::{ConnectionDriver, DatabaseConnectionPool, DbConfig, DbConnection};
pub use fs::{FileHandle, FileHandlePool, FilePoolConfig, OpenMode};
pub use worker::{TaskHandler, Worker, WorkerConfig, WorkerPool, WorkerUsage};
