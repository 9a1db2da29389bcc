//! Worker pooling.
//!
//! A worker is a spawned task that owns a [`TaskHandler`] and serves
//! commands over an mpsc channel: execute a task, answer a liveness
//! ping, or shut down. [`WorkerPool`] pools these workers, detects
//! crashes (the command channel closing), and transparently respawns a
//! bounded number of times before surfacing the failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::pool::Pool;
use crate::stats::PoolStats;

const COMMAND_BUFFER: usize = 16;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Worker-specific knobs layered on top of [`PoolConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How long a freshly spawned worker gets to signal readiness.
    pub handshake_timeout: Duration,
    /// How long a ping may take before the worker counts as unhealthy.
    pub ping_timeout: Duration,
    /// Task timeout used when `execute_task` is not given one.
    pub default_task_timeout: Duration,
    /// Crashed-worker respawns attempted per `execute_task` call.
    pub max_respawns: u32,
    /// Memory ceiling per worker; exceeding it fails validation.
    pub max_memory_bytes: Option<u64>,
    /// CPU ceiling per worker; exceeding it fails validation.
    pub max_cpu_percent: Option<f64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(1),
            default_task_timeout: Duration::from_secs(30),
            max_respawns: 2,
            max_memory_bytes: None,
            max_cpu_percent: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler and usage probing
// ---------------------------------------------------------------------------

/// The work a worker performs, one payload at a time.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Process one task payload.
    ///
    /// # Errors
    /// Handler errors are returned to the `execute_task` caller as-is.
    async fn handle(&self, payload: Value) -> Result<Value>;
}

/// Point-in-time resource usage of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerUsage {
    /// Resident memory attributed to the worker.
    pub memory_bytes: u64,
    /// CPU share attributed to the worker.
    pub cpu_percent: f64,
}

/// Samples a worker's resource usage for ping responses.
///
/// Tokio tasks share the process, so real accounting needs external
/// plumbing; the default probe reports zero usage, which keeps
/// usage-limit validation inert until a probe is supplied.
pub trait UsageProbe: Send + Sync + 'static {
    /// Sample current usage. Called on the worker's own task.
    fn sample(&self) -> WorkerUsage;
}

/// Probe reporting zero usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsageProbe;

impl UsageProbe for NoUsageProbe {
    fn sample(&self) -> WorkerUsage {
        WorkerUsage::default()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Command {
    Task {
        payload: Value,
        reply: oneshot::Sender<Result<Value>>,
    },
    Ping {
        reply: oneshot::Sender<WorkerUsage>,
    },
    Shutdown,
}

/// Handle to one spawned worker task.
#[derive(Debug)]
pub struct Worker {
    id: Uuid,
    tx: mpsc::Sender<Command>,
    join: JoinHandle<()>,
    tasks_completed: u64,
}

impl Worker {
    /// Worker identity, stable across its lifetime.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Tasks this worker completed successfully.
    #[must_use]
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// [`ResourceFactory`] spawning worker tasks around a shared handler.
pub struct WorkerFactory<H, P = NoUsageProbe> {
    handler: Arc<H>,
    probe: Arc<P>,
    config: WorkerConfig,
}

impl<H: TaskHandler, P: UsageProbe> WorkerFactory<H, P> {
    fn usage_within_limits(&self, usage: WorkerUsage) -> bool {
        let memory_ok = self
            .config
            .max_memory_bytes
            .is_none_or(|limit| usage.memory_bytes <= limit);
        let cpu_ok = self
            .config
            .max_cpu_percent
            .is_none_or(|limit| usage.cpu_percent <= limit);
        memory_ok && cpu_ok
    }
}

#[async_trait]
impl<H: TaskHandler, P: UsageProbe> ResourceFactory for WorkerFactory<H, P> {
    type Resource = Worker;

    fn name(&self) -> &str {
        "worker"
    }

    async fn create(&self) -> Result<Worker> {
        let id = Uuid::new_v4();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let handler = Arc::clone(&self.handler);
        let probe = Arc::clone(&self.probe);

        let join = tokio::spawn(async move {
            if ready_tx.send(()).is_err() {
                return;
            }
            while let Some(command) = cmd_rx.recv().await {
                match command {
                    Command::Task { payload, reply } => {
                        // A panicking handler kills the worker; the closed
                        // channel is how the pool observes the crash.
                        match AssertUnwindSafe(handler.handle(payload)).catch_unwind().await {
                            Ok(outcome) => {
                                let _ = reply.send(outcome);
                            }
                            Err(_) => {
                                warn!(worker = %id, "task handler panicked, worker exiting");
                                break;
                            }
                        }
                    }
                    Command::Ping { reply } => {
                        let _ = reply.send(probe.sample());
                    }
                    Command::Shutdown => break,
                }
            }
        });

        match tokio::time::timeout(self.config.handshake_timeout, ready_rx).await {
            Ok(Ok(())) => {
                debug!(worker = %id, "worker ready");
                Ok(Worker {
                    id,
                    tx: cmd_tx,
                    join,
                    tasks_completed: 0,
                })
            }
            Ok(Err(_)) | Err(_) => {
                join.abort();
                Err(Error::WorkerCrash {
                    reason: "ready handshake failed".to_string(),
                    respawns: 0,
                })
            }
        }
    }

    async fn destroy(&self, resource: Worker) {
        let Worker { id, tx, mut join, .. } = resource;
        // Graceful shutdown first; abort if the worker does not exit.
        let _ = tx.send(Command::Shutdown).await;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut join).await.is_err() {
            warn!(worker = %id, "worker ignored shutdown, aborting");
            join.abort();
        }
    }

    async fn validate(&self, resource: &Worker) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let ping = Command::Ping { reply: reply_tx };
        if resource.tx.send(ping).await.is_err() {
            return false;
        }
        match tokio::time::timeout(self.config.ping_timeout, reply_rx).await {
            Ok(Ok(usage)) => self.usage_within_limits(usage),
            Ok(Err(_)) | Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Pool of task-serving workers.
pub struct WorkerPool<H: TaskHandler, P: UsageProbe = NoUsageProbe> {
    pool: Pool<WorkerFactory<H, P>>,
    worker_config: WorkerConfig,
}

impl<H: TaskHandler> WorkerPool<H, NoUsageProbe> {
    /// Create a worker pool with the default (inert) usage probe.
    ///
    /// # Errors
    /// Returns a configuration error when `pool_config` is invalid.
    pub fn new(worker_config: WorkerConfig, pool_config: PoolConfig, handler: H) -> Result<Self> {
        Self::with_probe(worker_config, pool_config, handler, NoUsageProbe)
    }
}

impl<H: TaskHandler, P: UsageProbe> WorkerPool<H, P> {
    /// Create a worker pool with a custom usage probe.
    ///
    /// # Errors
    /// Returns a configuration error when `pool_config` is invalid.
    pub fn with_probe(
        worker_config: WorkerConfig,
        pool_config: PoolConfig,
        handler: H,
        probe: P,
    ) -> Result<Self> {
        let factory = WorkerFactory {
            handler: Arc::new(handler),
            probe: Arc::new(probe),
            config: worker_config.clone(),
        };
        Ok(Self {
            pool: Pool::new(pool_config, factory)?,
            worker_config,
        })
    }

    /// Run one task on a pooled worker.
    ///
    /// Acquires a worker, sends the payload, and waits up to `timeout`
    /// (default `default_task_timeout`) for the result. A crashed worker
    /// is discarded and the task retried on a fresh one, at most
    /// `max_respawns` times. A timed-out worker is discarded without
    /// retry, since the task may still be running on it.
    ///
    /// # Errors
    /// - [`Error::WorkerTaskTimeout`] when the task outlives its limit.
    /// - [`Error::WorkerCrash`] when respawns are exhausted.
    /// - Handler errors, verbatim.
    /// - Everything [`Pool::acquire`] can return.
    pub async fn execute_task(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        let limit = timeout.unwrap_or(self.worker_config.default_task_timeout);
        let mut respawns = 0u32;
        loop {
            let mut guard = self.pool.acquire().await?;
            let (reply_tx, reply_rx) = oneshot::channel();
            let task = Command::Task {
                payload: payload.clone(),
                reply: reply_tx,
            };

            if guard.tx.send(task).await.is_err() {
                guard.invalidate();
                guard.release().await;
                if respawns >= self.worker_config.max_respawns {
                    return Err(Error::WorkerCrash {
                        reason: "command channel closed".to_string(),
                        respawns,
                    });
                }
                respawns += 1;
                continue;
            }

            match tokio::time::timeout(limit, reply_rx).await {
                Ok(Ok(outcome)) => {
                    if outcome.is_ok() {
                        guard.tasks_completed += 1;
                    }
                    guard.release().await;
                    return outcome;
                }
                Ok(Err(_)) => {
                    // Reply sender dropped: the worker died mid-task.
                    warn!(worker = %guard.id(), respawns, "worker crashed mid-task");
                    guard.invalidate();
                    guard.release().await;
                    if respawns >= self.worker_config.max_respawns {
                        return Err(Error::WorkerCrash {
                            reason: "worker exited during task".to_string(),
                            respawns,
                        });
                    }
                    respawns += 1;
                }
                Err(_) => {
                    // The worker may still be chewing on the task, so it
                    // cannot be reused.
                    guard.invalidate();
                    guard.release().await;
                    return Err(Error::WorkerTaskTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            }
        }
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
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<()> {
        self.pool.drain(timeout).await
    }

    /// Forceful teardown; see [`Pool::cleanup`].
    pub async fn cleanup(&self) {
        self.pool.cleanup().await;
    }
}
