//! Generic resource pool engine.
//!
//! [`Pool<F>`] owns a bounded set of resources created through a
//! [`ResourceFactory`], a FIFO queue of waiting acquisitions, and a
//! background health/resize loop. All shared state lives behind a single
//! `parking_lot::Mutex`; factory I/O (create, destroy, validate, reset)
//! always happens outside the lock, with entries parked in a validation
//! excursion so they can never be claimed twice.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::guard::PoolGuard;
use crate::stats::{PoolStats, RollingWindow};

// ---------------------------------------------------------------------------
// Entries and waiters
// ---------------------------------------------------------------------------

/// Lifecycle state of one pooled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Idle,
    InUse,
    Validating,
    Destroying,
}

/// A pool entry wrapping one resource instance.
///
/// Owned exclusively by the pool's idle set, a single in-flight caller
/// (through [`PoolGuard`]), or a pending destroy. Never shared.
pub(crate) struct Entry<T> {
    pub(crate) resource: T,
    pub(crate) id: Uuid,
    created_at: Instant,
    last_used_at: Instant,
    state: EntryState,
}

impl<T> Entry<T> {
    fn new(resource: T) -> Self {
        let now = Instant::now();
        Self {
            resource,
            id: Uuid::new_v4(),
            created_at: now,
            last_used_at: now,
            state: EntryState::Idle,
        }
    }

    fn idle_longer_than(&self, timeout: Duration) -> bool {
        self.last_used_at.elapsed() > timeout
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A queued acquisition waiting for a resource.
///
/// Lives only between a queued `acquire()` and its hand-off, timeout, or
/// cancellation. The sender carries either a ready entry or the error
/// that terminated the wait (drain/cleanup).
struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Result<Entry<T>>>,
    enqueued_at: Instant,
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

/// Pool lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Warm start in progress.
    Initializing,
    /// Accepting acquisitions.
    Active,
    /// Rejecting new acquisitions, waiting for in-use returns.
    Draining,
    /// All resources destroyed.
    Drained,
}

struct PoolState<T> {
    lifecycle: Lifecycle,
    idle: VecDeque<Entry<T>>,
    /// Resources checked out by callers.
    in_use: usize,
    /// Resources temporarily out of the idle set for validation/reset.
    validating: usize,
    /// Creations reserved but not yet completed; counted against `max_size`.
    pending_creates: usize,
    waiters: VecDeque<Waiter<T>>,
    next_waiter_id: u64,
    created_total: u64,
    destroyed_total: u64,
    acquisition_time: RollingWindow,
    creation_time: RollingWindow,
}

impl<T> PoolState<T> {
    /// Resources currently owned by the pool (idle, checked out, or in a
    /// validation excursion). Excludes reserved-but-unfinished creations.
    fn total(&self) -> usize {
        self.idle.len() + self.in_use + self.validating
    }

    fn capacity_left(&self, max_size: usize) -> usize {
        max_size.saturating_sub(self.total() + self.pending_creates)
    }

    fn is_shutting_down(&self) -> bool {
        self.lifecycle >= Lifecycle::Draining
    }
}

pub(crate) struct PoolInner<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Resource>>,
    /// Notified whenever counters move while draining.
    drain_notify: Notify,
    /// Cancels the health/resize loop and the warm start.
    cancel: CancellationToken,
}

/// What a single locked look at the pool decided for an `acquire` call.
enum Plan<T> {
    Claimed(Entry<T>),
    Create,
    /// Wait in the queue. The flag asks for a background creation into
    /// the queue's head: free capacity with waiters already queued must
    /// serve the oldest waiter, not the caller that happened to arrive
    /// as the capacity freed up.
    Queued(u64, oneshot::Receiver<Result<Entry<T>>>, bool),
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Generic async resource pool.
///
/// Cheap to clone; all clones share the same state. Construction spawns
/// an asynchronous warm start (up to `min_size` resources) and the
/// background health/resize loop; [`Pool::cleanup`] or dropping the last
/// clone stops the background task.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool.
    ///
    /// Validates `config`, then spawns the warm start (creating
    /// `min_size` resources without blocking the caller) and the
    /// health/resize loop.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the config is invalid.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;
        let pool = Self {
            inner: Arc::new(PoolInner {
                factory,
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Initializing,
                    idle: VecDeque::with_capacity(config.max_size),
                    in_use: 0,
                    validating: 0,
                    pending_creates: 0,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                    created_total: 0,
                    destroyed_total: 0,
                    acquisition_time: RollingWindow::default(),
                    creation_time: RollingWindow::default(),
                }),
                drain_notify: Notify::new(),
                cancel: CancellationToken::new(),
                config,
            }),
        };
        pool.spawn_warm_start();
        pool.spawn_health_loop();
        Ok(pool)
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lock-consistent statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total_resources: state.total(),
            available_resources: state.idle.len() + state.validating,
            in_use_resources: state.in_use,
            queued_waiters: state.waiters.len(),
            created_resources: state.created_total,
            destroyed_resources: state.destroyed_total,
            acquisition_time: state.acquisition_time.summary(),
            creation_time: state.creation_time.summary(),
            utilization_rate: state.in_use as f64 / self.inner.config.max_size as f64,
        }
    }

    /// Current pool lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    // -----------------------------------------------------------------------
    // acquire
    // -----------------------------------------------------------------------

    /// Acquire a resource, suspending if the pool is at capacity.
    ///
    /// Hands out an idle resource when one is available, creates a new
    /// one below `max_size`, and otherwise queues FIFO behind earlier
    /// callers for up to `acquire_timeout`.
    ///
    /// # Errors
    /// - [`Error::Draining`] once [`Pool::drain`] has started.
    /// - [`Error::PoolExhausted`] when the wait queue is full.
    /// - [`Error::AcquisitionTimeout`] when the queued wait expires.
    /// - [`Error::ResourceCreation`] when the factory fails repeatedly.
    pub async fn acquire(&self) -> Result<PoolGuard<F>> {
        let started = Instant::now();
        let entry = self.acquire_entry().await?;
        if self.inner.config.enable_metrics {
            self.inner
                .state
                .lock()
                .acquisition_time
                .record(started.elapsed());
        }
        Ok(PoolGuard::new(entry, Arc::clone(&self.inner)))
    }

    /// Acquire without queueing.
    ///
    /// Still creates a resource when below `max_size` (which may suspend
    /// on factory I/O), but never waits behind other callers.
    ///
    /// # Errors
    /// Fails with [`Error::PoolExhausted`] immediately when no idle
    /// resource exists and the pool is at `max_size`.
    pub async fn try_acquire(&self) -> Result<PoolGuard<F>> {
        let inner = &self.inner;
        loop {
            // None = a creation slot was reserved instead of an idle claim.
            let claimed = {
                let mut state = inner.state.lock();
                if state.is_shutting_down() {
                    return Err(Error::Draining {
                        pool: inner.config.name.clone(),
                    });
                }
                match state.idle.pop_front() {
                    Some(mut entry) => {
                        entry.state = EntryState::InUse;
                        state.in_use += 1;
                        Some(entry)
                    }
                    None if state.capacity_left(inner.config.max_size) > 0 => {
                        state.pending_creates += 1;
                        None
                    }
                    None => {
                        return Err(Error::PoolExhausted {
                            pool: inner.config.name.clone(),
                            in_use: state.in_use,
                            max_size: inner.config.max_size,
                            waiters: state.waiters.len(),
                        });
                    }
                }
            };
            match claimed {
                Some(entry) => match inner.admit(entry).await {
                    Some(entry) => return Ok(PoolGuard::new(entry, Arc::clone(inner))),
                    None => continue,
                },
                None => {
                    let entry = inner.finish_create_in_use().await?;
                    return Ok(PoolGuard::new(entry, Arc::clone(inner)));
                }
            }
        }
    }

    async fn acquire_entry(&self) -> Result<Entry<F::Resource>> {
        let inner = &self.inner;
        let (waiter_id, mut rx) = loop {
            let plan = {
                let mut state = inner.state.lock();
                if state.is_shutting_down() {
                    return Err(Error::Draining {
                        pool: inner.config.name.clone(),
                    });
                }
                if let Some(mut entry) = state.idle.pop_front() {
                    entry.state = EntryState::InUse;
                    state.in_use += 1;
                    Plan::Claimed(entry)
                } else if state.waiters.is_empty()
                    && state.capacity_left(inner.config.max_size) > 0
                {
                    state.pending_creates += 1;
                    Plan::Create
                } else if state.waiters.len() >= inner.config.max_queue_size {
                    return Err(Error::PoolExhausted {
                        pool: inner.config.name.clone(),
                        in_use: state.in_use,
                        max_size: inner.config.max_size,
                        waiters: state.waiters.len(),
                    });
                } else {
                    let (tx, rx) = oneshot::channel();
                    let id = state.next_waiter_id;
                    state.next_waiter_id += 1;
                    state.waiters.push_back(Waiter {
                        id,
                        tx,
                        enqueued_at: Instant::now(),
                    });
                    let refill = state.capacity_left(inner.config.max_size) > 0;
                    Plan::Queued(id, rx, refill)
                }
            };

            match plan {
                Plan::Claimed(entry) => match inner.admit(entry).await {
                    Some(entry) => return Ok(entry),
                    // Validation evicted the candidate; search again.
                    None => continue,
                },
                Plan::Create => return inner.finish_create_in_use().await,
                Plan::Queued(id, rx, refill) => {
                    if refill {
                        let inner = Arc::clone(inner);
                        tokio::spawn(async move {
                            let _ = inner.create_into_idle().await;
                        });
                    }
                    break (id, rx);
                }
            }
        };

        // Queued: wait for a hand-off or the acquisition timer.
        match tokio::time::timeout(inner.config.acquire_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a message: only cleanup does that.
            Ok(Err(_)) => Err(Error::Cancelled {
                pool: inner.config.name.clone(),
            }),
            Err(_) => {
                // Timer fired. Removing our waiter under the lock decides
                // the race against a concurrent hand-off: hand-offs also
                // remove the waiter under the lock, so exactly one side
                // wins.
                let removed = {
                    let mut state = inner.state.lock();
                    let before = state.waiters.len();
                    state.waiters.retain(|w| w.id != waiter_id);
                    before != state.waiters.len()
                };
                if removed {
                    return Err(Error::AcquisitionTimeout {
                        pool: inner.config.name.clone(),
                        timeout_ms: inner.config.acquire_timeout.as_millis() as u64,
                    });
                }
                // The hand-off won: the message (entry or terminal error)
                // is already in the channel.
                match (&mut rx).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Cancelled {
                        pool: inner.config.name.clone(),
                    }),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // drain / cleanup
    // -----------------------------------------------------------------------

    /// Orderly shutdown.
    ///
    /// Rejects new acquisitions, fails queued waiters with
    /// [`Error::Draining`], destroys idle resources, and waits for every
    /// in-use resource to be released (each is destroyed on return).
    /// Completes once `total_resources == 0`.
    ///
    /// # Errors
    /// [`Error::DrainTimeout`] if `timeout` expires while resources are
    /// still checked out; the pool stays in `Draining` and a follow-up
    /// [`Pool::cleanup`] can force teardown.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<()> {
        let inner = &self.inner;
        let (idle, waiters) = {
            let mut state = inner.state.lock();
            if state.lifecycle == Lifecycle::Drained {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Draining;
            state.destroyed_total += state.idle.len() as u64;
            let idle: Vec<_> = state.idle.drain(..).collect();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };
        debug!(
            pool = %inner.config.name,
            idle = idle.len(),
            waiters = waiters.len(),
            "draining pool"
        );
        for waiter in waiters {
            let _ = waiter.tx.send(Err(Error::Draining {
                pool: inner.config.name.clone(),
            }));
        }
        join_all(idle.into_iter().map(|mut entry| {
            entry.state = EntryState::Destroying;
            inner.factory.destroy(entry.resource)
        }))
        .await;

        let wait = async {
            loop {
                let notified = inner.drain_notify.notified();
                {
                    let mut state = inner.state.lock();
                    if state.total() == 0 && state.pending_creates == 0 {
                        state.lifecycle = Lifecycle::Drained;
                        return;
                    }
                }
                notified.await;
            }
        };
        match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| Error::DrainTimeout {
                        pool: inner.config.name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    })?;
            }
            None => wait.await,
        }
        inner.cancel.cancel();
        debug!(pool = %inner.config.name, "drain complete");
        Ok(())
    }

    /// Forceful teardown.
    ///
    /// Cancels the background loop, fails queued waiters with
    /// [`Error::Cancelled`], and destroys every idle resource
    /// immediately. Resources still checked out are destroyed as their
    /// guards drop.
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        let (idle, waiters) = {
            let mut state = inner.state.lock();
            state.lifecycle = Lifecycle::Drained;
            state.destroyed_total += state.idle.len() as u64;
            let idle: Vec<_> = state.idle.drain(..).collect();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };
        debug!(
            pool = %inner.config.name,
            destroyed = idle.len(),
            cancelled = waiters.len(),
            "pool cleanup"
        );
        for waiter in waiters {
            let _ = waiter.tx.send(Err(Error::Cancelled {
                pool: inner.config.name.clone(),
            }));
        }
        join_all(idle.into_iter().map(|mut entry| {
            entry.state = EntryState::Destroying;
            inner.factory.destroy(entry.resource)
        }))
        .await;
        inner.drain_notify.notify_waiters();
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn spawn_warm_start(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for _ in 0..inner.config.min_size {
                if inner.cancel.is_cancelled() {
                    return;
                }
                if !inner.create_into_idle().await {
                    break;
                }
            }
            let mut state = inner.state.lock();
            if state.lifecycle == Lifecycle::Initializing {
                state.lifecycle = Lifecycle::Active;
            }
        });
    }

    fn spawn_health_loop(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(inner.config.health_check_interval) => {}
                    () = inner.cancel.cancelled() => break,
                }
                inner.health_pass().await;
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Inner operations (shared with PoolGuard)
// ---------------------------------------------------------------------------

impl<F: ResourceFactory> PoolInner<F> {
    /// Validate a just-claimed idle entry when configured. Returns the
    /// entry, or `None` after destroying an invalid one (caller retries).
    async fn admit(&self, mut entry: Entry<F::Resource>) -> Option<Entry<F::Resource>> {
        debug_assert_eq!(entry.state, EntryState::InUse);
        if !self.config.validate_on_acquire {
            return Some(entry);
        }
        if self.factory.validate(&entry.resource).await {
            return Some(entry);
        }
        debug!(
            pool = %self.config.name,
            entry = %entry.id,
            "resource failed acquire-time validation, replacing"
        );
        entry.state = EntryState::Destroying;
        {
            let mut state = self.state.lock();
            state.in_use -= 1;
            state.destroyed_total += 1;
        }
        self.factory.destroy(entry.resource).await;
        self.drain_notify.notify_waiters();
        None
    }

    /// Complete a reserved creation and hand the entry to the reserving
    /// caller as in-use. The reservation (`pending_creates`) was taken
    /// under the state lock.
    async fn finish_create_in_use(&self) -> Result<Entry<F::Resource>> {
        match self.create_with_retries().await {
            Ok(resource) => {
                let mut entry = Entry::new(resource);
                entry.state = EntryState::InUse;
                let shutting_down = {
                    let mut state = self.state.lock();
                    state.pending_creates -= 1;
                    if state.is_shutting_down() {
                        state.destroyed_total += 1;
                        true
                    } else {
                        state.created_total += 1;
                        state.in_use += 1;
                        false
                    }
                };
                if shutting_down {
                    entry.state = EntryState::Destroying;
                    self.factory.destroy(entry.resource).await;
                    self.drain_notify.notify_waiters();
                    return Err(Error::Draining {
                        pool: self.config.name.clone(),
                    });
                }
                Ok(entry)
            }
            Err(err) => {
                self.state.lock().pending_creates -= 1;
                self.drain_notify.notify_waiters();
                Err(err)
            }
        }
    }

    /// Create one resource with linear-backoff retries.
    async fn create_with_retries(&self) -> Result<F::Resource> {
        let started = Instant::now();
        let mut last_reason = String::new();
        for attempt in 1..=self.config.max_retries {
            match self.factory.create().await {
                Ok(resource) => {
                    if self.config.enable_metrics {
                        self.state.lock().creation_time.record(started.elapsed());
                    }
                    return Ok(resource);
                }
                Err(err) => {
                    warn!(
                        pool = %self.config.name,
                        attempt,
                        error = %err,
                        "resource creation failed"
                    );
                    last_reason = err.to_string();
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay * attempt).await;
                    }
                }
            }
        }
        Err(Error::creation(
            &self.config.name,
            self.config.max_retries,
            last_reason,
        ))
    }

    /// Create one resource and route it to the oldest waiter or the idle
    /// set. Reserves capacity; returns false when the pool is full,
    /// shutting down, or creation gave up.
    async fn create_into_idle(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_shutting_down() || state.capacity_left(self.config.max_size) == 0 {
                return false;
            }
            state.pending_creates += 1;
        }
        match self.create_with_retries().await {
            Ok(resource) => {
                self.route_ready_entry(Entry::new(resource), true).await;
                true
            }
            Err(err) => {
                self.state.lock().pending_creates -= 1;
                warn!(pool = %self.config.name, error = %err, "background creation gave up");
                false
            }
        }
    }

    /// Place a ready entry with the oldest live waiter, or the idle set.
    /// `from_create` settles a `pending_creates` reservation.
    async fn route_ready_entry(&self, mut entry: Entry<F::Resource>, from_create: bool) {
        let leftover = {
            let mut state = self.state.lock();
            if from_create {
                state.pending_creates -= 1;
            }
            if state.is_shutting_down() {
                state.destroyed_total += 1;
                Some(entry)
            } else {
                if from_create {
                    state.created_total += 1;
                }
                entry.last_used_at = Instant::now();
                // Oldest waiter first; a waiter whose receiver is already
                // gone (timed out) returns the entry, try the next one.
                loop {
                    match state.waiters.pop_front() {
                        Some(waiter) => {
                            entry.state = EntryState::InUse;
                            match waiter.tx.send(Ok(entry)) {
                                Ok(()) => {
                                    state.in_use += 1;
                                    debug!(
                                        pool = %self.config.name,
                                        waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                                        "resource handed to queued waiter"
                                    );
                                    break None;
                                }
                                Err(rejected) => {
                                    // Only `Ok` payloads are sent here, so
                                    // the rejected value holds our entry.
                                    let Ok(returned) = rejected else {
                                        break None;
                                    };
                                    entry = returned;
                                }
                            }
                        }
                        None => {
                            entry.state = EntryState::Idle;
                            state.idle.push_back(entry);
                            break None;
                        }
                    }
                }
            }
        };
        if let Some(mut entry) = leftover {
            entry.state = EntryState::Destroying;
            self.factory.destroy(entry.resource).await;
            self.drain_notify.notify_waiters();
        }
    }

    /// Return a checked-out entry to the pool. Runs on the releasing
    /// task (explicit release) or a spawned task (guard drop); never
    /// blocks the caller that dropped the guard.
    pub(crate) async fn release_entry(&self, mut entry: Entry<F::Resource>, poisoned: bool) {
        debug_assert_eq!(entry.state, EntryState::InUse);
        // Move the entry from in-use to a validation excursion so stats
        // stay consistent while factory I/O runs unlocked.
        let draining = {
            let mut state = self.state.lock();
            state.in_use -= 1;
            if state.is_shutting_down() {
                state.destroyed_total += 1;
                true
            } else {
                state.validating += 1;
                false
            }
        };
        if draining {
            entry.state = EntryState::Destroying;
            self.factory.destroy(entry.resource).await;
            self.drain_notify.notify_waiters();
            return;
        }

        entry.state = EntryState::Validating;
        let healthy = !poisoned
            && (!self.config.validate_on_release || self.factory.validate(&entry.resource).await);
        let reusable = healthy && self.factory.reset(&mut entry.resource).await.is_ok();

        if reusable {
            self.state.lock().validating -= 1;
            self.route_ready_entry(entry, false).await;
            return;
        }

        debug!(
            pool = %self.config.name,
            entry = %entry.id,
            poisoned,
            "destroying resource on release"
        );
        entry.state = EntryState::Destroying;
        {
            let mut state = self.state.lock();
            state.validating -= 1;
            state.destroyed_total += 1;
        }
        self.factory.destroy(entry.resource).await;
        self.drain_notify.notify_waiters();
        self.replenish_after_loss().await;
    }

    /// Drop an entry from pool accounting without destroying it
    /// (guard `detach`).
    pub(crate) fn detach_entry(&self) {
        self.state.lock().in_use -= 1;
        self.drain_notify.notify_waiters();
    }

    /// After a resource was destroyed outside drain: lazily recreate if
    /// the pool fell below `min_size`, or callers are queued and
    /// capacity freed up.
    pub(crate) async fn replenish_after_loss(&self) {
        let should_create = {
            let state = self.state.lock();
            !state.is_shutting_down()
                && (state.total() + state.pending_creates < self.config.min_size
                    || (!state.waiters.is_empty()
                        && state.capacity_left(self.config.max_size) > 0))
        };
        if should_create {
            let _ = self.create_into_idle().await;
        }
    }

    // -----------------------------------------------------------------------
    // Health / resize pass
    // -----------------------------------------------------------------------

    /// One pass of the background loop: validate idle resources, evict
    /// stale ones down to `min_size`, replenish, and grow best-effort
    /// under high utilization.
    async fn health_pass(&self) {
        // Pull the whole idle set into a validation excursion. Entries
        // are invisible to acquire() while out, so a resource can never
        // be validated and handed out at the same time.
        let candidates = {
            let mut state = self.state.lock();
            if state.is_shutting_down() {
                return;
            }
            // Waiters whose acquire future was dropped will never take a
            // hand-off; sweep them so they stop occupying queue slots.
            state.waiters.retain(|w| !w.tx.is_closed());
            let taken: Vec<_> = state.idle.drain(..).collect();
            state.validating += taken.len();
            taken
        };

        let mut keep = Vec::with_capacity(candidates.len());
        let mut evict = Vec::new();
        for mut entry in candidates {
            entry.state = EntryState::Validating;
            if self.factory.validate(&entry.resource).await {
                keep.push(entry);
            } else {
                debug!(
                    pool = %self.config.name,
                    entry = %entry.id,
                    age_ms = entry.age().as_millis() as u64,
                    "health check failed, evicting resource"
                );
                evict.push(entry);
            }
        }

        // Idle-timeout eviction, most idle first, never below min_size.
        keep.sort_by_key(|entry| entry.last_used_at);
        let mut survivors = VecDeque::with_capacity(keep.len());
        let mut remaining = keep.len() + self.state.lock().in_use;
        for entry in keep {
            if remaining > self.config.min_size && entry.idle_longer_than(self.config.idle_timeout)
            {
                remaining -= 1;
                evict.push(entry);
            } else {
                survivors.push_back(entry);
            }
        }

        {
            let mut state = self.state.lock();
            state.validating -= survivors.len() + evict.len();
            state.destroyed_total += evict.len() as u64;
            for mut entry in survivors {
                entry.state = EntryState::Idle;
                state.idle.push_back(entry);
            }
        }
        join_all(evict.into_iter().map(|mut entry| {
            entry.state = EntryState::Destroying;
            self.factory.destroy(entry.resource)
        }))
        .await;

        // Replenish to min_size.
        loop {
            let below_min = {
                let state = self.state.lock();
                !state.is_shutting_down()
                    && state.total() + state.pending_creates < self.config.min_size
            };
            if !below_min || !self.create_into_idle().await {
                break;
            }
        }

        // Best-effort grow under high utilization. Deliberately a single
        // watermark sample and a small step, not a control loop.
        if self.config.auto_resize && self.config.enable_metrics {
            let grow = {
                let state = self.state.lock();
                let utilization = state.in_use as f64 / self.config.max_size as f64;
                if utilization > self.config.resize_threshold {
                    state.capacity_left(self.config.max_size).min(2)
                } else {
                    0
                }
            };
            if grow > 0 {
                debug!(pool = %self.config.name, grow, "utilization above threshold, growing");
            }
            for _ in 0..grow {
                if !self.create_into_idle().await {
                    break;
                }
            }
        }
    }
}

impl<F: ResourceFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
