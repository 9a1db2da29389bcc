//! RAII guard for checked-out resources.

use std::sync::Arc;

use crate::factory::ResourceFactory;
use crate::pool::{Entry, PoolInner};

/// A resource checked out of a [`Pool`](crate::pool::Pool).
///
/// Dereferences to the resource. Dropping the guard returns the resource
/// to the pool on a spawned task (release never blocks the dropping
/// caller); [`PoolGuard::release`] does the same but lets the caller
/// await completion, which tests and drain paths rely on for
/// deterministic accounting.
pub struct PoolGuard<F: ResourceFactory> {
    entry: Option<Entry<F::Resource>>,
    inner: Arc<PoolInner<F>>,
    poisoned: bool,
}

impl<F: ResourceFactory> PoolGuard<F> {
    pub(crate) fn new(entry: Entry<F::Resource>, inner: Arc<PoolInner<F>>) -> Self {
        Self {
            entry: Some(entry),
            inner,
            poisoned: false,
        }
    }

    /// Mark the resource as unusable. On release it is destroyed and
    /// replaced instead of re-entering the idle set.
    pub fn invalidate(&mut self) {
        self.poisoned = true;
    }

    /// Return the resource to the pool and wait for the return to be
    /// fully accounted.
    pub async fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            self.inner.release_entry(entry, self.poisoned).await;
        }
    }

    /// Take the resource out of the pool entirely.
    ///
    /// The pool forgets the resource: totals drop and it will not be
    /// destroyed by the pool. The caller owns teardown from here on.
    #[must_use]
    pub fn detach(mut self) -> F::Resource {
        let entry = self.entry.take().expect("guard already consumed");
        self.inner.detach_entry();
        // The freed slot may be owed to a queued waiter.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.replenish_after_loss().await;
        });
        entry.resource
    }
}

impl<F: ResourceFactory> std::ops::Deref for PoolGuard<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        &self.entry.as_ref().expect("guard already consumed").resource
    }
}

impl<F: ResourceFactory> std::ops::DerefMut for PoolGuard<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry.as_mut().expect("guard already consumed").resource
    }
}

impl<F: ResourceFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            let inner = Arc::clone(&self.inner);
            let poisoned = self.poisoned;
            tokio::spawn(async move {
                inner.release_entry(entry, poisoned).await;
            });
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for PoolGuard<F>
where
    F::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("resource", &self.entry.as_ref().map(|e| &e.resource))
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
