//! The resource factory trait.
//!
//! A [`ResourceFactory`] tells the pool how to create, destroy, validate
//! and reset one kind of resource. The pool owns all lifecycle decisions;
//! the factory only supplies the mechanics.

use async_trait::async_trait;

use crate::error::Result;

/// Lifecycle strategy for one resource type.
///
/// Implemented per resource kind (database connection, file handle,
/// worker) and handed to [`Pool::new`](crate::pool::Pool::new).
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The resource type managed by this factory.
    type Resource: Send + 'static;

    /// Short identifier used in log output (e.g. "postgres", "worker").
    fn name(&self) -> &str;

    /// Create a new resource.
    ///
    /// # Errors
    /// Returns [`Error::ResourceCreation`](crate::error::Error::ResourceCreation)
    /// (or any other error) if the underlying allocation fails; the pool
    /// retries per its `max_retries`/`retry_delay` configuration.
    async fn create(&self) -> Result<Self::Resource>;

    /// Destroy a resource. Best-effort: failures are logged by the pool
    /// and never block teardown.
    async fn destroy(&self, resource: Self::Resource);

    /// Cheap liveness check. Returning `false` triggers silent
    /// replacement; it is never surfaced to callers.
    async fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }

    /// Erase per-use state before the resource re-enters the idle set.
    ///
    /// # Errors
    /// Returning an error tells the pool the resource cannot be reused;
    /// it is destroyed and, if needed, lazily replaced.
    async fn reset(&self, _resource: &mut Self::Resource) -> Result<()> {
        Ok(())
    }
}
