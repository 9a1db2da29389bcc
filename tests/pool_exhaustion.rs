//! Exhaustion, queueing, and timeout behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tidepool::error::Result;
use tidepool::{Error, Pool, PoolConfig, ResourceFactory};

struct SeqFactory {
    created: AtomicU32,
}

impl SeqFactory {
    fn new() -> Self {
        Self {
            created: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ResourceFactory for SeqFactory {
    type Resource = u32;

    fn name(&self) -> &str {
        "seq"
    }

    async fn create(&self) -> Result<u32> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: u32) {}
}

fn config(max: usize) -> PoolConfig {
    PoolConfig {
        min_size: 0,
        max_size: max,
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::named("exhaustion")
    }
}

#[tokio::test(start_paused = true)]
async fn queued_acquire_times_out_after_configured_duration() {
    let cfg = PoolConfig {
        acquire_timeout: Duration::from_secs(1),
        ..config(1)
    };
    let pool = Pool::new(cfg, SeqFactory::new()).unwrap();
    let _held = pool.acquire().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(
        err,
        Error::AcquisitionTimeout {
            timeout_ms: 1000,
            ..
        }
    ));
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    // The timed-out waiter releases its queue slot.
    assert_eq!(pool.stats().queued_waiters, 0);
}

#[tokio::test]
async fn full_queue_fails_fast_with_exhausted() {
    let cfg = PoolConfig {
        max_queue_size: 0,
        ..config(1)
    };
    let pool = Pool::new(cfg, SeqFactory::new()).unwrap();
    let _held = pool.acquire().await.unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        Error::PoolExhausted {
            in_use,
            max_size,
            waiters,
            ..
        } => {
            assert_eq!(in_use, 1);
            assert_eq!(max_size, 1);
            assert_eq!(waiters, 0);
        }
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn released_resource_goes_to_oldest_waiter() {
    let cfg = PoolConfig {
        acquire_timeout: Duration::from_secs(5),
        ..config(1)
    };
    let pool = Pool::new(cfg, SeqFactory::new()).unwrap();
    let held = pool.acquire().await.unwrap();
    assert_eq!(*held, 0);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let guard = pool.acquire().await.unwrap();
            let value = *guard;
            guard.release().await;
            value
        })
    };
    // Let the waiter enqueue before releasing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.stats().queued_waiters, 1);

    held.release().await;
    // The waiter received the existing resource, not a new one.
    assert_eq!(waiter.await.unwrap(), 0);
    assert_eq!(pool.stats().created_resources, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn freed_capacity_serves_oldest_waiter_first() {
    let cfg = PoolConfig {
        acquire_timeout: Duration::from_secs(5),
        ..config(1)
    };
    let pool = Pool::new(cfg, SeqFactory::new()).unwrap();
    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    let held = pool.acquire().await.unwrap();
    let first = {
        let pool = pool.clone();
        let order = std::sync::Arc::clone(&order);
        tokio::spawn(async move {
            let guard = pool.acquire().await.unwrap();
            order.lock().unwrap().push("first");
            tokio::time::sleep(Duration::from_millis(20)).await;
            guard.release().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.stats().queued_waiters, 1);

    // Detaching frees the only slot without handing anything off. A
    // later acquire must not claim that capacity ahead of the queued
    // waiter.
    let _owned = held.detach();
    let second = {
        let pool = pool.clone();
        let order = std::sync::Arc::clone(&order);
        tokio::spawn(async move {
            let guard = pool.acquire().await.unwrap();
            order.lock().unwrap().push("second");
            guard.release().await;
        })
    };

    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn try_acquire_never_queues() {
    let pool = Pool::new(config(1), SeqFactory::new()).unwrap();
    let _held = pool.acquire().await.unwrap();

    let err = pool.try_acquire().await.unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    assert_eq!(pool.stats().queued_waiters, 0);
}
