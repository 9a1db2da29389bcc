//! Pool lifecycle: warm start, concurrent acquisition, drain.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tidepool::error::Result;
use tidepool::{Pool, PoolConfig, ResourceFactory};
use tokio::task::JoinSet;

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

fn config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_size: min,
        max_size: max,
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::named("lifecycle")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn warm_start_reaches_min_size() {
    let pool = Pool::new(config(2, 10), SeqFactory::new()).unwrap();

    // The warm start runs asynchronously; poll until it lands.
    let mut reached = false;
    for _ in 0..100 {
        if pool.stats().total_resources >= 2 {
            reached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reached, "warm start never created min_size resources");
    let stats = pool.stats();
    assert_eq!(stats.available_resources, 2);
    assert_eq!(stats.in_use_resources, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn twelve_concurrent_acquires_on_ten_slots_all_succeed() {
    let cfg = PoolConfig {
        max_queue_size: 20,
        acquire_timeout: Duration::from_secs(5),
        ..config(0, 10)
    };
    let pool = Pool::new(cfg, SeqFactory::new()).unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let pool = pool.clone();
        tasks.spawn(async move {
            let guard = pool.acquire().await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            guard.release().await;
            Ok::<_, tidepool::Error>(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.created_resources <= 10);
    assert_eq!(stats.in_use_resources, 0);
    assert_eq!(stats.queued_waiters, 0);
    assert_eq!(
        stats.available_resources + stats.in_use_resources,
        stats.total_resources
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_waits_for_in_use_resources() {
    let pool = Pool::new(config(0, 4), SeqFactory::new()).unwrap();
    let guard = pool.acquire().await.unwrap();

    let drainer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain(None).await })
    };

    // Give drain a moment to flip the lifecycle, then verify it is
    // actually blocked on our guard.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.lifecycle(), tidepool::Lifecycle::Draining);
    assert!(!drainer.is_finished());

    guard.release().await;
    drainer.await.unwrap().unwrap();

    assert_eq!(pool.lifecycle(), tidepool::Lifecycle::Drained);
    assert_eq!(pool.stats().total_resources, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_times_out_while_resources_held() {
    let pool = Pool::new(config(0, 4), SeqFactory::new()).unwrap();
    let _held = pool.acquire().await.unwrap();

    let err = pool.drain(Some(Duration::from_millis(50))).await.unwrap_err();
    assert!(matches!(err, tidepool::Error::DrainTimeout { .. }));
    // The pool stays draining; cleanup can still force teardown.
    assert_eq!(pool.lifecycle(), tidepool::Lifecycle::Draining);
    pool.cleanup().await;
    assert_eq!(pool.lifecycle(), tidepool::Lifecycle::Drained);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_is_idempotent_once_drained() {
    let pool = Pool::new(config(0, 2), SeqFactory::new()).unwrap();
    pool.drain(None).await.unwrap();
    pool.drain(None).await.unwrap();
    assert_eq!(pool.lifecycle(), tidepool::Lifecycle::Drained);
}
