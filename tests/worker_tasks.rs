//! Worker pool: task execution, concurrency, shutdown.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tidepool::error::Result;
use tidepool::worker::TaskHandler;
use tidepool::{PoolConfig, WorkerConfig, WorkerPool};
use tokio::task::JoinSet;

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, payload: Value) -> Result<Value> {
        Ok(json!({ "processed": payload }))
    }
}

fn pool_config(max: usize) -> PoolConfig {
    PoolConfig {
        min_size: 0,
        max_size: max,
        health_check_interval: Duration::from_secs(3600),
        ..PoolConfig::named("workers")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn task_result_wraps_payload() {
    let pool = WorkerPool::new(WorkerConfig::default(), pool_config(2), EchoHandler).unwrap();
    let result = pool
        .execute_task(json!({"op": "resize", "width": 640}), None)
        .await
        .unwrap();
    assert_eq!(result, json!({"processed": {"op": "resize", "width": 640}}));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_tasks_share_a_bounded_worker_set() {
    let pool = std::sync::Arc::new(
        WorkerPool::new(WorkerConfig::default(), pool_config(4), EchoHandler).unwrap(),
    );

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let pool = std::sync::Arc::clone(&pool);
        tasks.spawn(async move { pool.execute_task(json!({"seq": i}), None).await });
    }
    let mut completed = 0;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap().unwrap();
        assert!(result.get("processed").is_some());
        completed += 1;
    }
    assert_eq!(completed, 16);

    let stats = pool.stats();
    assert!(stats.created_resources <= 4);
    assert_eq!(stats.in_use_resources, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_errors_pass_through_verbatim() {
    struct Failing;

    #[async_trait]
    impl TaskHandler for Failing {
        async fn handle(&self, _payload: Value) -> Result<Value> {
            Err(tidepool::Error::configuration("unsupported operation"))
        }
    }

    let pool = WorkerPool::new(WorkerConfig::default(), pool_config(1), Failing).unwrap();
    let err = pool.execute_task(json!({}), None).await.unwrap_err();
    assert!(matches!(err, tidepool::Error::Configuration { .. }));
    // A handler error is not a crash: the worker survives.
    assert_eq!(pool.stats().destroyed_resources, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_shuts_workers_down() {
    let pool = WorkerPool::new(WorkerConfig::default(), pool_config(2), EchoHandler).unwrap();
    pool.execute_task(json!(1), None).await.unwrap();

    pool.drain(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(pool.stats().total_resources, 0);

    let err = pool.execute_task(json!(2), None).await.unwrap_err();
    assert!(matches!(err, tidepool::Error::Draining { .. }));
}
