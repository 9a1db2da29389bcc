// Pool throughput benchmarks.
//
// Measures raw acquire/release overhead with a zero-cost resource
// (no I/O, instant create/validate/destroy).

use std::hint::black_box;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use tidepool::error::Result;
use tidepool::{Pool, PoolConfig, ResourceFactory};

// -- Minimal no-op factory for benchmarking pool overhead only --

struct NoOpFactory;

#[async_trait]
impl ResourceFactory for NoOpFactory {
    type Resource = u64;

    fn name(&self) -> &str {
        "bench-noop"
    }

    async fn create(&self) -> Result<u64> {
        Ok(0)
    }

    async fn destroy(&self, _resource: u64) {}
}

fn pool_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        min_size: 0,
        max_size,
        acquire_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(3600),
        health_check_interval: Duration::from_secs(3600),
        enable_metrics: false,
        ..PoolConfig::named("bench")
    }
}

fn single_thread_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    // Pool::new spawns its background loop, so it needs the runtime.
    let pool = rt.block_on(async { Pool::new(pool_config(16), NoOpFactory) })
        .expect("failed to create pool");

    c.bench_function("acquire_release_single_thread", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let guard = pool.acquire().await.unwrap();
                guard.release().await;
                black_box(())
            }
        });
    });
}

fn multi_thread_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let pool = rt.block_on(async { Pool::new(pool_config(16), NoOpFactory) })
        .expect("failed to create pool");

    c.bench_function("acquire_release_multi_thread", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let guard = pool.acquire().await.unwrap();
                guard.release().await;
                tokio::task::yield_now().await;
                black_box(())
            }
        });
    });
}

fn concurrent_contention(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime");

    // Small pool to create contention.
    let pool = rt.block_on(async { Pool::new(pool_config(4), NoOpFactory) })
        .expect("failed to create pool");

    c.bench_function("contended_acquire_release_4slots", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let guard = pool.acquire().await.unwrap();
                guard.release().await;
                tokio::task::yield_now().await;
                black_box(())
            }
        });
    });
}

criterion_group!(
    benches,
    single_thread_throughput,
    multi_thread_throughput,
    concurrent_contention,
);
criterion_main!(benches);
