//! End-to-end tests for WorkerPool
//!
//! Run with: cargo test -p arbiter-pool --test pool_integration_test
//!
//! All tests run on tokio's paused clock, so simulated work and heartbeat
//! timeouts complete instantly and deterministically.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use arbiter_pool::{
    ExecutionError, FnExecutor, PoolError, PoolMetrics, SimulatedExecutor, StaticSampler,
    TaskContext, TaskExecutor, TaskPriority, WorkerId, WorkerPool, WorkerPoolConfig,
};

fn config(min: usize, max: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new(
        min,
        max,
        Duration::from_secs(120),
        Duration::from_secs(1),
        0.9,
        0.9,
        2.0,
    )
}

fn pool(config: WorkerPoolConfig, executor: impl TaskExecutor + 'static) -> WorkerPool {
    pool_with_sampler(config, executor).0
}

/// Pool plus a handle to its sampler, for scripting worker silence
fn pool_with_sampler(
    config: WorkerPoolConfig,
    executor: impl TaskExecutor + 'static,
) -> (WorkerPool, Arc<StaticSampler>) {
    let sampler = Arc::new(StaticSampler::default());
    let pool = WorkerPool::new(config, Arc::new(executor), sampler.clone())
        .expect("valid pool configuration");
    (pool, sampler)
}

/// Executor that records payload strings in the order attempts start
fn recording_executor(work: Duration) -> (Arc<Mutex<Vec<String>>>, impl TaskExecutor + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let executor = FnExecutor::new(move |_ctx: TaskContext, payload: serde_json::Value| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(payload.as_str().unwrap_or_default().to_string());
            tokio::time::sleep(work).await;
            Ok::<_, ExecutionError>(json!(null))
        }
    });
    (seen, executor)
}

/// Poll metrics until `check` holds
async fn wait_for(
    pool: &WorkerPool,
    what: &str,
    check: impl Fn(&PoolMetrics) -> bool,
) -> PoolMetrics {
    let waited = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let metrics = pool.get_metrics();
            if check(&metrics) {
                return metrics;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    match waited {
        Ok(metrics) => metrics,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

fn submit(pool: &WorkerPool, priority: TaskPriority, label: &str, max_retries: u32) {
    pool.submit_task(priority, json!(label), Duration::from_secs(60), max_retries)
        .expect("pool is running");
}

// ============================================
// Ordering
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_priority_order_with_single_worker() {
    let (seen, executor) = recording_executor(Duration::from_millis(100));
    let pool = pool(config(1, 1), executor);
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::Low, "low-1", 0);
    submit(&pool, TaskPriority::Medium, "medium", 0);
    submit(&pool, TaskPriority::High, "high", 0);
    submit(&pool, TaskPriority::Critical, "critical", 0);
    submit(&pool, TaskPriority::Low, "low-2", 0);

    wait_for(&pool, "all tasks to complete", |m| m.totals.completed == 5).await;
    assert_eq!(*seen.lock(), vec!["critical", "high", "medium", "low-1", "low-2"]);

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_critical_dispatched_before_low() {
    let (seen, executor) = recording_executor(Duration::from_millis(100));
    let pool = WorkerPool::new(
        WorkerPoolConfig::new(
            2,
            5,
            Duration::from_secs(30),
            Duration::from_secs(1),
            0.9,
            0.9,
            2.0,
        ),
        Arc::new(executor),
        Arc::new(StaticSampler::default()),
    )
    .unwrap();
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::Low, "low", 3);
    submit(&pool, TaskPriority::Critical, "critical", 3);

    wait_for(&pool, "both tasks to complete", |m| m.totals.completed == 2).await;
    assert_eq!(seen.lock().first().map(String::as_str), Some("critical"));

    pool.stop().await.unwrap();
}

// ============================================
// Failures and retries
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failing_task_attempted_max_retries_plus_one() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let executor = FnExecutor::new(move |_ctx: TaskContext, _payload: serde_json::Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<serde_json::Value, _>(ExecutionError::failed("always fails")) }
    });
    let pool = pool(config(1, 2), executor);
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::High, "doomed", 2);

    let metrics = wait_for(&pool, "the task to be dropped", |m| m.totals.dropped == 1).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(metrics.totals.failed_attempts, 3);
    assert_eq!(metrics.totals.retried, 2);
    assert_eq!(metrics.totals.completed, 0);
    assert_eq!(metrics.queued_tasks, 0);

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_attempt_timeout_counts_as_failure() {
    let pool = pool(config(1, 1), SimulatedExecutor::new(Duration::from_secs(10)));
    pool.start().await.unwrap();

    pool.submit_task(TaskPriority::Medium, json!(null), Duration::from_secs(1), 0)
        .unwrap();

    let metrics = wait_for(&pool, "the task to time out", |m| m.totals.dropped == 1).await;
    assert_eq!(metrics.totals.failed_attempts, 1);
    assert_eq!(metrics.totals.completed, 0);

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_executor_panic_is_contained() {
    let executor = FnExecutor::new(|_ctx: TaskContext, payload: serde_json::Value| async move {
        if payload == json!("explode") {
            panic!("executor blew up");
        }
        Ok::<_, ExecutionError>(json!("ok"))
    });
    let pool = pool(config(1, 1), executor);
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::High, "explode", 0);
    submit(&pool, TaskPriority::Low, "fine", 0);

    let metrics = wait_for(&pool, "both outcomes", |m| {
        m.totals.dropped == 1 && m.totals.completed == 1
    })
    .await;
    assert_eq!(metrics.worker_count, 1);
    assert!(pool.is_running());

    pool.stop().await.unwrap();
}

// ============================================
// Heartbeats
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_silent_busy_worker_is_replaced() {
    let (pool, sampler) =
        pool_with_sampler(config(1, 1), SimulatedExecutor::new(Duration::from_secs(60)));
    // the first worker and its replacement both stop answering samples
    sampler.silence(WorkerId::new(0));
    sampler.silence(WorkerId::new(1));
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::High, "hangs", 1);

    let metrics = wait_for(&pool, "the task to be dropped", |m| m.totals.dropped == 1).await;
    assert_eq!(metrics.totals.retried, 1);
    assert_eq!(metrics.totals.failed_attempts, 2);
    assert_eq!(metrics.worker_count, 1);
    assert!(!metrics.per_worker.contains_key(&WorkerId::new(0)));
    assert!(!metrics.per_worker.contains_key(&WorkerId::new(1)));

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_heartbeats_keep_long_task_alive() {
    let executor = FnExecutor::new(|ctx: TaskContext, _payload: serde_json::Value| async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ctx.heartbeat()?;
        }
        Ok::<_, ExecutionError>(json!({ "worker": ctx.worker_id.to_string() }))
    });
    let (pool, sampler) = pool_with_sampler(config(1, 1), executor);
    sampler.silence(WorkerId::new(0));
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::Medium, "long", 0);

    let metrics = wait_for(&pool, "the task to complete", |m| m.totals.completed == 1).await;
    assert_eq!(metrics.totals.retried, 0);
    assert!(metrics.per_worker.contains_key(&WorkerId::new(0)));

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_long_task_on_sampled_worker_completes() {
    let pool = pool(config(1, 1), SimulatedExecutor::new(Duration::from_secs(10)));
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::High, "slow but alive", 2);

    let metrics = wait_for(&pool, "the task to complete", |m| m.totals.completed == 1).await;
    assert_eq!(metrics.totals.failed_attempts, 0);
    assert_eq!(metrics.totals.retried, 0);
    assert_eq!(metrics.totals.dropped, 0);
    assert!(metrics.per_worker.contains_key(&WorkerId::new(0)));
    assert!(pool.check_health().healthy);

    pool.stop().await.unwrap();
}

// ============================================
// Scaling
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_worker_count_stays_within_bounds() {
    let pool = pool(config(2, 4), SimulatedExecutor::new(Duration::from_secs(5)));
    pool.start().await.unwrap();

    for i in 0..20 {
        submit(&pool, TaskPriority::Medium, &format!("task-{i}"), 0);
    }

    wait_for(&pool, "the backlog to drain", |m| {
        assert!((2..=4).contains(&m.worker_count), "worker count {}", m.worker_count);
        m.totals.completed == 20
    })
    .await;

    wait_for(&pool, "the pool to shrink", |m| {
        assert!((2..=4).contains(&m.worker_count));
        m.worker_count == 2
    })
    .await;

    assert_eq!(pool.get_metrics().totals.submitted, 20);

    pool.stop().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_backlog_scales_pool_up() {
    let pool = pool(config(2, 5), SimulatedExecutor::new(Duration::from_secs(30)));
    pool.start().await.unwrap();

    for i in 0..9 {
        submit(&pool, TaskPriority::Low, &format!("task-{i}"), 0);
    }

    let metrics = wait_for(&pool, "scale-up", |m| m.worker_count > 2).await;
    assert!(metrics.worker_count <= 5);

    pool.stop().await.unwrap();
}

// ============================================
// Lifecycle
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_start_and_stop_are_idempotent() {
    let pool = pool(config(2, 3), SimulatedExecutor::default());

    assert_ok!(pool.start().await);
    assert_ok!(pool.start().await);
    assert_eq!(pool.worker_count(), 2);
    assert!(pool.check_health().healthy);

    assert_ok!(pool.stop().await);
    assert_ok!(pool.stop().await);
    assert_eq!(pool.worker_count(), 0);
    assert!(!pool.is_running());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_submit_after_stop_is_rejected() {
    let pool = pool(config(1, 1), SimulatedExecutor::default());
    pool.start().await.unwrap();
    pool.stop().await.unwrap();

    let err = assert_err!(pool.submit_task(
        TaskPriority::Critical,
        json!(null),
        Duration::from_secs(1),
        0
    ));
    assert_eq!(err, PoolError::NotRunning);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_returns_in_flight_task_to_queue() {
    let pool = pool(config(1, 1), SimulatedExecutor::new(Duration::from_secs(60)));
    pool.start().await.unwrap();

    submit(&pool, TaskPriority::High, "interrupted", 3);
    wait_for(&pool, "the task to be picked up", |m| {
        m.queued_tasks == 0 && m.idle_workers == 0
    })
    .await;

    pool.stop().await.unwrap();

    assert_eq!(pool.queue_len(), 1);
    let metrics = pool.get_metrics();
    assert_eq!(metrics.totals.retried, 1);
    assert_eq!(metrics.worker_count, 0);
    assert_eq!(metrics.distribution.task_history_size, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_metrics_serialize_to_json() -> anyhow::Result<()> {
    let pool = pool(config(2, 3), SimulatedExecutor::default());
    pool.start().await?;
    pool.submit_task(TaskPriority::Low, json!("one"), Duration::from_secs(60), 0)?;

    wait_for(&pool, "completion", |m| m.totals.completed == 1).await;
    // let the monitor loop score the workers
    tokio::time::sleep(Duration::from_secs(2)).await;

    let value = serde_json::to_value(pool.get_metrics())?;
    assert_eq!(value["worker_count"], 2);
    assert!(value["per_worker"]["worker-0"]["status"].is_string());
    assert!(value["distribution"]["worker_loads"]["worker-0"].is_number());
    assert!(value["distribution"]["current_strategy"].is_string());
    assert_eq!(value["totals"]["completed"], 1);

    pool.stop().await?;
    Ok(())
}
