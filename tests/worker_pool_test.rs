//! Integration tests for WorkerPool
//!
//! These tests validate end-to-end behavior including:
//! - Conservation: every accepted task yields exactly one result
//! - Admission and rate bounds
//! - Graceful and forced shutdown, including concurrent shutdown calls
//! - Failure, panic and deadline isolation
//! - Cancellation through a parent token

use async_trait::async_trait;
use bounded_worker_pool::config::PoolConfig;
use bounded_worker_pool::core::{
    Failure, FailureKind, PoolError, PoolState, ShutdownMode, Task, TaskHandler, TaskMeta,
    TaskResult, WorkerPool,
};
use bounded_worker_pool::core::CancelToken;
use bounded_worker_pool::infra::ResultStream;
use bounded_worker_pool::util::init_tracing;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Drain a result stream on its own thread until the pool closes it.
fn collect_in_background<R: Send + 'static>(
    stream: ResultStream<R>,
) -> JoinHandle<Vec<TaskResult<R>>> {
    thread::spawn(move || stream.collect())
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let give_up = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < give_up, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// TEST HANDLERS - Real implementations for testing
// ============================================================================

/// Handler that sleeps for a fixed time and echoes its payload
#[derive(Clone)]
struct SleepHandler {
    millis: u64,
}

#[async_trait]
impl TaskHandler<u64, u64> for SleepHandler {
    async fn handle(&self, payload: u64, _meta: TaskMeta) -> Result<u64, Failure> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(payload)
    }
}

/// Handler that tracks how many calls run at once
#[derive(Clone)]
struct CountingHandler {
    work: Duration,
    execution_count: Arc<AtomicU64>,
    concurrent_count: Arc<AtomicU64>,
    max_concurrent: Arc<AtomicU64>,
}

impl CountingHandler {
    fn new(work: Duration) -> Self {
        Self {
            work,
            execution_count: Arc::new(AtomicU64::new(0)),
            concurrent_count: Arc::new(AtomicU64::new(0)),
            max_concurrent: Arc::new(AtomicU64::new(0)),
        }
    }

    fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    fn max_concurrent(&self) -> u64 {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler<u64, u64> for CountingHandler {
    async fn handle(&self, payload: u64, _meta: TaskMeta) -> Result<u64, Failure> {
        let current = self.concurrent_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.work).await;

        self.concurrent_count.fetch_sub(1, Ordering::SeqCst);
        self.execution_count.fetch_add(1, Ordering::SeqCst);
        Ok(payload * 2)
    }
}

/// Handler with random jitter, used for conservation under load
#[derive(Clone)]
struct JitterHandler;

#[async_trait]
impl TaskHandler<u64, u64> for JitterHandler {
    async fn handle(&self, payload: u64, _meta: TaskMeta) -> Result<u64, Failure> {
        let jitter = rand::rng().random_range(0..=2_000_u64);
        tokio::time::sleep(Duration::from_micros(jitter)).await;
        Ok(payload)
    }
}

/// Handler that fails task "X", panics on "P", sleeps past its deadline on "SLOW"
#[derive(Clone)]
struct FlakyHandler;

#[async_trait]
impl TaskHandler<u64, u64> for FlakyHandler {
    async fn handle(&self, payload: u64, meta: TaskMeta) -> Result<u64, Failure> {
        match meta.id.as_str() {
            "X" => Err(Failure::handler("simulated", "simulated failure")),
            "P" => panic!("simulated panic"),
            "SLOW" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(payload)
            }
            _ => Ok(payload + 1),
        }
    }
}

/// Handler that records when each call starts
#[derive(Clone)]
struct StampingHandler {
    starts: Arc<parking_lot::Mutex<Vec<Instant>>>,
}

#[async_trait]
impl TaskHandler<u64, u64> for StampingHandler {
    async fn handle(&self, payload: u64, _meta: TaskMeta) -> Result<u64, Failure> {
        self.starts.lock().push(Instant::now());
        Ok(payload)
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_two_workers_process_ten_sleeping_tasks() {
    println!("\n=== test_two_workers_process_ten_sleeping_tasks ===");
    init_tracing();

    let config = PoolConfig::new()
        .with_worker_count(2)
        .with_queue_capacity(5);
    let pool = WorkerPool::new(config, SleepHandler { millis: 10 }).expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    let start = Instant::now();
    for i in 0..10 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    let report = pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let elapsed = start.elapsed();
    let results = consumer.join().expect("Consumer panicked");

    println!("Processed {} tasks in {:?}", results.len(), elapsed);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(TaskResult::is_success));
    assert_eq!(report.completed, 10);
    assert_eq!(report.exit_code(), 0);
    // Five rounds of two 10ms tasks; generous ceiling for loaded CI machines.
    assert!(elapsed >= Duration::from_millis(45), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_000), "elapsed {elapsed:?}");

    println!("=== test_two_workers_process_ten_sleeping_tasks PASSED ===\n");
}

#[test]
fn test_rate_limit_paces_instant_tasks() {
    println!("\n=== test_rate_limit_paces_instant_tasks ===");

    let starts = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let handler = StampingHandler {
        starts: Arc::clone(&starts),
    };
    let config = PoolConfig::new()
        .with_worker_count(2)
        .with_queue_capacity(10)
        .with_rate_limit(5.0, 1);

    let start = Instant::now();
    let pool = WorkerPool::new(config, handler).expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());
    for i in 0..10 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let elapsed = start.elapsed();

    assert_eq!(consumer.join().expect("Consumer panicked").len(), 10);
    println!("10 tasks at 5/s took {elapsed:?}");
    // Nine 200ms intervals after the first token; small margin for float rounding.
    assert!(elapsed >= Duration::from_millis(1_790), "elapsed {elapsed:?}");

    // In any one-second window no more than rate * 1s + burst admissions.
    let mut starts = starts.lock().clone();
    starts.sort();
    for (i, first) in starts.iter().enumerate() {
        let in_window = starts[i..]
            .iter()
            .take_while(|t| t.duration_since(*first) < Duration::from_secs(1))
            .count();
        assert!(in_window <= 6, "{in_window} admissions within one second");
    }

    println!("=== test_rate_limit_paces_instant_tasks PASSED ===\n");
}

#[test]
fn test_graceful_shutdown_delivers_submitted_tasks() {
    println!("\n=== test_graceful_shutdown_delivers_submitted_tasks ===");

    let pool = Arc::new(
        WorkerPool::new(
            PoolConfig::new().with_worker_count(2).with_queue_capacity(5),
            SleepHandler { millis: 20 },
        )
        .expect("Failed to create pool"),
    );
    let consumer = collect_in_background(pool.results());

    for i in 0..3 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    let shutdown = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.shutdown(ShutdownMode::Graceful))
    };

    wait_until(|| pool.state() != PoolState::Running && pool.state() != PoolState::Initializing);
    assert_eq!(
        pool.submit(Task::new(4)).unwrap_err(),
        PoolError::QueueClosed
    );

    let report = shutdown
        .join()
        .expect("Shutdown thread panicked")
        .expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(TaskResult::is_success));
    assert_eq!(report.completed, 3);
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(pool.stats().rejected, 1);

    println!("=== test_graceful_shutdown_delivers_submitted_tasks PASSED ===\n");
}

#[test]
fn test_failing_task_does_not_affect_others() {
    println!("\n=== test_failing_task_does_not_affect_others ===");

    let pool = WorkerPool::new(PoolConfig::new().with_worker_count(1), FlakyHandler)
        .expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    for id in ["A", "X", "B", "P", "C"] {
        pool.submit(Task::with_id(id, 1)).expect("Failed to submit");
    }
    let report = pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");
    assert_eq!(results.len(), 5);

    for result in &results {
        match result.id.as_str() {
            "X" => {
                let failure = result.failure().expect("X must fail");
                assert_eq!(failure.kind, FailureKind::Handler("simulated".into()));
            }
            "P" => {
                let failure = result.failure().expect("P must fail");
                assert_eq!(failure.kind, FailureKind::Panic);
                assert_eq!(failure.message, "simulated panic");
            }
            _ => assert_eq!(result.value(), Some(&2)),
        }
    }
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.exit_code(), 1);

    println!("=== test_failing_task_does_not_affect_others PASSED ===\n");
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn test_every_accepted_task_yields_one_result() {
    println!("\n=== test_every_accepted_task_yields_one_result ===");

    let pool = Arc::new(
        WorkerPool::new(
            PoolConfig::new().with_worker_count(4).with_queue_capacity(8),
            JitterHandler,
        )
        .expect("Failed to create pool"),
    );
    let consumer = collect_in_background(pool.results());

    let producers: Vec<_> = (0..4_u64)
        .map(|p| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50 {
                    pool.submit(Task::with_id(format!("{p}-{i}"), p * 100 + i))
                        .expect("Failed to submit");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("Producer panicked");
    }

    let report = pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");
    let unique: HashSet<_> = results.iter().map(|r| r.id.clone()).collect();

    println!("Stats: {:?}", pool.stats());
    assert_eq!(results.len(), 200);
    assert_eq!(unique.len(), 200);
    assert_eq!(report.total(), 200);
    assert_eq!(pool.stats().submitted, 200);

    println!("=== test_every_accepted_task_yields_one_result PASSED ===\n");
}

#[test]
fn test_concurrent_executions_never_exceed_admission_limit() {
    println!("\n=== test_concurrent_executions_never_exceed_admission_limit ===");

    let handler = CountingHandler::new(Duration::from_millis(10));
    let config = PoolConfig::new()
        .with_worker_count(6)
        .with_queue_capacity(32)
        .with_max_in_flight(2);
    let pool = WorkerPool::new(config, handler.clone()).expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    for i in 0..24 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");

    println!(
        "Max concurrent executions observed: {}",
        handler.max_concurrent()
    );
    assert_eq!(results.len(), 24);
    assert_eq!(handler.execution_count(), 24);
    assert!(handler.max_concurrent() <= 2);

    println!("=== test_concurrent_executions_never_exceed_admission_limit PASSED ===\n");
}

#[test]
fn test_concurrent_shutdown_calls_agree() {
    println!("\n=== test_concurrent_shutdown_calls_agree ===");

    let pool = Arc::new(
        WorkerPool::new(
            PoolConfig::new().with_worker_count(2).with_queue_capacity(16),
            SleepHandler { millis: 5 },
        )
        .expect("Failed to create pool"),
    );
    let consumer = collect_in_background(pool.results());
    for i in 0..10 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }

    let callers: Vec<_> = [ShutdownMode::Graceful, ShutdownMode::Forced, ShutdownMode::Graceful]
        .into_iter()
        .map(|mode| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.shutdown(mode))
        })
        .collect();
    let outcomes: Vec<_> = callers
        .into_iter()
        .map(|caller| caller.join().expect("Shutdown thread panicked"))
        .collect();

    let first = outcomes[0].clone().expect("Shutdown failed");
    assert!(outcomes.iter().all(|o| o.as_ref() == Ok(&first)));
    assert_eq!(pool.shutdown(ShutdownMode::Forced), Ok(first.clone()));
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(consumer.join().expect("Consumer panicked").len(), 10);
    assert_eq!(first.total(), 10);

    println!("=== test_concurrent_shutdown_calls_agree PASSED ===\n");
}

#[test]
fn test_tickets_balance_across_every_outcome() {
    println!("\n=== test_tickets_balance_across_every_outcome ===");

    let config = PoolConfig::new()
        .with_worker_count(3)
        .with_max_in_flight(2)
        .with_task_timeout(Duration::from_millis(200));
    let pool = WorkerPool::new(config, FlakyHandler).expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    for id in ["A", "X", "P", "SLOW", "B", "X", "P", "C"] {
        pool.submit(Task::with_id(id, 0)).expect("Failed to submit");
    }
    // Balanced admission accounting is verified by shutdown itself.
    let report = pool.shutdown(ShutdownMode::Graceful).expect("Tickets out of balance");
    let results = consumer.join().expect("Consumer panicked");

    assert_eq!(results.len(), 8);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 4);
    assert_eq!(report.timed_out, 1);

    println!("=== test_tickets_balance_across_every_outcome PASSED ===\n");
}

// ============================================================================
// CANCELLATION AND BACKPRESSURE
// ============================================================================

#[test]
fn test_forced_shutdown_reports_queued_tasks_as_cancelled() {
    println!("\n=== test_forced_shutdown_reports_queued_tasks_as_cancelled ===");

    let pool = WorkerPool::new(
        PoolConfig::new().with_worker_count(1).with_queue_capacity(10),
        SleepHandler { millis: 50 },
    )
    .expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    for i in 0..6 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    wait_until(|| pool.stats().in_flight == 1);

    let report = pool.shutdown(ShutdownMode::Forced).expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");

    let cancelled = results
        .iter()
        .filter(|r| r.failure().map(|f| &f.kind) == Some(&FailureKind::Cancelled))
        .count();
    println!("Report: {report:?}");
    assert_eq!(results.len(), 6);
    assert_eq!(cancelled, 5);
    assert_eq!(report.completed, 1);
    assert_eq!(report.cancelled, 5);
    assert_eq!(report.abandoned, 5);
    assert_eq!(report.exit_code(), 2);

    println!("=== test_forced_shutdown_reports_queued_tasks_as_cancelled PASSED ===\n");
}

#[test]
fn test_full_queue_backpressure() {
    println!("\n=== test_full_queue_backpressure ===");

    let pool = WorkerPool::new(
        PoolConfig::new().with_worker_count(1).with_queue_capacity(1),
        SleepHandler { millis: 100 },
    )
    .expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    pool.submit(Task::new(1)).expect("Failed to submit");
    wait_until(|| pool.stats().in_flight == 1);
    pool.try_submit(Task::new(2)).expect("Queue should have room");

    assert_eq!(pool.try_submit(Task::new(3)).unwrap_err(), PoolError::QueueFull);
    let deadline = Instant::now() + Duration::from_millis(20);
    assert_eq!(
        pool.submit_with(Task::new(4), &CancelToken::new(), Some(deadline))
            .unwrap_err(),
        PoolError::DeadlineExceeded
    );

    let caller = CancelToken::new();
    caller.cancel();
    assert_eq!(
        pool.submit_with(Task::new(5), &caller, None).unwrap_err(),
        PoolError::Cancelled
    );

    let report = pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    assert_eq!(consumer.join().expect("Consumer panicked").len(), 2);
    assert_eq!(report.completed, 2);
    assert_eq!(pool.stats().rejected, 3);

    println!("=== test_full_queue_backpressure PASSED ===\n");
}

#[test]
fn test_submissions_racing_forced_shutdown_are_never_lost() {
    println!("\n=== test_submissions_racing_forced_shutdown_are_never_lost ===");

    for round in 0..5 {
        let pool = Arc::new(
            WorkerPool::new(
                PoolConfig::new().with_worker_count(2).with_queue_capacity(16),
                SleepHandler { millis: 1 },
            )
            .expect("Failed to create pool"),
        );
        let consumer = collect_in_background(pool.results());

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut accepted = 0_u64;
                    for i in 0_u64.. {
                        match pool.submit(Task::new(i)) {
                            Ok(_) => accepted += 1,
                            Err(e) => {
                                assert_eq!(e, PoolError::QueueClosed);
                                break;
                            }
                        }
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        let report = pool.shutdown(ShutdownMode::Forced).expect("Shutdown failed");
        let accepted: u64 = producers
            .into_iter()
            .map(|h| h.join().expect("Producer panicked"))
            .sum();
        let results = consumer.join().expect("Consumer panicked");

        println!("Round {round}: accepted {accepted}, results {}", results.len());
        assert_eq!(results.len() as u64, accepted);
        assert_eq!(report.total(), accepted);
        assert_eq!(pool.stats().submitted, accepted);
    }

    println!("=== test_submissions_racing_forced_shutdown_are_never_lost PASSED ===\n");
}

#[test]
fn test_parent_cancellation_drains_queue() {
    println!("\n=== test_parent_cancellation_drains_queue ===");

    let parent = CancelToken::new();
    let pool = WorkerPool::with_cancel(
        PoolConfig::new().with_worker_count(1).with_queue_capacity(8),
        SleepHandler { millis: 50 },
        &parent,
    )
    .expect("Failed to create pool");
    let consumer = collect_in_background(pool.results());

    for i in 0..4 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    wait_until(|| pool.stats().in_flight == 1);
    parent.cancel();

    wait_until(|| pool.state() == PoolState::Draining);
    assert_eq!(pool.submit(Task::new(9)).unwrap_err(), PoolError::QueueClosed);

    let report = pool.shutdown(ShutdownMode::Graceful).expect("Shutdown failed");
    let results = consumer.join().expect("Consumer panicked");
    assert_eq!(results.len(), 4);
    assert_eq!(report.completed, 1);
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.abandoned, 3);
    assert_eq!(report.mode, ShutdownMode::Graceful);
    assert_eq!(report.exit_code(), 2);

    println!("=== test_parent_cancellation_drains_queue PASSED ===\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_consumer() {
    println!("\n=== test_async_consumer ===");

    let handler = CountingHandler::new(Duration::from_millis(5));
    let pool = Arc::new(
        WorkerPool::new(
            PoolConfig::new().with_worker_count(3).with_queue_capacity(20),
            handler.clone(),
        )
        .expect("Failed to create pool"),
    );
    let results = pool.results();
    let consumer = tokio::task::spawn_blocking(move || {
        results
            .map(|r| r.into_outcome().expect("Task failed"))
            .sum::<u64>()
    });

    for i in 1..=20 {
        pool.submit(Task::new(i)).expect("Failed to submit");
    }
    let shutdown_pool = Arc::clone(&pool);
    let report = tokio::task::spawn_blocking(move || shutdown_pool.shutdown(ShutdownMode::Graceful))
        .await
        .expect("Shutdown task panicked")
        .expect("Shutdown failed");

    let total = consumer.await.expect("Consumer panicked");
    assert_eq!(total, 2 * (1..=20).sum::<u64>());
    assert_eq!(report.completed, 20);
    assert_eq!(handler.execution_count(), 20);

    println!("=== test_async_consumer PASSED ===\n");
}
