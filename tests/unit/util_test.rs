//! Tests for utility functions

use bounded_worker_pool::core::{PoolState, ShutdownMode, ShutdownReport, TaskId};
use bounded_worker_pool::util::{init_tracing, now_ms};

#[test]
fn test_now_ms_advances() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() > before);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

#[test]
fn test_task_id_from_string() {
    let id = TaskId::from("job-42".to_string());
    assert_eq!(id.as_str(), "job-42");
    assert_eq!(id.to_string(), "job-42");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-42\"");
}

#[test]
fn test_pool_state_accepts_work() {
    assert!(PoolState::Initializing.accepts_work());
    assert!(PoolState::Running.accepts_work());
    assert!(!PoolState::Draining.accepts_work());
    assert!(!PoolState::Stopped.accepts_work());
}

#[test]
fn test_shutdown_report_serializes() {
    let report = ShutdownReport {
        mode: ShutdownMode::Forced,
        completed: 1,
        failed: 0,
        cancelled: 2,
        timed_out: 0,
        abandoned: 2,
    };
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["mode"], "forced");
    assert_eq!(json["cancelled"], 2);
    assert_eq!(json["abandoned"], 2);
}
