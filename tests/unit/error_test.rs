//! Tests for error types

use bounded_worker_pool::core::{Failure, FailureKind, PoolError};

#[test]
fn test_queue_errors_display() {
    assert_eq!(format!("{}", PoolError::QueueFull), "task queue is full");
    assert_eq!(format!("{}", PoolError::QueueClosed), "task queue is closed");
}

#[test]
fn test_ticket_imbalance_display() {
    let err = PoolError::TicketImbalance {
        acquired: 5,
        released: 4,
    };
    assert_eq!(
        format!("{}", err),
        "admission tickets out of balance: acquired 5, released 4"
    );
    assert!(err.is_invariant_violation());
    assert!(PoolError::ReleaseWithoutAcquire.is_invariant_violation());
}

#[test]
fn test_invalid_config_display() {
    let err = PoolError::InvalidConfig("worker_count must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: worker_count must be greater than 0"
    );
}

#[test]
fn test_only_queue_full_is_transient() {
    assert!(PoolError::QueueFull.is_transient());
    assert!(!PoolError::QueueClosed.is_transient());
    assert!(!PoolError::Cancelled.is_transient());
    assert!(!PoolError::DeadlineExceeded.is_transient());
}

#[test]
fn test_pool_error_into_anyhow() {
    let err: anyhow::Error = PoolError::Cancelled.into();
    assert_eq!(err.to_string(), "operation cancelled");
    assert_eq!(err.downcast_ref::<PoolError>(), Some(&PoolError::Cancelled));
}

#[test]
fn test_failure_roundtrips_through_json() {
    let failure = Failure::handler("timeout_upstream", "upstream took too long");
    let json = serde_json::to_string(&failure).unwrap();
    let back: Failure = serde_json::from_str(&json).unwrap();
    assert_eq!(back, failure);
    assert_eq!(back.kind, FailureKind::Handler("timeout_upstream".into()));
}
