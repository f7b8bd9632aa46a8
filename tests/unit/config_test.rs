//! Tests for configuration validation

use bounded_worker_pool::config::PoolConfig;
use std::time::Duration;

#[test]
fn test_pool_config_validation() {
    let valid = PoolConfig::new()
        .with_worker_count(4)
        .with_queue_capacity(50)
        .with_rate_limit(10.0, 5)
        .with_task_timeout(Duration::from_secs(60));
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_worker_count() {
    let invalid = PoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_burst() {
    let invalid = PoolConfig::new().with_rate_limit(10.0, 0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_rate() {
    assert!(PoolConfig::new().with_rate_limit(-1.0, 1).validate().is_err());
    assert!(PoolConfig::new()
        .with_rate_limit(f64::INFINITY, 1)
        .validate()
        .is_err());
}

#[test]
fn test_pool_config_vanishing_rate_rejected() {
    let err = PoolConfig::new()
        .with_rate_limit(1e-20, 1)
        .validate()
        .unwrap_err();
    assert!(err.contains("too small"), "unexpected error: {err}");
    assert!(PoolConfig::new().with_rate_limit(0.001, 1).validate().is_ok());
}

#[test]
fn test_pool_config_invalid_max_in_flight() {
    let invalid = PoolConfig::new().with_max_in_flight(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_timeout() {
    let invalid = PoolConfig::new().with_task_timeout(Duration::ZERO);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_stack_size() {
    let invalid = PoolConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_zero_capacity_queue_is_valid() {
    let cfg = PoolConfig::new().with_worker_count(2).with_queue_capacity(0);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.result_buffer(), 2);
}

#[test]
fn test_pool_config_from_json() {
    let json = r#"{
        "worker_count": 3,
        "queue_capacity": 12,
        "rate_per_sec": 2.5,
        "burst": 4,
        "task_timeout_ms": 1500
    }"#;
    let cfg = PoolConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.queue_capacity, 12);
    assert_eq!(cfg.burst, 4);
    assert_eq!(cfg.task_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(cfg.admission_limit(), 3);
    assert_eq!(cfg.result_buffer(), 15);
}

#[test]
fn test_pool_config_from_json_invalid() {
    assert!(PoolConfig::from_json_str("{ not json").is_err());
    let err = PoolConfig::from_json_str(r#"{"worker_count": 0}"#).unwrap_err();
    assert!(err.contains("worker_count"));
}

#[test]
fn test_pool_config_from_env() {
    // The only test in this binary touching WORKER_POOL_* variables.
    std::env::set_var("WORKER_POOL_WORKER_COUNT", "3");
    std::env::set_var("WORKER_POOL_RATE_PER_SEC", "7.5");
    std::env::set_var("WORKER_POOL_MAX_IN_FLIGHT", "2");
    let cfg = PoolConfig::from_env().unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.admission_limit(), 2);
    assert!((cfg.rate_per_sec - 7.5).abs() < f64::EPSILON);

    std::env::set_var("WORKER_POOL_BURST", "many");
    let err = PoolConfig::from_env().unwrap_err();
    assert!(format!("{err:#}").contains("WORKER_POOL_BURST"));

    for key in ["WORKER_COUNT", "RATE_PER_SEC", "MAX_IN_FLIGHT", "BURST"] {
        std::env::remove_var(format!("WORKER_POOL_{key}"));
    }
}
