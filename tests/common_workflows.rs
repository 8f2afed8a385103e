//! Integration tests for common rampart workflows.
//!
//! These tests drive the public facade the way a call-site would.

use rampart::prelude::*;
use rampart::{CircuitBreaker, ManualClock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

type Outcome = Result<String, Failure<String>>;

fn fast_config(name: &str) -> PipelineConfig<String> {
    PipelineConfig::new(name)
        .max_attempts(3)
        .backoff(BackoffStrategy::None)
}

fn small_breaker(name: &str) -> CircuitBreakerConfig {
    CircuitBreakerConfig::new(name)
        .failure_rate_threshold(50.0)
        .sliding_window_size(4)
        .minimum_number_of_calls(4)
        .wait_duration_in_open_state(Duration::from_secs(10))
        .permitted_calls_in_half_open_state(2)
}

// =============================================================================
// Circuit Breaker Tests
// =============================================================================

#[test]
fn test_breaker_evaluates_only_after_minimum_samples() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("threshold")
            .failure_rate_threshold(50.0)
            .sliding_window_size(10)
            .minimum_number_of_calls(5),
    );

    // 100% failure rate, but fewer samples than the minimum.
    for _ in 0..4 {
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn test_breaker_stays_closed_below_threshold() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("below")
            .failure_rate_threshold(50.0)
            .sliding_window_size(10)
            .minimum_number_of_calls(4),
    );

    for outcome in [true, true, false, true, true, false, true] {
        if outcome {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_scenario_breaker_opens_after_fourth_outcome() {
    let breaker = CircuitBreaker::new(small_breaker("scenario"));

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);

    // 3 failures out of 4 = 75%
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn test_half_open_admits_exactly_trial_batch() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::with_clock(small_breaker("trial"), clock.clone());
    breaker.force_open();

    assert!(breaker.try_acquire_permission().is_err());

    clock.advance(Duration::from_secs(10));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let first = breaker.try_acquire_permission().unwrap();
    let second = breaker.try_acquire_permission().unwrap();
    let third = breaker.try_acquire_permission().err();

    assert_eq!(third.map(|rejection| rejection.state), Some(CircuitState::HalfOpen));

    first.on_success();
    second.on_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_never_dispatches() {
    let pipeline: Pipeline<String, String> = Pipeline::new(fast_config("open")).unwrap();
    pipeline.circuit_breaker().force_open();

    let calls = Arc::new(AtomicU32::new(0));
    for _ in 0..5 {
        let calls = calls.clone();
        let result = pipeline
            .execute(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("reached".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), FailureKind::CallNotPermitted);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stats().dispatched, 0);
    assert_eq!(pipeline.stats().circuit_breaker.total_rejections, 5);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_recovers_through_half_open() {
    let clock = ManualClock::new();
    let config = fast_config("recover")
        .max_attempts(1)
        .circuit_breaker(small_breaker("recover"));
    let pipeline: Pipeline<String, String> = Pipeline::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();

    for _ in 0..4 {
        let _ = pipeline
            .execute(|| async { Err::<String, _>("boom".to_string()) })
            .await;
    }
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Open);

    clock.advance(Duration::from_secs(10));

    for _ in 0..2 {
        let result = pipeline.execute(|| async { Ok("ok".to_string()) }).await;
        assert_eq!(result.unwrap(), "ok");
    }
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_window_buffers_outcomes_in_completion_order() {
    let config = fast_config("ordering").max_attempts(1).circuit_breaker(
        CircuitBreakerConfig::new("ordering")
            .failure_rate_threshold(60.0)
            .sliding_window_size(2)
            .minimum_number_of_calls(2),
    );
    let pipeline: Pipeline<String, String> = Pipeline::new(config).unwrap();

    // Dispatched first, completes last.
    let slow = pipeline.execute_async(|| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok("slow".to_string())
    });
    let fast = pipeline.execute_async(|| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err::<String, _>("fast".to_string())
    });

    assert!(fast.await.is_err());
    let stats = pipeline.stats().circuit_breaker;
    assert_eq!(stats.buffered_calls, 1);
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.total_successes, 0);

    assert_eq!(slow.await.unwrap(), "slow");
    assert_eq!(pipeline.stats().circuit_breaker.failure_rate, Some(50.0));

    // A third outcome evicts the oldest buffered one: the fast failure.
    let result = pipeline.execute(|| async { Ok("third".to_string()) }).await;
    assert_eq!(result.unwrap(), "third");

    let stats = pipeline.stats().circuit_breaker;
    assert_eq!(stats.buffered_calls, 2);
    assert_eq!(stats.failure_rate, Some(0.0));
    assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Closed);
}

// =============================================================================
// Bulkhead Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_non_blocking_bulkhead_rejects_second_call() {
    let pipeline: Pipeline<String, String> =
        Pipeline::new(fast_config("single").max_concurrent_calls(1)).unwrap();

    let op = || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, String>("done".to_string())
    };

    let (first, second) = tokio::join!(pipeline.execute(op), pipeline.execute(op));

    assert_eq!(first.unwrap(), "done");
    let failure = second.unwrap_err();
    assert_eq!(failure.kind(), FailureKind::BulkheadFull);
    assert_eq!(pipeline.stats().dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_bound() {
    let pipeline: Pipeline<String, String> = Pipeline::new(
        fast_config("bounded")
            .max_concurrent_calls(3)
            .max_wait(Duration::from_secs(60)),
    )
    .unwrap();

    let current = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let current = current.clone();
            let peak = peak.clone();
            pipeline.execute_async(move || {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>("done".to_string())
                }
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "done");
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(pipeline.bulkhead().available_permits(), 3);
    assert_eq!(pipeline.bulkhead().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_fallback_under_saturation() {
    let pipeline: Pipeline<String, String> = Pipeline::new(
        fast_config("degrading")
            .max_concurrent_calls(1)
            .fallback_on(FailureKind::BulkheadFull, "degraded".to_string()),
    )
    .unwrap();

    let op = || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, String>("fresh".to_string())
    };

    let (first, second) = tokio::join!(pipeline.execute(op), pipeline.execute(op));

    assert_eq!(first.unwrap(), "fresh");
    assert_eq!(second.unwrap(), "degraded");
    assert_eq!(pipeline.stats().fallback.substitutions, 1);
}

// =============================================================================
// Retry and Time Limiter Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_wraps_last_failure() {
    let pipeline: Pipeline<String, String> = Pipeline::new(fast_config("exhaust")).unwrap();
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Outcome = pipeline
        .execute(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("attempt {}", n)) }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match result {
        Err(Failure::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, Failure::Operation(ref e) if e == "attempt 3"));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_every_attempt_times_out() {
    let pipeline: Pipeline<String, String> = Pipeline::new(
        fast_config("slow")
            .max_attempts(2)
            .timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let result = pipeline
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok::<_, String>("late".to_string())
        })
        .await;

    let failure = result.unwrap_err();
    assert!(matches!(
        failure,
        Failure::RetriesExhausted { attempts: 2, ref last } if last.kind() == FailureKind::Timeout
    ));
    assert_eq!(pipeline.stats().dispatched, 2);
    assert_eq!(pipeline.stats().time_limiter.timed_out, 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_attempt_does_not_block_retry() {
    let pipeline: Pipeline<String, String> = Pipeline::new(
        fast_config("abandon")
            .max_concurrent_calls(1)
            .timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let result = pipeline
        .execute(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok::<_, String>(format!("attempt {}", n + 1))
            }
        })
        .await;

    assert_eq!(result.unwrap(), "attempt 2");

    let stats = pipeline.stats();
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.circuit_breaker.total_failures, 1);
    assert_eq!(stats.circuit_breaker.total_successes, 1);
    assert_eq!(stats.bulkhead.available_permits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_retry_predicate() {
    let pipeline: Pipeline<String, String> = Pipeline::builder(fast_config("predicate"))
        .retry_on_error(|e: &String| e.starts_with("transient"))
        .build()
        .unwrap();

    let result = pipeline
        .execute(|| async { Err::<String, _>("fatal: bad request".to_string()) })
        .await;

    assert!(matches!(result, Err(Failure::Operation(_))));
    assert_eq!(pipeline.stats().dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_operation_is_contained() {
    let pipeline: Pipeline<String, String> =
        Pipeline::new(fast_config("panicky").max_attempts(2)).unwrap();

    let result = pipeline
        .execute(|| async {
            if true {
                panic!("remote exploded");
            }
            Ok::<String, String>("unreachable".to_string())
        })
        .await;

    let failure = result.unwrap_err();
    assert_eq!(failure.root_kind(), FailureKind::Panicked);
    assert_eq!(pipeline.stats().dispatched, 2);
}

// =============================================================================
// Execution Flavour Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancelled_execution_releases_permit() {
    let pipeline: Pipeline<String, String> =
        Pipeline::new(fast_config("cancel").max_concurrent_calls(1)).unwrap();

    let handle = pipeline.execute_async(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, String>("never".to_string())
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pipeline.bulkhead().available_permits(), 0);

    handle.cancel();
    assert!(matches!(handle.await, Err(Failure::Cancelled)));
    assert_eq!(pipeline.bulkhead().available_permits(), 1);
}

#[test]
fn test_execute_blocking_on_multi_thread_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let pipeline: Pipeline<String, String> = Pipeline::builder(fast_config("blocking"))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();

    let result = pipeline.execute_blocking(|| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok("blocked".to_string())
    });

    assert_eq!(result.unwrap().unwrap(), "blocked");
}

#[tokio::test]
async fn test_execute_blocking_refused_inside_async_context() {
    let pipeline: Pipeline<String, String> = Pipeline::new(fast_config("nested")).unwrap();

    let result = pipeline.execute_blocking(|| async { Ok("never".to_string()) });

    assert!(matches!(result, Err(PipelineError::BlockingUnsupported(_))));
    assert_eq!(pipeline.stats().dispatched, 0);
}

#[test]
fn test_pipeline_requires_runtime() {
    let result: Result<Pipeline<String, String>, _> = Pipeline::new(fast_config("orphan"));
    assert!(matches!(result, Err(PipelineError::NoRuntime(_))));
}

// =============================================================================
// External Service Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_external_service_renders_outcomes() {
    let service = ExternalService::new(fast_config("externalWs"), SimulatedCall::new()).unwrap();
    assert_eq!(service.handle().await, "Call succeeded");

    service.pipeline().circuit_breaker().force_open();
    let text = service.handle().await;
    assert!(text.starts_with("Call failed: CircuitBreaker 'externalWs' is OPEN"));
}

#[cfg(feature = "config")]
#[tokio::test]
async fn test_pipeline_from_settings() {
    use rampart::rampart_config::ConfigService;

    let service = ConfigService::builder()
        .set_default("name", "configured")
        .unwrap()
        .set_default("max_attempts", 1)
        .unwrap()
        .set_default("fallback.operation", "from config")
        .unwrap()
        .build()
        .unwrap();

    let config = service.pipeline_config().unwrap();
    let pipeline: Pipeline<String, String> = Pipeline::new(config).unwrap();
    let result = pipeline
        .execute(|| async { Err::<String, _>("boom".to_string()) })
        .await;

    assert_eq!(result.unwrap(), "from config");
}
