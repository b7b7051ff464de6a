//! Tests for bounded retry
//!
//! The coordinator on its own (backoff, budget, cancellation) and the
//! exhaustion path through a session.

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::{Attempt, Harness, fast_retry, success};
use kodegen_agent_sessions::{
    CreateSession, EngineError, RetryConfig, RetryCoordinator, RetryEvent, SessionConfig,
    SessionStatus,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

fn config(max_retries: u32, delay: f64, exponential: bool) -> RetryConfig {
    RetryConfig {
        max_retries,
        retry_delay_secs: delay,
        exponential_backoff: exponential,
        timeout_seconds: 30,
    }
}

#[test]
fn test_backoff_schedule() {
    let fixed = RetryCoordinator::new(&config(5, 2.0, false));
    assert_eq!(fixed.delay_after(1), Duration::from_secs(2));
    assert_eq!(fixed.delay_after(4), Duration::from_secs(2));

    let exponential = RetryCoordinator::new(&config(10, 2.0, true));
    assert_eq!(exponential.delay_after(1), Duration::from_secs(2));
    assert_eq!(exponential.delay_after(2), Duration::from_secs(4));
    assert_eq!(exponential.delay_after(3), Duration::from_secs(8));
    // Capped at one minute
    assert_eq!(exponential.delay_after(9), Duration::from_secs(60));

    assert_eq!(RetryCoordinator::new(&config(0, 1.0, false)).max_attempts(), 1);
}

#[test]
fn test_delay_beyond_the_ceiling() {
    let err = config(3, 1e20, false).validate().unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
    assert!(config(3, 61.0, true).validate().is_err());
    assert!(config(3, 60.0, true).validate().is_ok());

    // A config that skipped validation still yields a bounded delay
    let coordinator = RetryCoordinator::new(&config(3, 1e20, false));
    assert_eq!(coordinator.delay_after(1), Duration::from_secs(60));
}

#[tokio::test]
async fn test_session_with_oversized_delay_is_rejected_at_create() {
    let harness = Harness::new(vec![]);
    let err = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig {
                retry: config(3, 1e20, false),
                ..SessionConfig::default()
            },
            ..CreateSession::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let coordinator = RetryCoordinator::new(&config(3, 2.0, false));
    let cancel = CancellationToken::new();
    let events = Arc::new(Mutex::new(Vec::<RetryEvent>::new()));

    let started = tokio::time::Instant::now();
    let value = coordinator
        .run(
            &cancel,
            |attempt| async move {
                if attempt < 3 {
                    Err(EngineError::connection("CLI exited early"))
                } else {
                    Ok(attempt)
                }
            },
            |event| {
                let events = Arc::clone(&events);
                async move { events.lock().push(event) }
            },
        )
        .await
        .unwrap();

    assert_eq!(value, 3);
    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].attempt, 1);
    assert_eq!(events[1].next_delay, Some(Duration::from_secs(2)));
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_reports_every_failure() {
    let coordinator = RetryCoordinator::new(&config(3, 1.0, true));
    let cancel = CancellationToken::new();
    let attempts = AtomicU32::new(0);
    let events = Arc::new(Mutex::new(Vec::<RetryEvent>::new()));

    let err = coordinator
        .run(
            &cancel,
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(EngineError::connection("connection refused")) }
            },
            |event| {
                let events = Arc::clone(&events);
                async move { events.lock().push(event) }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match err {
        EngineError::RetriesExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    let events = events.lock();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2].next_delay, None);
    assert_eq!(events[2].max_attempts, 3);
}

#[tokio::test]
async fn test_non_retryable_errors_are_not_retried() {
    let coordinator = RetryCoordinator::new(&config(5, 0.0, false));
    let attempts = AtomicU32::new(0);

    let err = coordinator
        .run(
            &CancellationToken::new(),
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(EngineError::validation("bad template")) }
            },
            |_| async {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retryable() {
    let mut retry = config(2, 0.0, false);
    retry.timeout_seconds = 5;
    let coordinator = RetryCoordinator::new(&retry);
    let attempts = AtomicU32::new(0);

    let err = coordinator
        .run(
            &CancellationToken::new(),
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            },
            |_| async {},
        )
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(matches!(err, EngineError::RetriesExhausted { attempts: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let coordinator = RetryCoordinator::new(&config(5, 600.0, false));
    let cancel = CancellationToken::new();
    let attempts = AtomicU32::new(0);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let err = coordinator
        .run(
            &cancel,
            |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(EngineError::connection("down")) }
            },
            |_| async {},
        )
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_fails_after_three_connection_failures() {
    let harness = Harness::new(vec![
        Attempt::ConnectFails("spawn failed: resource temporarily unavailable".into()),
        Attempt::ConnectFails("spawn failed: resource temporarily unavailable".into()),
        Attempt::ConnectFails("spawn failed: resource temporarily unavailable".into()),
        Attempt::Stream(success("never reached")),
    ]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            owner: "ops".into(),
            config: SessionConfig::builder().retry(fast_retry(3)).build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .query(&session.id, "check the cluster", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RetriesExhausted { attempts: 3, .. }));

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.metrics.total_retries, 3);
    let message = session.error_message.unwrap();
    assert!(message.contains("resource temporarily unavailable"), "{message}");
    assert!(session.completed_at.is_some());

    // No fourth attempt was made
    assert_eq!(harness.counters().created(), 3);
    assert_eq!(harness.counters().live(), 0);
}

#[tokio::test]
async fn test_session_recovers_after_transient_stream_failure() {
    let harness = Harness::new(vec![
        Attempt::Stream(vec![
            common::system_init(),
            common::Step::Error(EngineError::transport("stdout closed")),
        ]),
        Attempt::Stream(success("all pods healthy")),
    ]);
    let session = harness
        .orchestrator
        .create(CreateSession::default())
        .await
        .unwrap();

    let summary = harness
        .orchestrator
        .query(&session.id, "check the cluster", &HashMap::new())
        .await
        .unwrap();
    assert_eq!(summary.result.as_deref(), Some("all pods healthy"));

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.metrics.total_retries, 1);
    assert_eq!(harness.counters().connects(), 2);
    assert_eq!(harness.counters().disconnects(), 2);
}
