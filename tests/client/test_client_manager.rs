//! Tests for scoped client acquisition
//!
//! Every client handed to a body is torn down exactly once, whether the
//! body succeeds, fails, panics or is dropped.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Attempt, ScriptedFactory, success};
use kodegen_agent_sessions::{
    AgentClient, ClientManager, EngineError, SessionConfig, SessionId,
};
use tokio_test::{assert_err, assert_ok};

fn manager(attempts: Vec<Attempt>) -> (Arc<ClientManager<ScriptedFactory>>, Arc<ScriptedFactory>) {
    common::init_logging();
    let factory = Arc::new(ScriptedFactory::new(attempts));
    (Arc::new(ClientManager::new(Arc::clone(&factory))), factory)
}

#[tokio::test]
async fn test_client_is_disconnected_after_success_and_error() {
    let (manager, factory) = manager(vec![]);
    let session = SessionId::new("s-1");
    let config = SessionConfig::default();

    let value = assert_ok!(
        manager
            .with_client(&session, &config, None, |client| {
                Box::pin(async move {
                    client.query("status").await?;
                    Ok(7)
                })
            })
            .await
    );
    assert_eq!(value, 7);

    let err = assert_err!(
        manager
            .with_client(&session, &config, None, |_client| {
                Box::pin(async move { Err::<(), _>(EngineError::transport("stdout closed")) })
            })
            .await
    );
    assert!(matches!(err, EngineError::Transport(_)));

    let counters = &factory.counters;
    assert_eq!(counters.connects(), 2);
    assert_eq!(counters.disconnects(), 2);
    assert_eq!(counters.aborts(), 0);
}

#[tokio::test]
async fn test_connect_failure_never_runs_the_body() {
    let (manager, factory) = manager(vec![Attempt::ConnectFails("no such file".into())]);
    let ran = AtomicUsize::new(0);

    let err = manager
        .with_client(&SessionId::new("s-1"), &SessionConfig::default(), None, |_client| {
            ran.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(()) })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Connection(_)));
    assert!(err.is_retryable());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(factory.counters.live(), 0);
}

#[tokio::test]
async fn test_panicking_body_still_disconnects() {
    let (manager, factory) = manager(vec![]);

    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .with_client(&SessionId::new("s-1"), &SessionConfig::default(), None, |client| {
                    Box::pin(async move {
                        client.query("boom").await?;
                        if client.receive_response().is_ok() {
                            panic!("bug in the body");
                        }
                        Ok(())
                    })
                })
                .await
        })
    };

    let err = task.await.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(factory.counters.disconnects(), 1);
    assert_eq!(factory.counters.live(), 0);
}

#[tokio::test]
async fn test_dropped_future_aborts_the_client() {
    let (manager, factory) = manager(vec![]);

    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .with_client(&SessionId::new("s-1"), &SessionConfig::default(), None, |_client| {
                    Box::pin(async move {
                        futures::future::pending::<()>().await;
                        Ok(())
                    })
                })
                .await
        })
    };

    while factory.counters.connects() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(factory.counters.aborts(), 1);
    assert_eq!(factory.counters.disconnects(), 0);
    assert_eq!(factory.counters.live(), 0);
}

#[tokio::test]
async fn test_one_client_per_session_at_a_time() {
    let (manager, factory) = manager(vec![
        Attempt::Stream(success("a")),
        Attempt::Stream(success("b")),
        Attempt::Stream(success("c")),
    ]);
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for session in ["shared", "shared", "other"] {
        let manager = Arc::clone(&manager);
        let in_use = Arc::clone(&in_use);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let shared = session == "shared";
            manager
                .with_client(&SessionId::new(session), &SessionConfig::default(), None, |_client| {
                    Box::pin(async move {
                        if shared {
                            let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if shared {
                            in_use.fetch_sub(1, Ordering::SeqCst);
                        }
                        Ok(())
                    })
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(factory.counters.created(), 3);
    assert_eq!(factory.counters.live(), 0);
}
