//! Tests for unattended task executions

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{Attempt, Harness, Step, assistant_text, success, system_init};
use kodegen_agent_sessions::{
    EngineError, ExecutionId, ExecutionMode, ExecutionStatus, PageRequest, PermissionMode,
    SessionConfig, SessionMode, SessionStatus, SessionStore, TaskDefinition, TaskId, TaskScheduler,
    TriggerMetadata, TriggerSource,
};

fn task(template: &str, mode: ExecutionMode) -> TaskDefinition {
    TaskDefinition {
        id: TaskId::new("nightly-health"),
        name: "nightly health check".into(),
        owner: "ops".into(),
        prompt_template: template.into(),
        config: SessionConfig::builder().allowed_tool("Bash(kubectl get:*)").build(),
        execution_mode: mode,
        default_variables: HashMap::from([("namespace".to_string(), "default".to_string())]),
    }
}

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

async fn wait_for(
    scheduler: &TaskScheduler<common::ScriptedFactory>,
    id: &ExecutionId,
    status: ExecutionStatus,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = scheduler.status(id).await.unwrap().status;
        if current == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution stayed {current:?}, expected {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_async_execution_records_a_summary() {
    let harness = Harness::new(vec![Attempt::Stream(success("3 pods healthy"))]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    let id = scheduler
        .execute(
            &task("Check pods in {{namespace}} for {{service}}", ExecutionMode::Async),
            vars(&[("service", "api")]),
            TriggerMetadata::default(),
        )
        .await
        .unwrap();
    let execution = scheduler.wait(&id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.mode, ExecutionMode::Async);
    assert!(execution.session_id.is_none());
    assert_eq!(execution.message_count, 3);
    assert_eq!(execution.tool_call_count, 0);
    assert_eq!(execution.retry_count, 0);
    assert!(execution.started_at.is_some());
    assert!(execution.completed_at.is_some());
    assert!(execution.duration_ms.is_some());
    assert_eq!(execution.result_data.unwrap()["result"], "3 pods healthy");
    assert_eq!(execution.variables["namespace"], "default");

    assert_eq!(
        harness.counters().prompts.lock().as_slice(),
        ["Check pods in default for api".to_string()]
    );
    // Unattended runs never wait for approval
    let configs = harness.counters().configs.lock().clone();
    assert_eq!(configs[0].permission_mode, PermissionMode::AcceptEdits);

    // No session was created for a summary-only run
    let sessions = harness
        .orchestrator
        .list(None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(sessions.total, 0);
}

#[tokio::test]
async fn test_caller_variables_override_defaults() {
    let harness = Harness::new(vec![]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    let id = scheduler
        .execute(
            &task("Check pods in {{namespace}} for {{service}}", ExecutionMode::Async),
            vars(&[("service", "api"), ("namespace", "payments")]),
            TriggerMetadata::default(),
        )
        .await
        .unwrap();
    scheduler.wait(&id).await.unwrap();

    assert_eq!(
        harness.counters().prompts.lock().as_slice(),
        ["Check pods in payments for api".to_string()]
    );
}

#[tokio::test]
async fn test_unrenderable_template_is_rejected_up_front() {
    let harness = Harness::new(vec![]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    for template in ["Check {{service}}", "Check {{service", "   "] {
        let err = scheduler
            .execute(
                &task(template, ExecutionMode::Async),
                HashMap::new(),
                TriggerMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{template}: {err:?}");
    }

    let executions = harness
        .store
        .list_executions(&TaskId::new("nightly-health"), PageRequest::all())
        .await
        .unwrap();
    assert_eq!(executions.total, 0);
    assert_eq!(harness.counters().created(), 0);
}

#[tokio::test]
async fn test_cancel_stops_a_running_execution() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        assistant_text("looking"),
        Step::Hang,
    ])]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    let id = scheduler
        .execute(
            &task("Check {{namespace}}", ExecutionMode::Async),
            HashMap::new(),
            TriggerMetadata::default(),
        )
        .await
        .unwrap();
    wait_for(&scheduler, &id, ExecutionStatus::Running).await;
    while harness.counters().live() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let requested = scheduler.cancel(&id).await.unwrap();
    assert!(requested.cancel_requested);

    let execution = scheduler.wait(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.message_count, 0);
    assert!(execution.result_data.is_none());
    assert!(execution.completed_at.is_some());
    assert_eq!(harness.counters().live(), 0);

    let err = scheduler.cancel(&id).await.unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
}

#[tokio::test]
async fn test_executions_queue_behind_the_concurrency_limit() {
    let harness = Harness::with_config(
        vec![Attempt::Stream(vec![system_init(), Step::Hang])],
        |config| config.max_concurrent_executions = 1,
    );
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());
    let definition = task("Check {{namespace}}", ExecutionMode::Async);

    let first = scheduler
        .execute(&definition, HashMap::new(), TriggerMetadata::default())
        .await
        .unwrap();
    wait_for(&scheduler, &first, ExecutionStatus::Running).await;
    while harness.counters().live() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = scheduler
        .execute(&definition, HashMap::new(), TriggerMetadata::default())
        .await
        .unwrap();
    let third = scheduler
        .execute(&definition, HashMap::new(), TriggerMetadata::default())
        .await
        .unwrap();
    wait_for(&scheduler, &second, ExecutionStatus::Queued).await;
    wait_for(&scheduler, &third, ExecutionStatus::Queued).await;

    // A queued execution can be cancelled without ever running
    scheduler.cancel(&third).await.unwrap();
    let third = scheduler.wait(&third).await.unwrap();
    assert_eq!(third.status, ExecutionStatus::Cancelled);
    assert!(third.started_at.is_none());

    scheduler.cancel(&first).await.unwrap();
    let second = scheduler.wait(&second).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(harness.counters().created(), 2);
}

#[tokio::test]
async fn test_retry_clones_a_failed_execution() {
    let refused = || Attempt::ConnectFails("connection refused".into());
    let harness = Harness::new(vec![refused(), refused(), refused()]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    let failed = scheduler
        .execute(
            &task("Check {{service}}", ExecutionMode::Async),
            vars(&[("service", "billing")]),
            TriggerMetadata {
                source: TriggerSource::Scheduled,
                triggered_by: Some("cron".into()),
                retry_of: None,
            },
        )
        .await
        .unwrap();
    let failed = scheduler.wait(&failed).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.error_message.unwrap().contains("connection refused"));

    let clone = scheduler.retry(&failed.id).await.unwrap();
    assert_ne!(clone, failed.id);
    let clone = scheduler.wait(&clone).await.unwrap();
    assert_eq!(clone.status, ExecutionStatus::Completed);
    assert_eq!(clone.trigger.source, TriggerSource::Retry);
    assert_eq!(clone.trigger.retry_of.as_ref(), Some(&failed.id));
    assert_eq!(clone.trigger.triggered_by.as_deref(), Some("cron"));
    assert_eq!(clone.variables, failed.variables);

    // The original keeps its failure
    assert_eq!(
        scheduler.status(&failed.id).await.unwrap().status,
        ExecutionStatus::Failed
    );
    let err = scheduler.retry(&clone.id).await.unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
}

#[tokio::test]
async fn test_session_mode_keeps_full_detail() {
    let harness = Harness::new(vec![Attempt::Stream(success("all green"))]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());

    let id = scheduler
        .execute(
            &task("Check {{namespace}}", ExecutionMode::Session),
            HashMap::new(),
            TriggerMetadata::default(),
        )
        .await
        .unwrap();
    let execution = scheduler.wait(&id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.message_count, 3);

    let session_id = execution.session_id.unwrap();
    let session = harness.orchestrator.get(&session_id).await.unwrap();
    assert_eq!(session.mode, SessionMode::Background);
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.owner, "ops");
    assert_eq!(session.config.permission_mode, PermissionMode::AcceptEdits);

    let messages = harness
        .orchestrator
        .messages(&session_id, PageRequest::all())
        .await
        .unwrap();
    assert_eq!(messages.total, 3);
}

#[tokio::test]
async fn test_shutdown_cancels_everything_running() {
    let harness = Harness::new(vec![
        Attempt::Stream(vec![system_init(), Step::Hang]),
        Attempt::Stream(vec![system_init(), Step::Hang]),
    ]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());
    let definition = task("Check {{namespace}}", ExecutionMode::Session);

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(
            scheduler
                .execute(&definition, HashMap::new(), TriggerMetadata::default())
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        wait_for(&scheduler, id, ExecutionStatus::Running).await;
    }

    scheduler.shutdown().await;
    for id in &ids {
        let execution = scheduler.status(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        if let Some(session_id) = execution.session_id {
            let session = harness.orchestrator.get(&session_id).await.unwrap();
            assert!(session.status.is_terminal(), "{}", session.status);
        }
    }
    assert_eq!(harness.counters().live(), 0);
}

#[tokio::test]
async fn test_async_executions_leave_nothing_behind() {
    let harness = Harness::new(vec![
        Attempt::Stream(success("ok")),
        Attempt::ConnectFails("connection refused".into()),
        Attempt::ConnectFails("connection refused".into()),
        Attempt::ConnectFails("connection refused".into()),
    ]);
    let scheduler = TaskScheduler::new(harness.orchestrator.clone());
    let definition = task("Check {{namespace}}", ExecutionMode::Async);

    let completed = scheduler
        .execute(&definition, HashMap::new(), TriggerMetadata::default())
        .await
        .unwrap();
    assert_eq!(
        scheduler.wait(&completed).await.unwrap().status,
        ExecutionStatus::Completed
    );
    let failed = scheduler
        .execute(&definition, HashMap::new(), TriggerMetadata::default())
        .await
        .unwrap();
    assert_eq!(
        scheduler.wait(&failed).await.unwrap().status,
        ExecutionStatus::Failed
    );

    let workspaces = harness.dir.path().join("workspaces");
    let leftovers: Vec<_> = std::fs::read_dir(&workspaces)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    assert_eq!(harness.orchestrator.tracked_state(), 0);
}
