//! Tests for stream consumption through a session
//!
//! Sequence numbering, partial chunks, tool call bookkeeping and the
//! permission audit trail.

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashMap;

use common::{
    Attempt, Harness, Step, assistant_text, can_use_tool, partial, result, success, system_init,
    tool_result, tool_use,
};
use kodegen_agent_sessions::{
    CreateSession, EngineError, HookEvent, HookOutput, HookRegistry, MessageType, PageRequest,
    PermissionDecision, PermissionMode, SessionConfig, SessionEvent, SessionStatus,
    ToolAuthorization, ToolCallStatus,
};
use serde_json::json;

#[tokio::test]
async fn test_sequence_numbers_are_gap_free_across_queries() {
    let harness = Harness::new(vec![
        Attempt::Stream(success("first")),
        Attempt::Stream(success("second")),
    ]);
    let session = harness
        .orchestrator
        .create(CreateSession::default())
        .await
        .unwrap();

    for prompt in ["one", "two"] {
        harness
            .orchestrator
            .query(&session.id, prompt, &HashMap::new())
            .await
            .unwrap();
    }

    let messages = harness
        .orchestrator
        .messages(&session.id, PageRequest::all())
        .await
        .unwrap();
    let sequence: Vec<u64> = messages.items.iter().map(|m| m.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(messages.total, 6);

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.metrics.total_messages, 6);
    assert_eq!(session.metrics.input_tokens, 200);
    assert_eq!(session.metrics.output_tokens, 80);
    assert!((session.metrics.total_cost_usd - 0.025).abs() < 1e-9);
    assert_eq!(session.sdk_session_id.as_ref().unwrap().as_str(), common::SDK_SESSION);
}

#[tokio::test]
async fn test_partials_point_at_their_final_message() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        partial("Pods "),
        partial("look healthy"),
        assistant_text("Pods look healthy"),
        result("Pods look healthy"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder().include_partial_messages(true).build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    let summary = harness
        .orchestrator
        .query(&session.id, "status?", &HashMap::new())
        .await
        .unwrap();
    assert_eq!(summary.partial_messages, 2);
    assert_eq!(summary.messages, 3);

    let messages = harness
        .orchestrator
        .messages(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items;
    assert_eq!(messages.len(), 5);

    let final_assistant = &messages[3];
    assert!(!final_assistant.is_partial);
    assert_eq!(final_assistant.message_type, MessageType::Assistant);
    assert_eq!(final_assistant.model.as_deref(), Some("claude-sonnet-4-5"));
    for chunk in &messages[1..3] {
        assert!(chunk.is_partial);
        assert_eq!(chunk.parent_message_id.as_ref(), Some(&final_assistant.id));
        assert!(chunk.sequence_number < final_assistant.sequence_number);
    }

    // Partial chunks do not count as messages
    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.metrics.total_messages, 3);
}

#[tokio::test]
async fn test_allowed_and_denied_tool_calls() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        tool_use("toolu_get", "Bash", json!({"command": "kubectl get pods"})),
        can_use_tool("req-1", Some("toolu_get"), "Bash", json!({"command": "kubectl get pods"})),
        tool_result("toolu_get", "api-7d9f   Running", false),
        tool_use("toolu_del", "Bash", json!({"command": "kubectl delete pod api-7d9f"})),
        can_use_tool("req-2", None, "Bash", json!({"command": "kubectl delete pod api-7d9f"})),
        assistant_text("I am not allowed to delete pods."),
        result("done"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder()
                .allowed_tool("Read")
                .allowed_tool("Bash(kubectl get:*)")
                .allowed_tool("Bash(kubectl describe:*)")
                .build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    let summary = harness
        .orchestrator
        .query(&session.id, "clean up staging", &HashMap::new())
        .await
        .unwrap();
    assert_eq!(summary.tool_calls, 2);
    assert_eq!(summary.denied_tool_calls, 1);

    let calls = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items;
    assert_eq!(calls.len(), 2);

    let get = calls.iter().find(|c| c.tool_use_id == "toolu_get").unwrap();
    assert_eq!(get.status, ToolCallStatus::Completed);
    assert_eq!(get.permission_decision, Some(PermissionDecision::Allow));
    assert_eq!(get.output, Some(json!("api-7d9f   Running")));
    assert!(get.duration_ms.is_some());

    let delete = calls.iter().find(|c| c.tool_use_id == "toolu_del").unwrap();
    assert_eq!(delete.status, ToolCallStatus::Denied);
    assert_eq!(delete.permission_decision, Some(PermissionDecision::Deny));
    assert!(delete.reason.as_deref().unwrap().contains("outside allowed scopes"));

    // A denial is an outcome, not a failure
    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.metrics.total_tool_calls, 2);
    assert_eq!(session.metrics.total_errors, 0);

    let responses = harness.counters().responses.lock().clone();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].0, "req-1");
    assert!(responses[0].1.is_allowed());
    assert_eq!(responses[1].0, "req-2");
    assert!(matches!(responses[1].1, ToolAuthorization::Deny { .. }));

    // Control traffic is not part of the conversation
    let messages = harness
        .orchestrator
        .messages(&session.id, PageRequest::all())
        .await
        .unwrap();
    assert_eq!(messages.total, 6);

    let decisions = harness
        .orchestrator
        .permission_decisions(&session.id)
        .await
        .unwrap();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[1].decision, PermissionDecision::Deny);
    assert_eq!(decisions[1].tool_use_id, "toolu_del");
}

#[tokio::test]
async fn test_pre_tool_hook_stop_denies_without_running() {
    let mut hooks = HookRegistry::new();
    hooks.register(
        HookEvent::PreToolUse,
        Some("Bash"),
        "no-prod",
        HookRegistry::callback(|input| async move {
            let command = input.payload["command"].as_str().unwrap_or_default();
            Ok(if command.contains("production") {
                HookOutput::stop("production is read-only")
            } else {
                HookOutput::proceed()
            })
        }),
    );
    let post_calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counted = std::sync::Arc::clone(&post_calls);
    hooks.register(
        HookEvent::PostToolUse,
        None,
        "count",
        HookRegistry::callback(move |_| {
            let counted = std::sync::Arc::clone(&counted);
            async move {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(HookOutput::proceed())
            }
        }),
    );

    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        tool_use(
            "toolu_1",
            "Bash",
            json!({"command": "kubectl -n production rollout restart deploy/api"}),
        ),
        result("stopped"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder()
                .allowed_tool("Bash")
                .hooks(hooks)
                .build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .query(&session.id, "restart api", &HashMap::new())
        .await
        .unwrap();

    let calls = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items;
    assert_eq!(calls[0].status, ToolCallStatus::Denied);
    assert_eq!(calls[0].permission_decision, Some(PermissionDecision::Deny));
    assert_eq!(calls[0].reason.as_deref(), Some("production is read-only"));
    assert_eq!(post_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let hook_log = harness.orchestrator.hook_executions(&session.id).await.unwrap();
    let pre: Vec<_> = hook_log
        .iter()
        .filter(|r| r.event == HookEvent::PreToolUse)
        .collect();
    assert_eq!(pre.len(), 1);
    assert!(!pre[0].continued);
    assert_eq!(pre[0].tool_use_id.as_deref(), Some("toolu_1"));
}

#[tokio::test]
async fn test_failed_tool_result_counts_as_error() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        tool_use("toolu_1", "Read", json!({"file_path": "missing.txt"})),
        tool_result("toolu_1", "file not found", true),
        result("could not read"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder()
                .permission_mode(PermissionMode::AcceptEdits)
                .build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    let summary = harness
        .orchestrator
        .query(&session.id, "read it", &HashMap::new())
        .await
        .unwrap();
    assert_eq!(summary.failed_tool_calls, 1);

    let call = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items
        .remove(0);
    assert_eq!(call.status, ToolCallStatus::Failed);
    assert_eq!(call.error_message.as_deref(), Some("file not found"));

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.metrics.total_errors, 1);
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_stream_without_result_is_retried_and_open_calls_fail() {
    let harness = Harness::new(vec![
        Attempt::Stream(vec![
            system_init(),
            tool_use("toolu_1", "Read", json!({"file_path": "a.txt"})),
        ]),
        Attempt::Stream(success("ok")),
    ]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder().allowed_tool("Read").build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .query(&session.id, "read", &HashMap::new())
        .await
        .unwrap();

    let call = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items
        .remove(0);
    assert_eq!(call.status, ToolCallStatus::Failed);
    assert!(call.completed_at.is_some());

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.metrics.total_retries, 1);
}

#[tokio::test]
async fn test_subscribers_see_events_in_sequence_order() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        partial("a"),
        assistant_text("ab"),
        result("ab"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession::default())
        .await
        .unwrap();
    let mut events = harness.orchestrator.subscribe(&session.id).await.unwrap();

    harness
        .orchestrator
        .query(&session.id, "go", &HashMap::new())
        .await
        .unwrap();

    let mut sequence = Vec::new();
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::MessageAppended { message } => sequence.push(message.sequence_number),
            SessionEvent::StatusChanged { to, .. } => statuses.push(to),
            _ => {}
        }
    }
    assert_eq!(sequence, vec![1, 2, 3, 4]);
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Connecting,
            SessionStatus::Active,
            SessionStatus::Processing,
            SessionStatus::Active,
        ]
    );
}

#[tokio::test]
async fn test_invalid_template_is_rejected_before_any_attempt() {
    let harness = Harness::new(vec![]);
    let session = harness
        .orchestrator
        .create(CreateSession::default())
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .query(&session.id, "Deploy {{service}}", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(harness.counters().created(), 0);

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Created);

    let mut variables = HashMap::new();
    variables.insert("service".to_string(), "billing".to_string());
    harness
        .orchestrator
        .query(&session.id, "Deploy {{service}}", &variables)
        .await
        .unwrap();
    assert_eq!(
        harness.counters().prompts.lock().as_slice(),
        ["Deploy billing".to_string()]
    );
}

#[tokio::test]
async fn test_error_result_does_not_fail_the_session() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        Step::Message(common::message(json!({
            "type": "result",
            "subtype": "error_max_turns",
            "duration_ms": 10,
            "is_error": true,
            "num_turns": 5,
            "session_id": common::SDK_SESSION,
        }))),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession::default())
        .await
        .unwrap();

    let summary = harness
        .orchestrator
        .query(&session.id, "loop", &HashMap::new())
        .await
        .unwrap();
    assert!(summary.is_error);

    let session = harness.orchestrator.get(&session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.metrics.total_errors, 1);
    assert!(session.error_message.unwrap().contains("error_max_turns"));
}

#[tokio::test]
async fn test_unannounced_permission_prompt_is_gated() {
    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        can_use_tool("req-7", Some("toolu_n"), "Bash", json!({"command": "kubectl get nodes"})),
        Step::Message(common::message(json!({
            "type": "control_request",
            "request_id": "req-8",
            "request": {"subtype": "hook_callback", "callback_id": "hook_0", "input": {}},
        }))),
        tool_result("toolu_n", "node-1   Ready", false),
        result("1 node"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder()
                .allowed_tool("Bash(kubectl get:*)")
                .build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .query(&session.id, "nodes?", &HashMap::new())
        .await
        .unwrap();

    let responses = harness.counters().responses.lock().clone();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, "req-7");
    assert!(responses[0].1.is_allowed());
    assert_eq!(harness.counters().rejections.lock().as_slice(), ["req-8".to_string()]);

    let calls = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_use_id, "toolu_n");
    assert!(calls[0].message_id.is_none());
    assert_eq!(calls[0].status, ToolCallStatus::Completed);

    let decisions = harness
        .orchestrator
        .permission_decisions(&session.id)
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, PermissionDecision::Allow);
    assert_eq!(decisions[0].matched_rule.as_deref(), Some("Bash(kubectl get:*)"));
}

#[tokio::test]
async fn test_decision_records_the_rewritten_input() {
    let mut hooks = HookRegistry::new();
    hooks.register(
        HookEvent::PreToolUse,
        Some("Bash"),
        "read-only",
        HookRegistry::callback(|input| async move {
            let command = input.payload["command"].as_str().unwrap_or_default();
            Ok(HookOutput::with_output(json!({
                "command": command.replacen("kubectl delete", "kubectl get", 1),
            })))
        }),
    );

    let harness = Harness::new(vec![Attempt::Stream(vec![
        system_init(),
        tool_use("toolu_1", "Bash", json!({"command": "kubectl delete pod api-7d9f"})),
        can_use_tool("req-1", Some("toolu_1"), "Bash", json!({"command": "kubectl delete pod api-7d9f"})),
        tool_result("toolu_1", "api-7d9f   Running", false),
        result("looked instead"),
    ])]);
    let session = harness
        .orchestrator
        .create(CreateSession {
            config: SessionConfig::builder()
                .allowed_tool("Bash(kubectl get:*)")
                .hooks(hooks)
                .build(),
            ..CreateSession::default()
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .query(&session.id, "delete the pod", &HashMap::new())
        .await
        .unwrap();

    let rewritten = json!({"command": "kubectl get pod api-7d9f"});
    let decision = harness
        .orchestrator
        .permission_decisions(&session.id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(decision.final_decision, PermissionDecision::Allow);
    assert_eq!(decision.input, rewritten);

    let call = harness
        .orchestrator
        .tool_calls(&session.id, PageRequest::all())
        .await
        .unwrap()
        .items
        .remove(0);
    assert_eq!(call.input, rewritten);

    let responses = harness.counters().responses.lock().clone();
    match &responses[0].1 {
        ToolAuthorization::Allow { updated_input } => {
            assert_eq!(updated_input.as_ref(), Some(&rewritten));
        }
        other => panic!("expected allow, got {other:?}"),
    }
}
