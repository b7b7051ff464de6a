//! Tests for the hook pipeline
//!
//! Registration order, short-circuiting, matchers, timeouts and the failure
//! policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kodegen_agent_sessions::hooks::{HookPipeline, HookRegistry};
use kodegen_agent_sessions::{
    EngineError, HookContext, HookEvent, HookFailurePolicy, HookInput, HookOutput, ToolName,
};
use serde_json::json;

fn input(event: HookEvent, tool: Option<&str>, payload: serde_json::Value) -> HookInput {
    HookInput {
        event,
        payload,
        correlation_id: Some("toolu_01".into()),
        context: HookContext {
            session_id: None,
            tool_name: tool.map(ToolName::new),
        },
    }
}

fn pipeline(registry: HookRegistry, policy: HookFailurePolicy) -> HookPipeline {
    HookPipeline::new(registry, Duration::from_secs(1), policy)
}

#[tokio::test]
async fn test_hooks_run_in_order_and_stop_short() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = HookRegistry::new();

    for (name, stop) in [("first", false), ("second", true), ("third", false)] {
        let calls = Arc::clone(&calls);
        registry.register(
            HookEvent::PreToolUse,
            None,
            name,
            HookRegistry::callback(move |_input| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(if stop {
                        HookOutput::stop("production namespace is off limits")
                    } else {
                        HookOutput::proceed()
                    })
                }
            }),
        );
    }

    let outcome = pipeline(registry, HookFailurePolicy::Continue)
        .run(input(HookEvent::PreToolUse, Some("Bash"), json!({"command": "ls"})))
        .await;

    assert!(!outcome.continue_execution);
    assert_eq!(
        outcome.stop_reason.as_deref(),
        Some("production namespace is off limits")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.invocations.len(), 2);
    assert_eq!(outcome.invocations[0].hook_name, "first");
    assert!(outcome.invocations[0].continued);
    assert!(!outcome.invocations[1].continued);
    assert_eq!(
        outcome.invocations[1].correlation_id.as_deref(),
        Some("toolu_01")
    );
}

#[tokio::test]
async fn test_matcher_scopes_tool_hooks() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::PreToolUse,
        Some("Bash|Write"),
        "shell-guard",
        HookRegistry::callback(|_| async { Ok(HookOutput::stop("blocked")) }),
    );

    let pipeline = pipeline(registry, HookFailurePolicy::Continue);

    let read = pipeline
        .run(input(HookEvent::PreToolUse, Some("Read"), json!({})))
        .await;
    assert!(read.continue_execution);
    assert!(read.invocations.is_empty());

    let write = pipeline
        .run(input(HookEvent::PreToolUse, Some("Write"), json!({})))
        .await;
    assert!(!write.continue_execution);

    // Other events of the same kind are not affected
    let post = pipeline
        .run(input(HookEvent::PostToolUse, Some("Bash"), json!({})))
        .await;
    assert!(post.invocations.is_empty());
}

#[tokio::test]
async fn test_non_tool_events_ignore_matchers() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::UserPromptSubmit,
        Some("Bash"),
        "audit",
        HookRegistry::callback(|_| async { Ok(HookOutput::proceed()) }),
    );

    let outcome = pipeline(registry, HookFailurePolicy::Continue)
        .run(input(HookEvent::UserPromptSubmit, None, json!({"prompt": "hi"})))
        .await;
    assert_eq!(outcome.invocations.len(), 1);
}

#[tokio::test]
async fn test_replacement_output_feeds_later_hooks() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::PreToolUse,
        None,
        "add-namespace",
        HookRegistry::callback(|input| async move {
            let command = input.payload["command"].as_str().unwrap_or_default();
            Ok(HookOutput::with_output(
                json!({"command": format!("{command} -n staging")}),
            ))
        }),
    );
    registry.register(
        HookEvent::PreToolUse,
        None,
        "check",
        HookRegistry::callback(|input| async move {
            assert_eq!(input.payload["command"], "kubectl get pods -n staging");
            Ok(HookOutput::proceed())
        }),
    );

    let outcome = pipeline(registry, HookFailurePolicy::Continue)
        .run(input(
            HookEvent::PreToolUse,
            Some("Bash"),
            json!({"command": "kubectl get pods"}),
        ))
        .await;

    assert!(outcome.continue_execution);
    assert_eq!(
        outcome.output,
        Some(json!({"command": "kubectl get pods -n staging"}))
    );
    assert_eq!(outcome.invocations[1].input["command"], "kubectl get pods -n staging");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_recorded_and_non_fatal_by_default() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::PostToolUse,
        None,
        "slow",
        HookRegistry::callback(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HookOutput::stop("never returned in time"))
        }),
    );

    let outcome = pipeline(registry, HookFailurePolicy::Continue)
        .run(input(HookEvent::PostToolUse, Some("Bash"), json!({})))
        .await;

    assert!(outcome.continue_execution);
    let invocation = &outcome.invocations[0];
    assert!(invocation.continued);
    assert!(invocation.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_failures_block_under_block_policy() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::PreToolUse,
        None,
        "broken",
        HookRegistry::callback(|_| async {
            Err::<HookOutput, _>(EngineError::hook("policy service unreachable"))
        }),
    );

    let lenient = pipeline(registry.clone(), HookFailurePolicy::Continue)
        .run(input(HookEvent::PreToolUse, Some("Bash"), json!({})))
        .await;
    assert!(lenient.continue_execution);
    assert!(lenient.invocations[0].error.is_some());

    let strict = pipeline(registry, HookFailurePolicy::Block)
        .run(input(HookEvent::PreToolUse, Some("Bash"), json!({})))
        .await;
    assert!(!strict.continue_execution);
    let reason = strict.stop_reason.unwrap();
    assert!(reason.contains("broken"), "{reason}");
}

#[tokio::test]
async fn test_panicking_hook_is_contained() {
    let mut registry = HookRegistry::new();
    registry.register(
        HookEvent::Stop,
        None,
        "explodes",
        HookRegistry::callback(|input| async move {
            if input.payload.is_object() {
                panic!("hook bug");
            }
            Ok(HookOutput::proceed())
        }),
    );
    registry.register(
        HookEvent::Stop,
        None,
        "after",
        HookRegistry::callback(|_| async { Ok(HookOutput::proceed()) }),
    );

    let outcome = pipeline(registry, HookFailurePolicy::Continue)
        .run(input(HookEvent::Stop, None, json!({})))
        .await;

    assert!(outcome.continue_execution);
    assert_eq!(outcome.invocations.len(), 2);
    assert!(outcome.invocations[0].error.as_deref().unwrap().contains("panicked"));
}
