//! Tests for the tool permission gate
//!
//! Pattern parsing, deny-wins ordering, scoped allow rules and the mode
//! fallbacks.

use kodegen_agent_sessions::permissions::{PermissionGate, ToolPattern, ToolScope};
use kodegen_agent_sessions::{EngineError, PermissionDecision, PermissionMode, ToolName};
use serde_json::json;

fn gate(allowed: &[&str], disallowed: &[&str], mode: PermissionMode) -> PermissionGate {
    let allowed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    let disallowed: Vec<String> = disallowed.iter().map(ToString::to_string).collect();
    PermissionGate::new(&allowed, &disallowed, mode).unwrap()
}

fn bash(command: &str) -> serde_json::Value {
    json!({ "command": command })
}

#[test]
fn test_kubectl_scoped_allow_rules() {
    let gate = gate(
        &["Read", "Bash(kubectl get:*)", "Bash(kubectl describe:*)"],
        &[],
        PermissionMode::Default,
    );
    let tool = ToolName::new("Bash");

    let get = gate.evaluate(&tool, &bash("kubectl get pods -n staging"));
    assert_eq!(get.decision, PermissionDecision::Allow);
    assert_eq!(get.matched_rule.as_deref(), Some("Bash(kubectl get:*)"));

    let describe = gate.evaluate(&tool, &bash("kubectl describe node worker-1"));
    assert_eq!(describe.decision, PermissionDecision::Allow);

    let delete = gate.evaluate(&tool, &bash("kubectl delete pod api-7d9f"));
    assert_eq!(delete.decision, PermissionDecision::Deny);
    assert!(
        delete.reason.contains("Bash invocation outside allowed scopes"),
        "unexpected reason: {}",
        delete.reason
    );
    assert!(delete.matched_rule.is_none());
}

#[test]
fn test_scoped_allow_denies_even_in_accept_edits_mode() {
    let gate = gate(&["Bash(kubectl get:*)"], &[], PermissionMode::AcceptEdits);
    let verdict = gate.evaluate(&ToolName::new("Bash"), &bash("rm -rf /"));
    assert_eq!(verdict.decision, PermissionDecision::Deny);

    // Other tools are unaffected by Bash scopes
    let verdict = gate.evaluate(&ToolName::new("Write"), &json!({"file_path": "a.txt"}));
    assert_eq!(verdict.decision, PermissionDecision::Allow);
}

#[test]
fn test_deny_wins_over_allow() {
    let gate = gate(&["Bash"], &["Bash(rm:*)"], PermissionMode::AcceptEdits);
    let tool = ToolName::new("Bash");

    let verdict = gate.evaluate(&tool, &bash("rm -rf target"));
    assert_eq!(verdict.decision, PermissionDecision::Deny);
    assert_eq!(verdict.matched_rule.as_deref(), Some("Bash(rm:*)"));

    let verdict = gate.evaluate(&tool, &bash("cargo build"));
    assert_eq!(verdict.decision, PermissionDecision::Allow);
    assert_eq!(verdict.matched_rule.as_deref(), Some("Bash"));
}

#[test]
fn test_wildcard_allow_and_deny() {
    let everything = gate(&["*"], &[], PermissionMode::Default);
    let verdict = everything.evaluate(&ToolName::new("WebFetch"), &json!({"url": "https://x"}));
    assert_eq!(verdict.decision, PermissionDecision::Allow);

    let nothing = gate(&["*"], &["*"], PermissionMode::Default);
    let verdict = nothing.evaluate(&ToolName::new("Read"), &json!({}));
    assert_eq!(verdict.decision, PermissionDecision::Deny);
}

#[test]
fn test_exact_scope_matches_only_that_command() {
    let gate = gate(&["Bash(npm test)"], &[], PermissionMode::Default);
    let tool = ToolName::new("Bash");

    assert_eq!(
        gate.evaluate(&tool, &bash("npm test")).decision,
        PermissionDecision::Allow
    );
    assert_eq!(
        gate.evaluate(&tool, &bash("npm test -- --watch")).decision,
        PermissionDecision::Deny
    );
}

#[test]
fn test_unmatched_tool_falls_back_to_mode() {
    let input = json!({"file_path": "notes.md"});
    let tool = ToolName::new("Write");

    let verdict = gate(&["Read"], &[], PermissionMode::Default).evaluate(&tool, &input);
    assert_eq!(verdict.decision, PermissionDecision::Ask);

    let verdict = gate(&["Read"], &[], PermissionMode::AcceptEdits).evaluate(&tool, &input);
    assert_eq!(verdict.decision, PermissionDecision::Allow);

    let verdict = gate(&["Read"], &[], PermissionMode::BypassPermissions).evaluate(&tool, &input);
    assert_eq!(verdict.decision, PermissionDecision::Deny);

    let verdict = gate(&["Read"], &[], PermissionMode::Plan).evaluate(&tool, &input);
    assert_eq!(verdict.decision, PermissionDecision::Deny);
}

#[test]
fn test_scoped_pattern_checks_path_arguments() {
    let gate = gate(&["Read(src/:*)"], &[], PermissionMode::Default);
    let tool = ToolName::new("Read");

    let inside = gate.evaluate(&tool, &json!({"file_path": "src/lib.rs"}));
    assert_eq!(inside.decision, PermissionDecision::Allow);

    let outside = gate.evaluate(&tool, &json!({"file_path": "/etc/passwd"}));
    assert_eq!(outside.decision, PermissionDecision::Deny);

    // No argument to check means the scope cannot match
    let missing = gate.evaluate(&tool, &json!({}));
    assert_eq!(missing.decision, PermissionDecision::Deny);
}

#[test]
fn test_pattern_parsing() {
    assert_eq!(ToolPattern::parse("*").unwrap(), ToolPattern::Any);
    assert_eq!(
        ToolPattern::parse(" Read ").unwrap(),
        ToolPattern::Tool("Read".into())
    );
    assert_eq!(
        ToolPattern::parse("Bash(*)").unwrap(),
        ToolPattern::Tool("Bash".into())
    );
    assert_eq!(
        ToolPattern::parse("Bash(git status:*)").unwrap(),
        ToolPattern::Scoped {
            tool: "Bash".into(),
            scope: ToolScope::Prefix("git status".into()),
        }
    );
    assert_eq!(
        ToolPattern::parse("Bash(git status:*)").unwrap().to_string(),
        "Bash(git status:*)"
    );
}

#[test]
fn test_malformed_patterns_are_validation_errors() {
    for raw in ["", "   ", "Bash(ls", "Bash)", "(ls)", "Bash(a(b))", "Bash(ls) extra"] {
        let err = ToolPattern::parse(raw).unwrap_err();
        assert!(
            matches!(err, EngineError::Validation(_)),
            "'{raw}' gave {err:?}"
        );
    }

    let err = PermissionGate::new(&["Bash(ls".to_string()], &[], PermissionMode::Default)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
