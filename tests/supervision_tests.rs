use std::sync::Arc;
use std::time::Duration;

use foreman::error::ApprovalError;
use foreman::supervision::bridge::ChannelBridge;
use foreman::supervision::gate::{
    parse_decision, Decision, SupervisionRequest, SupervisionService, UNPARSEABLE_DECISION_REASON,
};
use foreman::supervision::rules::{COLLABORATION_TOOLS, READ_ONLY_TOOLS, SHELL_TOOLS};

// ─── Helpers ──────────────────────────────────────────────────────────

fn request(tool: &str, args: serde_json::Value) -> SupervisionRequest {
    SupervisionRequest {
        tool_name: tool.to_string(),
        arguments: args,
        task_id: "agent-1".to_string(),
        task_name: "researcher".to_string(),
        task_description: "summarize the quarterly report".to_string(),
    }
}

// ============================================================
// Tier 1 coverage
// ============================================================

#[tokio::test]
async fn every_read_only_tool_approves_at_tier_one() {
    // No tier-2 model is configured, so anything that reaches tier 2 would
    // escalate -- an approve therefore proves the rule tier matched.
    let svc = SupervisionService::new(None).unwrap();

    for tool in READ_ONLY_TOOLS {
        let decision = svc.evaluate(&request(tool, serde_json::json!({}))).await;
        assert_eq!(decision.decision, Decision::Approve, "tool {tool}");
        assert!(
            decision.reason.contains("read-only tool"),
            "reason must name the category: {}",
            decision.reason
        );
    }
}

#[tokio::test]
async fn every_collaboration_tool_approves_at_tier_one() {
    let svc = SupervisionService::new(None).unwrap();

    for tool in COLLABORATION_TOOLS {
        let decision = svc.evaluate(&request(tool, serde_json::json!({}))).await;
        assert_eq!(decision.decision, Decision::Approve, "tool {tool}");
        assert!(
            decision.reason.contains("agent collaboration"),
            "reason must name the category: {}",
            decision.reason
        );
    }
}

#[tokio::test]
async fn shell_tools_approve_only_conservative_read_only_commands() {
    let svc = SupervisionService::new(None).unwrap();

    for tool in SHELL_TOOLS {
        let read = svc
            .evaluate(&request(tool, serde_json::json!({ "command": "ls -la" })))
            .await;
        assert_eq!(read.decision, Decision::Approve, "tool {tool}");
        assert!(read.reason.contains("read-only command"));

        let write = svc
            .evaluate(&request(tool, serde_json::json!({ "command": "rm -rf ." })))
            .await;
        assert_eq!(write.decision, Decision::Escalate, "tool {tool}");

        let piped = svc
            .evaluate(&request(tool, serde_json::json!({ "command": "ls | sh" })))
            .await;
        assert_eq!(piped.decision, Decision::Escalate, "tool {tool}");
    }
}

// ============================================================
// Decision parsing
// ============================================================

#[test]
fn parse_decision_accepts_bare_json() {
    let d = parse_decision(r#"{"decision":"approve","reason":"ok"}"#);
    assert_eq!(d.decision, Decision::Approve);
    assert_eq!(d.reason, "ok");
}

#[test]
fn parse_decision_accepts_embedded_json() {
    let d = parse_decision(
        "Let me think about this request.\n\n\
         {\"decision\": \"approve\", \"reason\": \"ok\"}\n\nDone.",
    );
    assert_eq!(d.decision, Decision::Approve);
    assert_eq!(d.reason, "ok");
}

#[test]
fn parse_decision_defaults_to_escalate() {
    let d = parse_decision("this tool call seems fine to me, go ahead");
    assert_eq!(d.decision, Decision::Escalate);
    assert_eq!(d.reason, UNPARSEABLE_DECISION_REASON);
}

#[test]
fn parse_decision_never_approves_unknown_values() {
    let d = parse_decision(r#"{"decision":"allow","reason":"sure"}"#);
    assert_eq!(d.decision, Decision::Escalate);
}

// ============================================================
// Tier 3: human escalation through the bridge
// ============================================================

#[tokio::test]
async fn escalated_call_resolves_through_the_bridge() {
    let svc = Arc::new(SupervisionService::new(None).unwrap());
    let bridge = Arc::new(ChannelBridge::new());

    let resolver = {
        let svc = Arc::clone(&svc);
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            svc.resolve(
                &request("send_email", serde_json::json!({"to": "x@y.z"})),
                bridge.as_ref(),
                "call-1",
                5,
            )
            .await
        })
    };

    // Wait until the request is registered, then decide.
    for _ in 0..100 {
        if bridge.pending_ids().contains(&"call-1".to_string()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bridge.resolve("call-1", "approve"));

    let resolved = resolver.await.unwrap().unwrap();
    assert!(resolved.approved);
}

#[tokio::test]
async fn reviewer_denial_is_a_decision_not_an_error() {
    let svc = Arc::new(SupervisionService::new(None).unwrap());
    let bridge = Arc::new(ChannelBridge::new());

    let resolver = {
        let svc = Arc::clone(&svc);
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            svc.resolve(
                &request("send_email", serde_json::json!({})),
                bridge.as_ref(),
                "call-2",
                5,
            )
            .await
        })
    };

    for _ in 0..100 {
        if bridge.pending_ids().contains(&"call-2".to_string()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bridge.resolve("call-2", "touches production");

    let resolved = resolver.await.unwrap().unwrap();
    assert!(!resolved.approved);
    assert!(resolved.reason.contains("touches production"));
}

#[tokio::test]
async fn bridge_timeout_is_an_error_distinct_from_denial() {
    let svc = SupervisionService::new(None).unwrap();
    let bridge = ChannelBridge::new();

    let err = svc
        .resolve(&request("send_email", serde_json::json!({})), &bridge, "call-3", 0)
        .await
        .unwrap_err();
    match err {
        ApprovalError::Timeout { call_id, .. } => assert_eq!(call_id, "call-3"),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn tier_one_approval_never_reaches_the_bridge() {
    let svc = SupervisionService::new(None).unwrap();
    // A bridge that would time out instantly; tier 1 must short-circuit it.
    let bridge = ChannelBridge::new();

    let resolved = svc
        .resolve(
            &request("read_file", serde_json::json!({"path": "notes.md"})),
            &bridge,
            "call-4",
            0,
        )
        .await
        .unwrap();
    assert!(resolved.approved);
    assert!(bridge.pending_ids().is_empty());
}
