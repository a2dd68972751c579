use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use foreman::config::EngineConfig;
use foreman::error::RecoveryError;
use foreman::history::jsonl::JsonlHistoryLog;
use foreman::history::{replay, HistoryLog, HistoryRecord, CONTINUATION_NOTICE};
use foreman::message::{AgentMessage, ApprovalState, MessagePart, Role};
use foreman::orchestration::manager::AgentManager;
use foreman::orchestration::types::{AgentStatus, SpawnContext};
use foreman::orchestration::EngineServices;
use foreman::runner::{RunnerEvent, ToolLoopRunner};
use foreman::sink::NullSink;
use foreman::supervision::bridge::ChannelBridge;
use foreman::supervision::gate::SupervisionService;

// ─── Helpers ──────────────────────────────────────────────────────────

struct SilentRunner;

impl ToolLoopRunner for SilentRunner {
    fn run(
        &self,
        _messages: Vec<AgentMessage>,
        _ctx: SpawnContext,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, RunnerEvent> {
        stream::iter(vec![RunnerEvent::Finished { parts: Vec::new() }]).boxed()
    }
}

fn manager_with_log(log: Arc<JsonlHistoryLog>) -> AgentManager {
    AgentManager::new(
        "s1",
        &EngineServices {
            runner: Arc::new(SilentRunner),
            history: log,
            supervisor: Arc::new(SupervisionService::new(None).unwrap()),
            bridge: Arc::new(ChannelBridge::new()),
            preface_model: None,
            config: EngineConfig::default(),
        },
    )
}

fn ctx() -> SpawnContext {
    SpawnContext::new("s1", Arc::new(NullSink))
}

fn message(id: &str, role: Role, secs: i64, parts: Vec<MessagePart>) -> AgentMessage {
    AgentMessage {
        id: id.to_string(),
        role,
        parts,
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

fn text(t: &str) -> Vec<MessagePart> {
    vec![MessagePart::Text { text: t.to_string() }]
}

async fn write_base_log(log: &JsonlHistoryLog, agent_id: &str, tail: Vec<HistoryRecord>) {
    let records = vec![
        HistoryRecord::Metadata {
            agent_id: agent_id.to_string(),
            name: "archivist".to_string(),
            task: "organize the files".to_string(),
            preface: Some("Starting on the files now.".to_string()),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        },
        HistoryRecord::Message {
            message: message("m-user", Role::User, 1, text("organize the files")),
        },
    ];
    for record in records.into_iter().chain(tail) {
        log.append("s1", agent_id, &record).await.unwrap();
    }
}

// ============================================================
// Replay from a JSONL log
// ============================================================

#[tokio::test]
async fn resume_reconstructs_an_agent_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlHistoryLog::new(tmp.path()));
    write_base_log(
        &log,
        "agent-1",
        vec![HistoryRecord::Message {
            message: message("m-reply", Role::Assistant, 2, text("done, all sorted")),
        }],
    )
    .await;

    let manager = manager_with_log(Arc::clone(&log));
    manager.resume("agent-1", ctx()).await.unwrap();

    let snapshot = manager.snapshot("agent-1").unwrap();
    assert!(snapshot.resumed_from_log);
    assert_eq!(snapshot.name, "archivist");
    assert_eq!(snapshot.task, "organize the files");

    let outcome = manager
        .wait(&["agent-1".to_string()], Duration::from_secs(2))
        .await;
    assert!(outcome.statuses["agent-1"].is_terminal());

    let history = manager.history_of("agent-1").unwrap();
    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(&ids[..2], &["m-user", "m-reply"]);
}

#[tokio::test]
async fn resume_sanitizes_a_dangling_approval() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlHistoryLog::new(tmp.path()));
    write_base_log(
        &log,
        "agent-1",
        vec![HistoryRecord::Message {
            message: message(
                "m-gated",
                Role::Assistant,
                2,
                vec![MessagePart::ToolCall {
                    call_id: "call-9".to_string(),
                    tool_name: "send_email".to_string(),
                    arguments: serde_json::json!({"to": "ceo@example.com"}),
                    approval: ApprovalState::Pending,
                }],
            ),
        }],
    )
    .await;

    let manager = manager_with_log(Arc::clone(&log));
    manager.resume("agent-1", ctx()).await.unwrap();

    let history = manager.history_of("agent-1").unwrap();
    let gated = history.iter().find(|m| m.id == "m-gated").unwrap();
    match &gated.parts[0] {
        MessagePart::ToolCall { approval, .. } => {
            assert!(
                matches!(approval, ApprovalState::Denied { .. }),
                "dangling call must be denied, got {approval:?}"
            )
        }
        _ => panic!("expected tool call part"),
    }
    assert!(
        history
            .iter()
            .any(|m| m.role == Role::System && m.text() == CONTINUATION_NOTICE),
        "a continuation notice must be appended"
    );

    // The repair is persisted: replaying the log afresh shows the denial.
    let replayed = replay(log.read_all("s1", "agent-1").await.unwrap()).unwrap();
    let gated = replayed.messages.iter().find(|m| m.id == "m-gated").unwrap();
    match &gated.parts[0] {
        MessagePart::ToolCall { approval, .. } => {
            assert!(matches!(approval, ApprovalState::Denied { .. }))
        }
        _ => panic!("expected tool call part"),
    }
}

#[tokio::test]
async fn resumed_agent_transitions_back_to_running() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlHistoryLog::new(tmp.path()));
    write_base_log(&log, "agent-1", Vec::new()).await;

    let manager = manager_with_log(Arc::clone(&log));
    manager.resume("agent-1", ctx()).await.unwrap();

    // Running immediately after resume; the scheduled cycle has not had a
    // chance to complete yet on this single-threaded test runtime.
    assert_eq!(
        manager.snapshot("agent-1").unwrap().status,
        AgentStatus::Running
    );
}

// ============================================================
// Recovery failure modes
// ============================================================

#[tokio::test]
async fn resume_with_no_log_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = manager_with_log(Arc::new(JsonlHistoryLog::new(tmp.path())));

    match manager.resume("ghost", ctx()).await {
        Err(RecoveryError::NotFound { id }) => assert_eq!(id, "ghost"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_with_corrupt_log_is_unreadable() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlHistoryLog::new(tmp.path()));
    write_base_log(&log, "agent-1", Vec::new()).await;

    let path = tmp.path().join("s1").join("agent-1.jsonl");
    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push_str("{broken\n");
    std::fs::write(&path, contents).unwrap();

    let manager = manager_with_log(Arc::clone(&log));
    match manager.resume("agent-1", ctx()).await {
        Err(RecoveryError::Unreadable { id, .. }) => assert_eq!(id, "agent-1"),
        other => panic!("expected Unreadable, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_log_without_metadata_is_unreadable() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlHistoryLog::new(tmp.path()));
    log.append(
        "s1",
        "agent-1",
        &HistoryRecord::Message {
            message: message("m-1", Role::User, 1, text("hello")),
        },
    )
    .await
    .unwrap();

    let manager = manager_with_log(Arc::clone(&log));
    assert!(matches!(
        manager.resume("agent-1", ctx()).await,
        Err(RecoveryError::Unreadable { .. })
    ));
}
