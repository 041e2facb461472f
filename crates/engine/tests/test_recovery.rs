//! Retry, pause/resume and compaction behavior of the orchestrator

use async_trait::async_trait;
use chrono::Local;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use relay_engine::{EngineSettings, Orchestrator, StopReason};
use relay_oracle::{CompletionRequest, Oracle, OracleError, OracleReply, ToolCall};
use relay_store::{
    CheckpointSnapshot, CheckpointStore, ErrorKind, HistoryItem, IterationOutcome,
    IterationRecord, PermissionTier, RecoveryAction, Task, TaskStatus, ToolExchange, ToolResult,
};

mock! {
    pub Oracle {}

    #[async_trait]
    impl Oracle for Oracle {
        async fn complete(&self, request: CompletionRequest) -> Result<OracleReply, OracleError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        max_iterations: 10,
        subagent_max_iterations: 5,
        compaction_threshold: 100,
        keep_recent: 4,
        max_active_bytes: 1_000_000,
        max_retries: 2,
        retry_backoff_ms: 10,
        tool_timeout_secs: 5,
        max_tool_output_bytes: 10_000,
        model: "test-model".to_string(),
    }
}

#[tokio::test]
async fn test_transient_tool_timeout_retries_then_escalates() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "exec",
            json!({ "command": "sleep 3" }),
        )]))
    });
    mock.expect_complete().times(1).returning(|request| {
        // After the retry budget the failure is surfaced, not retried again
        let tool_turn = request
            .messages
            .iter()
            .find(|m| m.role == "tool")
            .expect("failed tool result surfaced");
        assert!(tool_turn.content.as_deref().unwrap().contains("timed out"));

        // The escalation note travels in the next round
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(last.content.as_deref().unwrap().contains("exec"));

        Ok(OracleReply::final_answer("giving up on the slow command"))
    });

    let mut settings = settings();
    settings.tool_timeout_secs = 1;

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings);
    let outcome = orchestrator
        .start("run something slow", &work, PermissionTier::Elevated)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);

    // Two retries and one escalation, all for the same iteration
    let actions: Vec<RecoveryAction> = outcome.error_history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            RecoveryAction::Retry { attempt: 1 },
            RecoveryAction::Retry { attempt: 2 },
            RecoveryAction::Escalate,
        ]
    );
    assert!(outcome
        .error_history
        .iter()
        .all(|e| e.kind == ErrorKind::Transient && e.seq == 1));
}

#[tokio::test]
async fn test_transient_tool_failure_recovers_on_retry() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // The first run leaves a marker and overruns the timeout; the automatic
    // retry sees the marker and finishes immediately.
    let command = "if [ -f marker ]; then echo recovered; else touch marker; sleep 3; fi";

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(move |_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "exec",
            json!({ "command": command }),
        )]))
    });
    mock.expect_complete().times(1).returning(|request| {
        // The oracle sees the successful result, not the timeout, and no
        // escalation note follows it
        let tool_turn = request
            .messages
            .iter()
            .find(|m| m.role == "tool")
            .expect("tool result replayed");
        assert!(tool_turn.content.as_deref().unwrap().contains("recovered"));
        assert_eq!(request.messages.last().unwrap().role, "tool");

        Ok(OracleReply::final_answer("the command went through"))
    });

    let mut settings = settings();
    settings.tool_timeout_secs = 1;

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings);
    let outcome = orchestrator
        .start("run the flaky command", &work, PermissionTier::Elevated)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.iterations, 2);

    // Exactly one retry event, and the iteration itself recorded clean
    assert_eq!(outcome.error_history.len(), 1);
    let event = &outcome.error_history[0];
    assert_eq!(event.kind, ErrorKind::Transient);
    assert_eq!(event.action, RecoveryAction::Retry { attempt: 1 });
    assert_eq!(event.tool.as_deref(), Some("exec"));
    assert_eq!(event.seq, 1);

    let snapshot = store.load(&outcome.task_id).await.unwrap();
    snapshot.validate().unwrap();
    let record = snapshot
        .active_history
        .iter()
        .find_map(|item| match item {
            HistoryItem::Record(r) if r.seq == 1 => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(record.outcome, IterationOutcome::Ok);
    assert_eq!(record.tool_exchanges.len(), 1);
    assert!(record.tool_exchanges[0].result.success);

    // The command's side effect happened once
    assert!(work.join("marker").exists());
}

#[tokio::test]
async fn test_transient_oracle_failure_retries_in_place() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete()
        .times(2)
        .returning(|_| Err(OracleError::Unavailable("503".to_string())));
    mock.expect_complete()
        .times(1)
        .returning(|_| Ok(OracleReply::final_answer("back online")));

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("flaky oracle", &work, PermissionTier::Safe)
        .await
        .unwrap();

    // The retried oracle call produces no extra iterations
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.error_history.len(), 2);

    let snapshot = store.load(&outcome.task_id).await.unwrap();
    assert!(snapshot.recovery.is_none());
    snapshot.validate().unwrap();
}

#[tokio::test]
async fn test_oracle_retry_budget_exhaustion_fails_task() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete()
        .times(3)
        .returning(|_| Err(OracleError::RateLimited));

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("rate limited forever", &work, PermissionTier::Safe)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.stop_reason, StopReason::FatalError);
    assert_eq!(outcome.error_history.len(), 3);
}

#[tokio::test]
async fn test_pause_then_resume_without_rerunning_tools() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let cancel = CancellationToken::new();

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "exec",
            json!({ "command": "echo once >> log.txt" }),
        )]))
    });
    let cancel_in_mock = cancel.clone();
    mock.expect_complete().times(1).returning(move |_| {
        // Pause lands while the reply is in flight; its calls must not run
        cancel_in_mock.cancel();
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c2",
            "exec",
            json!({ "command": "echo twice >> log.txt" }),
        )]))
    });

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings())
        .with_cancellation(cancel.clone());
    let outcome = orchestrator
        .start("append to the log", &work, PermissionTier::Elevated)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Paused);
    assert_eq!(outcome.stop_reason, StopReason::Paused);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(
        std::fs::read_to_string(work.join("log.txt")).unwrap(),
        "once\n"
    );

    // Resume with a fresh orchestrator; history replays, nothing re-executes
    let mut resumed_mock = MockOracle::new();
    resumed_mock.expect_complete().times(1).returning(|request| {
        let tool_contents: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == "tool")
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert_eq!(tool_contents.len(), 2);
        assert!(tool_contents[1].contains("not executed"));
        assert!(request.messages.iter().any(|m| {
            m.role == "user"
                && m.content
                    .as_deref()
                    .map(|c| c.contains("interrupted by a pause request"))
                    .unwrap_or(false)
        }));
        Ok(OracleReply::final_answer("picked up where we left off"))
    });

    let resumed = Orchestrator::new(Arc::new(resumed_mock), store.clone(), settings());
    let final_outcome = resumed.resume(&outcome.task_id).await.unwrap();

    assert_eq!(final_outcome.status, TaskStatus::Completed);
    assert_eq!(final_outcome.iterations, 3);

    // Executed exactly once across both runs
    assert_eq!(
        std::fs::read_to_string(work.join("log.txt")).unwrap(),
        "once\n"
    );

    // Sequence numbers stay gapless across the restart
    let snapshot = store.load(&outcome.task_id).await.unwrap();
    snapshot.validate().unwrap();
    let seqs: Vec<u64> = snapshot
        .active_history
        .iter()
        .filter_map(|item| match item {
            HistoryItem::Record(r) => Some(r.seq),
            HistoryItem::Summary(_) => None,
        })
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_tool_error_note_survives_resume() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // A task paused right after an iteration whose tool calls failed
    let task = Task::new("fix the config", &work, PermissionTier::Safe);
    let task_id = task.task_id.clone();
    let mut snapshot = CheckpointSnapshot::new(task);
    snapshot.task.status = TaskStatus::Paused;
    snapshot.iteration_count = 1;
    snapshot.active_history.push(HistoryItem::Record(IterationRecord {
        seq: 1,
        request: String::new(),
        reply: Some("reading the config".to_string()),
        tool_exchanges: vec![ToolExchange {
            call: ToolCall::new("c1", "read_file", json!({ "path": "missing.txt" })),
            result: ToolResult::failure("no such file or directory", 3),
        }],
        timestamp: Local::now(),
        outcome: IterationOutcome::ToolError,
    }));
    store.save(&snapshot).await.unwrap();

    // The nudge is rebuilt from the checkpoint, not from in-memory state
    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|request| {
        let last = request.messages.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(last
            .content
            .as_deref()
            .unwrap()
            .contains("Tool calls failed in the last round: read_file"));

        Ok(OracleReply::final_answer("took a different approach"))
    });

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator.resume(&task_id).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.iterations, 2);

    // The note also lands in the next record's request
    let snapshot = store.load(&task_id).await.unwrap();
    snapshot.validate().unwrap();
    let record = snapshot
        .active_history
        .iter()
        .find_map(|item| match item {
            HistoryItem::Record(r) if r.seq == 2 => Some(r),
            _ => None,
        })
        .unwrap();
    assert!(record.request.contains("read_file"));
}

#[tokio::test]
async fn test_compaction_kicks_in_during_long_run() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete().times(5).returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "list_dir",
            json!({ "path": "." }),
        )]))
    });
    mock.expect_complete().times(1).returning(|request| {
        // By now the earliest iterations arrive as a summary turn
        assert!(request.messages.iter().any(|m| {
            m.role == "user"
                && m.content
                    .as_deref()
                    .map(|c| c.contains("[Progress summary, iterations 1-2]"))
                    .unwrap_or(false)
        }));
        Ok(OracleReply::final_answer("looked at everything"))
    });

    let mut settings = settings();
    settings.compaction_threshold = 3;
    settings.keep_recent = 1;

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings);
    let outcome = orchestrator
        .start("survey the directory repeatedly", &work, PermissionTier::Safe)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.iterations, 6);

    let snapshot = store.load(&outcome.task_id).await.unwrap();
    snapshot.validate().unwrap();

    let summaries: Vec<(u64, u64)> = snapshot
        .active_history
        .iter()
        .filter_map(|item| match item {
            HistoryItem::Summary(s) => Some((s.from_seq, s.to_seq)),
            HistoryItem::Record(_) => None,
        })
        .collect();
    assert_eq!(summaries, vec![(1, 2), (3, 4)]);

    // Replaced records stay addressable in the archive
    assert_eq!(snapshot.archive.len(), 4);
    assert_eq!(snapshot.iteration_count, 6);
}
