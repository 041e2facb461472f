//! Orchestrator lifecycle tests with a mock oracle

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use relay_engine::{EngineError, EngineSettings, Orchestrator, StopReason};
use relay_oracle::{
    CompletionRequest, Oracle, OracleError, OracleReply, ToolCall,
};
use relay_store::{CheckpointStore, ErrorKind, PermissionTier, TaskStatus};

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
async fn test_write_then_final_completes_task() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|request| {
        // Fresh task: system prompt plus the task description
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request
            .signatures
            .iter()
            .any(|s| s.name == "write_file"));
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "write_file",
            json!({ "path": "result.txt", "content": "42" }),
        )]))
    });
    mock.expect_complete().times(1).returning(|request| {
        // The tool result must be in the replayed conversation
        let tool_turn = request.messages.iter().find(|m| m.role == "tool");
        let tool_turn = tool_turn.expect("tool result turn present");
        assert!(tool_turn.content.as_deref().unwrap().contains("2 bytes"));
        Ok(OracleReply::final_answer("Wrote the answer to result.txt"))
    });

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("write the answer", &work, PermissionTier::Elevated)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.stop_reason, StopReason::OracleFinal);
    assert_eq!(outcome.iterations, 2);
    let summary = outcome.summary.unwrap();
    assert!(summary.contains("Wrote the answer"));
    assert!(summary.contains("result.txt"));
    assert_eq!(std::fs::read_to_string(work.join("result.txt")).unwrap(), "42");

    // The checkpoint records both iterations and the file ledger entry
    let snapshot = store.load(&outcome.task_id).await.unwrap();
    assert_eq!(snapshot.iteration_count, 2);
    snapshot.validate().unwrap();
    assert_eq!(snapshot.files.get("result.txt").unwrap().action, "created");
}

#[tokio::test]
async fn test_admin_tool_denied_at_safe_tier() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    std::fs::write(work.join("precious.txt"), "keep me").unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "remove_file",
            json!({ "path": "precious.txt" }),
        )]))
    });
    mock.expect_complete().times(1).returning(|request| {
        let tool_turn = request
            .messages
            .iter()
            .find(|m| m.role == "tool")
            .expect("denial surfaced as a tool result");
        assert!(tool_turn
            .content
            .as_deref()
            .unwrap()
            .contains("permission denied"));
        Ok(OracleReply::final_answer("Cannot delete at this tier."))
    });

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("delete the file", &work, PermissionTier::Safe)
        .await
        .unwrap();

    // Denied without executing: the file survives
    assert!(work.join("precious.txt").exists());
    assert_eq!(outcome.status, TaskStatus::Completed);

    let denial = outcome
        .error_history
        .iter()
        .find(|e| e.kind == ErrorKind::Permission)
        .expect("permission event recorded");
    assert_eq!(denial.tool.as_deref(), Some("remove_file"));
}

#[tokio::test]
async fn test_budget_exhaustion_fails_task() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // Never finishes: every round asks for another directory listing
    let mut mock = MockOracle::new();
    mock.expect_complete().returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "list_dir",
            json!({ "path": "." }),
        )]))
    });

    let mut settings = settings();
    settings.max_iterations = 3;

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings);
    let outcome = orchestrator
        .start("loop forever", &work, PermissionTier::Safe)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.failure_detail.unwrap().contains("budget"));

    let snapshot = store.load(&outcome.task_id).await.unwrap();
    assert_eq!(snapshot.task.status, TaskStatus::Failed);
    assert_eq!(snapshot.iteration_count, 3);
}

#[tokio::test]
async fn test_fatal_oracle_error_aborts() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete()
        .times(1)
        .returning(|_| Err(OracleError::NoApiKey));

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("anything", &work, PermissionTier::Safe)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.stop_reason, StopReason::FatalError);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.error_history.len(), 1);
    assert_eq!(outcome.error_history[0].kind, ErrorKind::Fatal);
}

#[tokio::test]
async fn test_status_reports_stored_state() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete().times(1).returning(|_| {
        Ok(OracleReply::calls(vec![ToolCall::new(
            "c1",
            "update_todos",
            json!({ "todos": [
                { "description": "first", "status": "done" },
                { "description": "second", "status": "pending" }
            ] }),
        )]))
    });
    mock.expect_complete()
        .times(1)
        .returning(|_| Ok(OracleReply::final_answer("done")));

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("plan and finish", &work, PermissionTier::Safe)
        .await
        .unwrap();

    let report = orchestrator.status(&outcome.task_id).await.unwrap();
    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.iteration_count, 2);
    assert_eq!(report.done_todos, 1);
    assert_eq!(report.open_todos, 1);
    assert_eq!(report.permission_level, PermissionTier::Safe);
}

#[tokio::test]
async fn test_resume_of_terminal_task_rejected() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    let mut mock = MockOracle::new();
    mock.expect_complete()
        .times(1)
        .returning(|_| Ok(OracleReply::final_answer("instantly done")));

    let orchestrator = Orchestrator::new(Arc::new(mock), store.clone(), settings());
    let outcome = orchestrator
        .start("quick", &work, PermissionTier::Safe)
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);

    let err = orchestrator.resume(&outcome.task_id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotResumable(_, _)));

    let err = orchestrator.resume("no-such-task").await.unwrap_err();
    assert!(matches!(err, EngineError::NotResumable(_, _)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_owner_rejected_while_running() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));

    // Seed a paused task directly in the store
    let task = relay_store::Task::new("shared", &work, PermissionTier::Safe);
    let task_id = task.task_id.clone();
    let mut snapshot = relay_store::CheckpointSnapshot::new(task);
    snapshot.task.status = TaskStatus::Paused;
    store.save(&snapshot).await.unwrap();

    // First resume holds ownership while its oracle call is in flight
    let mut slow = MockOracle::new();
    slow.expect_complete().times(1).returning(|_| {
        std::thread::sleep(std::time::Duration::from_millis(300));
        Ok(OracleReply::final_answer("finally"))
    });

    let first = Orchestrator::new(Arc::new(slow), store.clone(), settings());
    let first_id = task_id.clone();
    let handle = tokio::spawn(async move { first.resume(&first_id).await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let second = Orchestrator::new(Arc::new(MockOracle::new()), store.clone(), settings());
    let err = second.resume(&task_id).await.unwrap_err();
    assert!(matches!(err, EngineError::TaskOwned(_)));

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);

    // Ownership released at the end of the first run
    let report = second.status(&task_id).await.unwrap();
    assert_eq!(report.status, TaskStatus::Completed);
}
