//! End-to-end scenarios driving the public `Orchestrator`/`PatchEngine`/
//! `ConsultationHandler` surface the way a real deployment would wire it:
//! one schedule-selection model, one process-selection model, a
//! `ProcessExecutor` stub standing in for the Agent, and an on-disk
//! `SessionStore`. Each test below exercises one of the session-level
//! behaviors the core promises: rejecting an empty prompt, running the
//! full five-schedule cycle to prompt termination, refusing a forbidden
//! process jump, rolling back an aborted patch batch, falling back to an
//! AI substitute when no human answers a mandatory consultation, and
//! freezing/resuming a session across a failed process.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use tandem_orchestrator::action::{Action, ActionId, ActionKind, ActionOutcome};
use tandem_orchestrator::agent::ActionTrace;
use tandem_orchestrator::config::OrchestratorConfig;
use tandem_orchestrator::consultation::{
    ConsultationHandler, ConsultationOptions, InputSource, NullCountdownObserver,
};
use tandem_orchestrator::errors::{ErrorCode, OrchestrationError};
use tandem_orchestrator::inference::{CompletionRequest, InferenceClient, InferenceError, StreamChunk};
use tandem_orchestrator::model_coordinator::ModelCoordinator;
use tandem_orchestrator::orchestrator::{
    NullObservers, Orchestrator, ProcessExecutor, SessionView, StartError, TerminationOutcome,
};
use tandem_orchestrator::patch_engine::{PatchEngine, PatchError, PatchOp, TransactionMode};
use tandem_orchestrator::session::{NoteSource, NoteStream, ProcessId, ScheduleId};
use tandem_orchestrator::store::SessionStore;

/// Every `execute()` call succeeds with a single `Complete` action -- stands
/// in for an Agent that never needs more than one turn per process.
struct AlwaysCompleteExecutor;

#[async_trait]
impl ProcessExecutor for AlwaysCompleteExecutor {
    async fn execute(
        &self,
        schedule: ScheduleId,
        process: ProcessId,
        _view: SessionView<'_>,
        _cancel: &CancellationToken,
    ) -> Result<ActionTrace, OrchestrationError> {
        let mut action = Action::new(ActionId(1), ActionKind::Complete, schedule, process);
        action.outcome = Some(ActionOutcome::Succeeded);
        Ok(ActionTrace {
            actions: vec![action],
            completed: true,
        })
    }
}

/// Fails exactly once, the first time it is asked to run `schedule`/`process`,
/// then behaves like `AlwaysCompleteExecutor` forever after -- models a
/// transient agent failure that a human's Retry should clear.
struct FailOnceExecutor {
    target: (ScheduleId, ProcessId),
    fired: std::sync::atomic::AtomicBool,
}

impl FailOnceExecutor {
    fn new(target: (ScheduleId, ProcessId)) -> Self {
        Self {
            target,
            fired: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProcessExecutor for FailOnceExecutor {
    async fn execute(
        &self,
        schedule: ScheduleId,
        process: ProcessId,
        view: SessionView<'_>,
        cancel: &CancellationToken,
    ) -> Result<ActionTrace, OrchestrationError> {
        if (schedule, process) == self.target && !self.fired.swap(true, Ordering::SeqCst) {
            return Err(OrchestrationError::UnknownAction("frobnicate".into()));
        }
        AlwaysCompleteExecutor.execute(schedule, process, view, cancel).await
    }
}

/// A schedule/process-selection model that always picks the furthest
/// admissible option -- forces the Knowledge/Plan/Implement/Scale/Production
/// cycle to run each process exactly once per schedule before terminating,
/// and agrees to prompt termination once asked.
struct GreedyModel;

#[async_trait]
impl InferenceClient for GreedyModel {
    async fn stream_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<
        futures::stream::BoxStream<'static, Result<StreamChunk, InferenceError>>,
        InferenceError,
    > {
        use futures::stream;
        Ok(Box::pin(stream::empty()))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if prompt.contains("Should the session terminate now") {
            return Ok("yes".to_string());
        }
        if prompt.contains("Choose the next schedule") {
            // Force the fallback to `ProcessNavigator::least_run_schedule`,
            // which already implements the lowest-count/ascending-id rule.
            return Ok(String::new());
        }
        if prompt.contains("Choose exactly one of") {
            if prompt.contains("TerminateSchedule") {
                return Ok("terminate".to_string());
            }
            if prompt.contains("Run(P3)") {
                return Ok("p3".to_string());
            }
            if prompt.contains("Run(P2)") {
                return Ok("p2".to_string());
            }
            return Ok("p1".to_string());
        }
        Ok(String::new())
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Always asks for the furthest process, just like `GreedyModel`, but the
/// very first process-selection answer for *any* schedule is "p3" -- the
/// one transition spec.md §4.1 forbids from a fresh schedule entry once
/// `p_last` becomes `P1`.
struct ForbiddenJumpModel {
    process_queries: AtomicUsize,
}

impl ForbiddenJumpModel {
    fn new() -> Self {
        Self {
            process_queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceClient for ForbiddenJumpModel {
    async fn stream_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<
        futures::stream::BoxStream<'static, Result<StreamChunk, InferenceError>>,
        InferenceError,
    > {
        use futures::stream;
        Ok(Box::pin(stream::empty()))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if prompt.contains("Choose the next schedule") {
            return Ok(String::new());
        }
        if prompt.contains("Choose exactly one of") {
            let n = self.process_queries.fetch_add(1, Ordering::SeqCst);
            // First query per run: accept the only admissible process (P1)
            // so the session has a `p_last` to violate next. Every query
            // after that jumps straight to P3, which is forbidden once
            // `p_last` is `P1`.
            return Ok(if n == 0 { "p1".to_string() } else { "p3".to_string() });
        }
        Ok("yes".to_string())
    }

    async fn ping(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

fn orchestrator_for<'a>(
    store: SessionStore,
    workspace_root: &Path,
    executor: Arc<dyn ProcessExecutor>,
    model: &'a dyn InferenceClient,
    coordinator: &'a ModelCoordinator,
) -> Orchestrator<'a> {
    Orchestrator::new(
        OrchestratorConfig::default(),
        store,
        workspace_root.to_path_buf(),
        executor,
        model,
        coordinator,
        None,
        Arc::new(NullObservers),
    )
}

/// Scenario 1 (spec.md §8): an empty prompt is rejected before any session
/// directory is created.
#[tokio::test]
async fn empty_prompt_is_rejected_with_no_session_directory() {
    let sessions_root = tempdir().unwrap();
    let workspace = tempdir().unwrap();
    let store = SessionStore::new(sessions_root.path(), "s-empty");
    let model = GreedyModel;
    let coordinator = ModelCoordinator::new();
    let orchestrator = orchestrator_for(
        store,
        workspace.path(),
        Arc::new(AlwaysCompleteExecutor),
        &model,
        &coordinator,
    );

    let result = orchestrator.run("   ", CancellationToken::new()).await;
    assert!(matches!(result, Err(StartError::EmptyPrompt)));
    assert!(!sessions_root.path().join("s-empty").exists());
}

/// Scenario 2 (spec.md §8): all five schedules run their three processes in
/// order, the session terminates normally, and the restoration artifacts
/// (`restore.sh`, `states/recurrence.json`) land on disk.
#[tokio::test]
async fn five_schedule_happy_path_terminates_with_full_flow_code() {
    let sessions_root = tempdir().unwrap();
    let workspace = tempdir().unwrap();
    let store = SessionStore::new(sessions_root.path(), "s-happy");
    let model = GreedyModel;
    let coordinator = ModelCoordinator::new();
    let orchestrator = orchestrator_for(
        store,
        workspace.path(),
        Arc::new(AlwaysCompleteExecutor),
        &model,
        &coordinator,
    );

    let outcome = orchestrator
        .run("build the thing", CancellationToken::new())
        .await
        .unwrap();

    let session = match outcome {
        TerminationOutcome::Completed(session) => session,
        other => panic!("expected normal completion, got {other:?}"),
    };
    assert_eq!(
        session.flow_code,
        "S1P1P2P3S2P1P2P3S3P1P2P3S4P1P2P3S5P1P2P3"
    );
    assert_eq!(session.states.len(), 15);

    let root = sessions_root.path().join("s-happy");
    let restore_script = root.join("restore.sh");
    assert!(restore_script.exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&restore_script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "restore.sh must be executable");
    }

    let recurrence_path = root.join("states/recurrence.json");
    assert!(recurrence_path.exists());
    let recurrence: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&recurrence_path).unwrap()).unwrap();
    assert_eq!(recurrence.len(), 15);
}

/// Scenario 3 (spec.md §8, §4.1): a forbidden P1 -> P3 jump is rejected,
/// retried once with the same admissible set, and suspends with E001 when
/// the model repeats the violation.
#[tokio::test]
async fn forbidden_process_jump_suspends_with_e001() {
    let sessions_root = tempdir().unwrap();
    let workspace = tempdir().unwrap();
    let store = SessionStore::new(sessions_root.path(), "s-forbidden");
    let model = ForbiddenJumpModel::new();
    let coordinator = ModelCoordinator::new();
    let orchestrator = orchestrator_for(
        store,
        workspace.path(),
        Arc::new(AlwaysCompleteExecutor),
        &model,
        &coordinator,
    );

    let outcome = orchestrator
        .run("build the thing", CancellationToken::new())
        .await
        .unwrap();

    let (session, suspension) = match outcome {
        TerminationOutcome::Suspended(session, suspension) => (*session, suspension),
        other => panic!("expected suspension, got {other:?}"),
    };
    assert_eq!(suspension.code, ErrorCode::E001);
    assert!(suspension.recoverable);
    assert_eq!(session.flow_code, "S1P1X");
    assert!(session.is_suspended());
}

/// Scenario 4 (spec.md §8, §4.3): a batch containing an absolute path fails
/// validation before backup or apply, so neither earlier op in the batch
/// lands and the backup directory stays untouched.
#[tokio::test]
async fn patch_batch_rolls_back_before_any_file_is_written() {
    let workspace = tempdir().unwrap();
    let backups = tempdir().unwrap();
    let engine = PatchEngine::new(workspace.path(), backups.path());

    let ops = vec![
        PatchOp::new(ActionKind::CreateFile {
            path: "a.txt".into(),
            content: "hello".into(),
        }),
        PatchOp::new(ActionKind::CreateFile {
            path: "b.txt".into(),
            content: "world".into(),
        }),
        PatchOp::new(ActionKind::EditFile {
            path: "/forbidden/x".into(),
            content: "nope".into(),
        }),
    ];

    let result = engine.apply(&ops, TransactionMode::default());
    assert!(matches!(result, Err(PatchError::AbsolutePath(_))));
    assert!(!workspace.path().join("a.txt").exists());
    assert!(!workspace.path().join("b.txt").exists());
    let backup_entries = std::fs::read_dir(backups.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(backup_entries, 0);
}

/// Scenario 5 (spec.md §8, §4.6): a mandatory consultation with no human
/// answer falls back to the AI substitute after the configured timeout, and
/// the substitute's content is recorded in the human notes stream.
#[tokio::test]
async fn mandatory_consultation_falls_back_to_ai_substitute_and_is_recorded() {
    struct NeverAnswers;
    #[async_trait]
    impl InputSource for NeverAnswers {
        async fn read_answer(&self) -> Option<String> {
            std::future::pending::<()>().await;
            None
        }
    }

    struct SubstituteModel;
    #[async_trait]
    impl InferenceClient for SubstituteModel {
        async fn stream_completion(
            &self,
            _request: CompletionRequest,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<StreamChunk, InferenceError>>,
            InferenceError,
        > {
            use futures::stream;
            Ok(Box::pin(stream::empty()))
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, InferenceError> {
            Ok("approve the standard approach".to_string())
        }

        async fn ping(&self) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    let input = NeverAnswers;
    let model = SubstituteModel;
    let observer = NullCountdownObserver;
    let handler = ConsultationHandler::new(&input, &model, &observer, "coder-model");
    let cancel = CancellationToken::new();

    let start = tokio::time::Instant::now();
    let response = handler
        .request(
            "Implement.Feedback requires human feedback before continuing.",
            ConsultationOptions {
                timeout_ms: 200,
                countdown_ms: 50,
                allow_ai_substitute: true,
                mandatory: true,
            },
            &cancel,
        )
        .await
        .unwrap();

    assert!(start.elapsed().as_millis() >= 200);
    assert_eq!(response.source, NoteSource::AiSubstitute);

    let sessions_root = tempdir().unwrap();
    let store = SessionStore::new(sessions_root.path(), "s-consult");
    store.ensure_layout().unwrap();
    let note = tandem_orchestrator::session::Note::new(
        response.content.clone(),
        response.source,
        NoteStream::Human,
    );
    store.append_note(&note).unwrap();

    let human_notes = store.read_notes(NoteStream::Human).unwrap();
    assert_eq!(human_notes.len(), 1);
    assert_eq!(human_notes[0].source, NoteSource::AiSubstitute);
    assert_eq!(human_notes[0].content, "approve the standard approach");
}

/// Scenario 6 (spec.md §8, §4.5): a process failure freezes the session
/// (flow code gains `X`, state is persisted); resuming re-runs the offending
/// process and, on success, the flow code gains its `P<n>` segment again and
/// the session goes on to terminate normally.
#[tokio::test]
async fn process_failure_freezes_and_resume_retries_the_offending_process() {
    let sessions_root = tempdir().unwrap();
    let workspace = tempdir().unwrap();
    let model = GreedyModel;
    let coordinator = ModelCoordinator::new();
    let executor: Arc<FailOnceExecutor> =
        Arc::new(FailOnceExecutor::new((ScheduleId::Implement, ProcessId::P1)));

    let store = SessionStore::new(sessions_root.path(), "s-freeze");
    let orchestrator = orchestrator_for(
        store,
        workspace.path(),
        executor.clone(),
        &model,
        &coordinator,
    );

    let outcome = orchestrator
        .run("build the thing", CancellationToken::new())
        .await
        .unwrap();

    let (mut session, suspension) = match outcome {
        TerminationOutcome::Suspended(session, suspension) => (*session, suspension),
        other => panic!("expected suspension on the injected failure, got {other:?}"),
    };
    assert_eq!(suspension.code, ErrorCode::E009);
    assert!(session.flow_code.ends_with('X'));
    let flow_code_before_resume = session.flow_code.clone();
    assert_eq!(flow_code_before_resume, "S1P1P2P3S2P1P2P3X");

    // Recovery action "Retry" (spec.md §4.1 "Failure semantics"): clear the
    // suspension and re-enter the drive loop from the persisted session.
    session.suspension = None;
    let store_for_resume = SessionStore::new(sessions_root.path(), "s-freeze");
    let orchestrator = orchestrator_for(
        store_for_resume,
        workspace.path(),
        executor,
        &model,
        &coordinator,
    );

    let outcome = orchestrator
        .resume(session, CancellationToken::new())
        .await
        .unwrap();

    let completed = match outcome {
        TerminationOutcome::Completed(session) => session,
        other => panic!("expected normal completion after retry, got {other:?}"),
    };
    assert_eq!(
        completed.flow_code,
        "S1P1P2P3S2P1P2P3S3P1P2P3S4P1P2P3S5P1P2P3"
    );
    assert!(!completed.is_suspended());
}
