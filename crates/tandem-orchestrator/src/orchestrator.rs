//! Orchestrator / TOOLER (spec.md §4.1). Selects schedules and processes
//! under navigation rules, drives consultation, triages notes, and decides
//! prompt termination. Structurally incapable of the EXECUTOR's
//! capabilities: it never holds a `PatchEngine` and never calls one.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::action::ActionKind;
use crate::agent::ActionTrace;
use crate::checkpoint::CheckpointStore;
use crate::config::OrchestratorConfig;
use crate::consultation::{ConsultationError, ConsultationHandler, ConsultationOptions};
use crate::errors::{OrchestrationError, SuspensionError};
use crate::inference::{ChatMessage, CompletionRequest, InferenceClient};
use crate::model_coordinator::{ModelCoordinator, Role};
use crate::monitor::{spawn_sampler, LimitCheck, ResourceLimits, ResourceSnapshot};
use crate::scheduler::{NextProcess, ProcessNavigator};
use crate::session::{
    ConsultationRequirement, Note, NoteSource, NoteStream, Process, ProcessId, ScheduleId, Session,
};
use crate::store::SessionStore;

/// Read-only view of a session handed to a `ProcessExecutor`; prevents the
/// Agent side from touching anything but what it needs to run one process
/// (spec.md §4.2 "Public contract").
pub struct SessionView<'a> {
    pub prompt: &'a str,
    pub notes: &'a [Note],
    pub flow_code: &'a str,
}

/// The EXECUTOR boundary the Orchestrator drives but never implements
/// itself (spec.md §9 "ActionSink"). Production wiring binds this to the
/// `Agent` consuming a streamed `InferenceClient` completion; tests bind
/// it to a scripted stub.
#[async_trait::async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(
        &self,
        schedule: ScheduleId,
        process: ProcessId,
        view: SessionView<'_>,
        cancel: &CancellationToken,
    ) -> Result<ActionTrace, OrchestrationError>;
}

/// The four UI hooks permitted into the core (spec.md §4.1 "Observers").
pub trait OrchestratorObservers: Send + Sync {
    fn on_state_appended(&self, _flow_code: &str) {}
    fn on_schedule_selected(&self, _schedule: ScheduleId) {}
    fn on_process_selected(&self, _process: Process) {}
    fn on_error(&self, _error: &OrchestrationError) {}
}

pub struct NullObservers;
impl OrchestratorObservers for NullObservers {}

#[derive(Debug)]
pub enum TerminationOutcome {
    Completed(Session),
    Suspended(Box<Session>, SuspensionError),
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("cannot resume a session that already terminated normally")]
    AlreadyComplete,
}

pub struct Orchestrator<'a> {
    config: OrchestratorConfig,
    store: SessionStore,
    workspace_root: PathBuf,
    executor: Arc<dyn ProcessExecutor>,
    schedule_model: &'a dyn InferenceClient,
    model_coordinator: &'a ModelCoordinator,
    consultation: Option<ConsultationHandler<'a>>,
    observers: Arc<dyn OrchestratorObservers>,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        store: SessionStore,
        workspace_root: impl Into<PathBuf>,
        executor: Arc<dyn ProcessExecutor>,
        schedule_model: &'a dyn InferenceClient,
        model_coordinator: &'a ModelCoordinator,
        consultation: Option<ConsultationHandler<'a>>,
        observers: Arc<dyn OrchestratorObservers>,
    ) -> Self {
        Self {
            config,
            store,
            workspace_root: workspace_root.into(),
            executor,
            schedule_model,
            model_coordinator,
            consultation,
            observers,
        }
    }

    /// `run(prompt) -> termination_outcome` (spec.md §4.1 "Public contract").
    pub async fn run(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<TerminationOutcome, StartError> {
        if prompt.trim().is_empty() {
            return Err(StartError::EmptyPrompt);
        }

        let session_id = new_session_id();
        let session = Session::new(&session_id, prompt);
        self.store.ensure_layout().ok();
        self.store.write_restore_script().ok();
        self.drive(session, cancel).await
    }

    /// Resumes a previously frozen `Session` (spec.md §4.1 "Failure
    /// semantics": Retry "re-runs the offending process from the frozen
    /// state"). The caller is responsible for clearing or acting on
    /// `session.suspension` before calling this -- the drive loop itself
    /// only ever reads `flow_code`/`states` to pick up where it left off.
    pub async fn resume(
        &self,
        mut session: Session,
        cancel: CancellationToken,
    ) -> Result<TerminationOutcome, StartError> {
        if session.may_terminate() && session.suspension.is_none() {
            return Err(StartError::AlreadyComplete);
        }
        session.suspension = None;
        // The flow code's `X` marks the session as currently frozen (spec.md
        // §6 grammar: `X` is only ever the final character); resuming lifts
        // the freeze, so further appends must not bury it mid-string.
        if session.flow_code.ends_with('X') {
            session.flow_code.pop();
        }
        self.store.ensure_layout().ok();
        self.store.write_restore_script().ok();
        self.drive(session, cancel).await
    }

    async fn drive(
        &self,
        mut session: Session,
        cancel: CancellationToken,
    ) -> Result<TerminationOutcome, StartError> {
        let limits = ResourceLimits {
            memory_limit_bytes: self.config.limits.memory_limit_bytes,
            disk_limit_bytes: self.config.limits.disk_limit_bytes,
        };
        let sampler_cancel = cancel.child_token();
        let (snapshot, _sampler_handle) = spawn_sampler(None, sampler_cancel.clone());
        let _sampler_guard = sampler_cancel.drop_guard();

        loop {
            if cancel.is_cancelled() {
                return Ok(TerminationOutcome::Cancelled);
            }

            if ProcessNavigator::may_request_prompt_termination(&session) {
                if self.consult_prompt_termination(&session).await {
                    tracing::info!(session_id = %session.session_id, "prompt terminated normally");
                    self.store.write_meta(&session).ok();
                    return Ok(TerminationOutcome::Completed(session));
                }
            }

            let schedule = self.select_schedule(&session).await;
            self.observers.on_schedule_selected(schedule);
            tracing::info!(?schedule, "schedule selected");

            match self
                .run_schedule(&mut session, schedule, &cancel, &snapshot, &limits)
                .await
            {
                Ok(()) => continue,
                Err(suspension) => {
                    self.store.freeze(&mut session).ok();
                    self.store.write_meta(&session).ok();
                    session.suspension = Some(suspension.clone());
                    tracing::warn!(code = ?suspension.code, "session suspended");
                    return Ok(TerminationOutcome::Suspended(Box::new(session), suspension));
                }
            }
        }
    }

    /// Run processes within one schedule until the schedule terminates or a
    /// suspension is raised.
    async fn run_schedule(
        &self,
        session: &mut Session,
        schedule: ScheduleId,
        cancel: &CancellationToken,
        snapshot: &ResourceSnapshot,
        limits: &ResourceLimits,
    ) -> Result<(), SuspensionError> {
        loop {
            let p_last = session.last_process_in_schedule(schedule);
            let requested = self.select_process(session, schedule, p_last).await;

            let process_id = match requested {
                Ok(NextProcess::TerminateSchedule) => {
                    self.write_schedule_checkpoint(session, schedule);
                    return Ok(());
                }
                Ok(NextProcess::Run(p)) => p,
                Err(err) => {
                    self.observers.on_error(&err);
                    return Err(self.suspend(session, &err, schedule, p_last).await);
                }
            };

            let process = Process::new(schedule, process_id);
            self.observers.on_process_selected(process);

            if matches!(process_id.consultation(schedule), ConsultationRequirement::Mandatory) {
                if let Err(consult_err) = self.run_mandatory_consultation(session, process, cancel).await {
                    let err = OrchestrationError::ConsultationMissing(consult_err.to_string());
                    self.observers.on_error(&err);
                    return Err(self.suspend(session, &err, schedule, p_last).await);
                }
            }

            let view = SessionView {
                prompt: &session.prompt,
                notes: &session.notes,
                flow_code: &session.flow_code,
            };

            match self.executor.execute(schedule, process_id, view, cancel).await {
                Ok(trace) => {
                    for path in trace.actions.iter().filter_map(|a| touched_path(&a.kind)) {
                        session.tracked_files.insert(path);
                    }
                    let files_hash = self.store.checksum_tracked_files(
                        &self.workspace_root,
                        &session.tracked_files.iter().cloned().collect::<Vec<_>>(),
                    );
                    let diff_contents = trace
                        .actions
                        .iter()
                        .filter_map(|a| a.diff_ref.as_deref())
                        .collect::<Vec<_>>()
                        .join("\n");
                    let action_ids = trace.actions.iter().map(|a| a.id).collect();
                    self.store
                        .append_state(session, schedule, process_id, files_hash, action_ids, &diff_contents)
                        .ok();
                    self.store.write_recurrence(session).ok();
                    self.observers.on_state_appended(&session.flow_code);
                    self.triage_notes(session);

                    if !trace.completed && !ProcessNavigator::may_terminate_schedule(Some(process_id)) {
                        let err = OrchestrationError::PrematureScheduleTermination(format!(
                            "{:?}.{:?} ended without complete",
                            schedule, process_id
                        ));
                        self.observers.on_error(&err);
                        return Err(self.suspend(session, &err, schedule, Some(process_id)).await);
                    }

                    match limits.check(snapshot) {
                        LimitCheck::Exceeded => {
                            let resource = if limits
                                .memory_limit_bytes
                                .is_some_and(|limit| snapshot.memory_bytes() >= limit)
                            {
                                "memory"
                            } else {
                                "disk"
                            };
                            let err = OrchestrationError::LimitExceeded(format!(
                                "{resource} usage exceeded the configured limit after {:?}.{:?}",
                                schedule, process_id
                            ));
                            self.observers.on_error(&err);
                            return Err(self.suspend(session, &err, schedule, Some(process_id)).await);
                        }
                        LimitCheck::SoftWarning => {
                            tracing::warn!(?schedule, ?process_id, "resource usage crossed soft limit");
                        }
                        LimitCheck::Ok => {}
                    }
                }
                Err(err) => {
                    self.observers.on_error(&err);
                    return Err(self.suspend(session, &err, schedule, p_last).await);
                }
            }
        }
    }

    /// Model tag used for schedule/process selection prompts: the
    /// `Role::Orchestrator` binding if one resolves, else the config's
    /// default orchestrator tag.
    fn orchestrator_model_tag(&self) -> String {
        self.model_coordinator
            .resolve(Role::Orchestrator)
            .map(|r| r.model.model_id)
            .unwrap_or_else(|_| self.config.models.orchestrator.tag.clone())
    }

    async fn select_process(
        &self,
        session: &Session,
        schedule: ScheduleId,
        p_last: Option<ProcessId>,
    ) -> Result<NextProcess, OrchestrationError> {
        let admissible = ProcessNavigator::admissible(p_last);
        let first_choice = self.ask_process(session, schedule, &admissible).await;

        if admissible.contains(&first_choice) {
            return Ok(first_choice);
        }

        if self.config.strict_navigation {
            return Err(OrchestrationError::ForbiddenNavigation(format!(
                "{:?} not in {:?}",
                first_choice, admissible
            )));
        }

        // One retry with the admissible set re-stated (spec.md §4.1).
        let retry_choice = self.ask_process(session, schedule, &admissible).await;
        if admissible.contains(&retry_choice) {
            return Ok(retry_choice);
        }

        Err(OrchestrationError::ForbiddenNavigation(format!(
            "{:?} not in {:?} after retry",
            retry_choice, admissible
        )))
    }

    async fn ask_process(
        &self,
        session: &Session,
        schedule: ScheduleId,
        admissible: &[NextProcess],
    ) -> NextProcess {
        let prompt = format!(
            "Original prompt: {}\nFlow code so far: {}\nSchedule: {:?}\nChoose exactly one of: {:?}",
            session.prompt, session.flow_code, schedule, admissible
        );
        let request = CompletionRequest {
            model: self.orchestrator_model_tag(),
            messages: vec![
                ChatMessage::system("You select the next process within a schedule."),
                ChatMessage::user(prompt),
            ],
            max_tokens: Some(32),
            temperature: Some(0.0),
        };
        match self.schedule_model.complete(request).await {
            Ok(text) => parse_next_process(&text).unwrap_or(admissible[0]),
            Err(_) => admissible[0],
        }
    }

    async fn select_schedule(&self, session: &Session) -> ScheduleId {
        let prompt = format!(
            "Original prompt: {}\nFlow code so far: {}\nSchedule run counts so far determine tie-breaks.\n\
             Choose the next schedule: knowledge, plan, implement, scale, or production.",
            session.prompt, session.flow_code
        );
        let request = CompletionRequest {
            model: self.orchestrator_model_tag(),
            messages: vec![
                ChatMessage::system("You select the next schedule to run."),
                ChatMessage::user(prompt),
            ],
            max_tokens: Some(16),
            temperature: Some(0.0),
        };
        match self.schedule_model.complete(request).await {
            Ok(text) => parse_schedule(&text).unwrap_or_else(|| ProcessNavigator::least_run_schedule(session)),
            Err(_) => ProcessNavigator::least_run_schedule(session),
        }
    }

    async fn consult_prompt_termination(&self, session: &Session) -> bool {
        let prompt = format!(
            "Every schedule has run and the last was Production. Original prompt: {}. \
             Should the session terminate now? Answer yes or no.",
            session.prompt
        );
        let request = CompletionRequest {
            model: "orchestrator".into(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: Some(8),
            temperature: Some(0.0),
        };
        match self.schedule_model.complete(request).await {
            Ok(text) => text.to_lowercase().contains("yes"),
            Err(_) => true,
        }
    }

    async fn run_mandatory_consultation(
        &self,
        session: &mut Session,
        process: Process,
        cancel: &CancellationToken,
    ) -> Result<(), ConsultationError> {
        let question = format!(
            "{:?}.{:?} requires human feedback before continuing.",
            process.schedule, process.process
        );

        let handler = self.consultation.as_ref().ok_or(ConsultationError::Missing)?;
        let options = ConsultationOptions {
            timeout_ms: self.config.consultation.default_timeout_ms,
            countdown_ms: self.config.consultation.default_countdown_ms,
            allow_ai_substitute: self.config.consultation.allow_ai_substitute,
            mandatory: true,
        };
        let response = handler.request(&question, options, cancel).await?;

        let note = Note::new(response.content, response.source, NoteStream::Human);
        self.store.append_note(&note).ok();
        session.notes.push(note);
        Ok(())
    }

    fn triage_notes(&self, session: &mut Session) {
        let unreviewed: Vec<Note> = session
            .notes
            .iter()
            .filter(|n| !n.reviewed)
            .cloned()
            .collect();
        if unreviewed.is_empty() {
            return;
        }
        let summary = unreviewed
            .iter()
            .map(|n| n.content.clone())
            .collect::<Vec<_>>()
            .join("; ");
        let compacted = Note::new(
            format!("triage: {summary}"),
            NoteSource::System,
            NoteStream::Orchestrator,
        );
        self.store.append_note(&compacted).ok();
        for note in session.notes.iter_mut() {
            note.reviewed = true;
        }
        session.notes.push(compacted);
    }

    /// Archives the tracked file set into `checkpoints/S<n>_complete.tar.gz`
    /// the moment a schedule terminates (spec.md §6 disk layout,
    /// §9 "Checkpoint granularity": per-schedule baseline).
    fn write_schedule_checkpoint(&self, session: &Session, schedule: ScheduleId) {
        let checkpoints = CheckpointStore::new(self.store.root());
        let tracked: Vec<String> = session.tracked_files.iter().cloned().collect();
        if let Err(e) = checkpoints.write(schedule, &self.workspace_root, &tracked) {
            tracing::warn!(?schedule, error = %e, "failed to write schedule checkpoint");
        }
    }

    /// Freezes a session on error (spec.md §7 "Suspension"). E010/E013 use
    /// their fixed user-facing strings without ever touching the model
    /// (`ErrorCode::hardcoded_message`); everything else asks the bound
    /// orchestrator model for a root-cause analysis and three ranked
    /// recovery options, falling back to the generic Retry/Skip/Abort triad
    /// if the model can't be reached or returns something unparseable.
    async fn suspend(
        &self,
        session: &Session,
        err: &OrchestrationError,
        schedule: ScheduleId,
        p_last: Option<ProcessId>,
    ) -> SuspensionError {
        let state_id = session
            .last_state()
            .map(|s| s.id())
            .unwrap_or_else(|| "0000_S0P0".to_string());
        let flow_code_with_x = format!("{}X", session.flow_code);
        let fallback_analysis = format!(
            "{:?} halted while last-terminated process in {:?} was {:?}",
            err, schedule, p_last
        );
        let fallback_solutions = vec![
            "retry the offending process".to_string(),
            "skip to the next admissible process".to_string(),
            "abort the session".to_string(),
        ];

        if let Some(hardcoded) = err.code().hardcoded_message() {
            return SuspensionError::from_error(
                err,
                "orchestrator",
                &state_id,
                &flow_code_with_x,
                hardcoded.to_string(),
                fallback_solutions,
            );
        }

        let (analysis, solutions) = self
            .analyze_failure(err, session, schedule, p_last)
            .await
            .unwrap_or((fallback_analysis, fallback_solutions));

        SuspensionError::from_error(err, "orchestrator", &state_id, &flow_code_with_x, analysis, solutions)
    }

    /// Asks the model bound to `Role::Orchestrator` for the root cause and
    /// three ranked solutions to a suspension (spec.md §7). Returns `None`
    /// on any resolution/inference/parse failure so `suspend` can fall back
    /// to its generic analysis.
    async fn analyze_failure(
        &self,
        err: &OrchestrationError,
        session: &Session,
        schedule: ScheduleId,
        p_last: Option<ProcessId>,
    ) -> Option<(String, Vec<String>)> {
        let resolution = self.model_coordinator.resolve(Role::Orchestrator).ok()?;
        let prompt = format!(
            "A session suspended with error: {err}\n\
             Last-terminated process in {schedule:?} was {p_last:?}.\n\
             Flow code so far: {flow_code}\n\
             Respond with the root cause on the first line, then exactly \
             three ranked recovery options, one per line, each starting with '- '.",
            err = err,
            schedule = schedule,
            p_last = p_last,
            flow_code = session.flow_code,
        );
        let request = CompletionRequest {
            model: resolution.model.model_id,
            messages: vec![
                ChatMessage::system("You analyze orchestration failures for a human operator."),
                ChatMessage::user(prompt),
            ],
            max_tokens: Some(256),
            temperature: Some(0.1),
        };
        let text = self.schedule_model.complete(request).await.ok()?;
        parse_analysis(&text)
    }
}

/// The workspace-relative path a mutating action adds to the tracked file
/// set (spec.md §3 State "content-hash of the tracked file set"). Renames,
/// moves, and copies track their destination; deletions drop out of the
/// checksum naturally once `checksum_tracked_files` fails to read them.
fn touched_path(kind: &ActionKind) -> Option<String> {
    match kind {
        ActionKind::CreateFile { path, .. } | ActionKind::EditFile { path, .. } => {
            Some(path.clone())
        }
        ActionKind::RenameFile { to, .. }
        | ActionKind::MoveFile { to, .. }
        | ActionKind::CopyFile { to, .. } => Some(to.clone()),
        _ => None,
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn parse_schedule(text: &str) -> Option<ScheduleId> {
    let lower = text.to_lowercase();
    if lower.contains("knowledge") {
        Some(ScheduleId::Knowledge)
    } else if lower.contains("plan") {
        Some(ScheduleId::Plan)
    } else if lower.contains("implement") {
        Some(ScheduleId::Implement)
    } else if lower.contains("scale") {
        Some(ScheduleId::Scale)
    } else if lower.contains("production") {
        Some(ScheduleId::Production)
    } else {
        None
    }
}

/// Parses a suspension-analysis completion: first non-empty line is the
/// root cause, subsequent `- `-prefixed lines are the ranked solutions.
/// `None` if the model gave no recognizable solution lines at all.
fn parse_analysis(text: &str) -> Option<(String, Vec<String>)> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let analysis = lines.next()?.to_string();
    let solutions: Vec<String> = lines
        .filter_map(|l| l.strip_prefix("- ").or_else(|| l.strip_prefix('-')))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if solutions.is_empty() {
        return None;
    }
    Some((analysis, solutions))
}

fn parse_next_process(text: &str) -> Option<NextProcess> {
    let lower = text.to_lowercase();
    if lower.contains("terminate") {
        return Some(NextProcess::TerminateSchedule);
    }
    if lower.contains("p1") {
        return Some(NextProcess::Run(ProcessId::P1));
    }
    if lower.contains("p2") {
        return Some(NextProcess::Run(ProcessId::P2));
    }
    if lower.contains("p3") {
        return Some(NextProcess::Run(ProcessId::P3));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionId, ActionOutcome};
    use crate::inference::{InferenceError, StreamChunk};
    use tempfile::tempdir;

    struct StubModel(&'static str);
    #[async_trait::async_trait]
    impl InferenceClient for StubModel {
        async fn stream_completion(
            &self,
            _request: CompletionRequest,
        ) -> Result<futures::stream::BoxStream<'static, Result<StreamChunk, InferenceError>>, InferenceError>
        {
            use futures::stream;
            Ok(Box::pin(stream::empty()))
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, InferenceError> {
            Ok(self.0.to_string())
        }

        async fn ping(&self) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    struct AlwaysCompleteExecutor;
    #[async_trait::async_trait]
    impl ProcessExecutor for AlwaysCompleteExecutor {
        async fn execute(
            &self,
            schedule: ScheduleId,
            process: ProcessId,
            _view: SessionView<'_>,
            _cancel: &CancellationToken,
        ) -> Result<ActionTrace, OrchestrationError> {
            let action = Action::new(ActionId(1), crate::action::ActionKind::Complete, schedule, process);
            let mut action = action;
            action.outcome = Some(ActionOutcome::Succeeded);
            Ok(ActionTrace {
                actions: vec![action],
                completed: true,
            })
        }
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_session_directory_is_created() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), "s1");
        let model = StubModel("p1");
        let coordinator = ModelCoordinator::new();
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            store,
            dir.path().join("workspace"),
            Arc::new(AlwaysCompleteExecutor),
            &model,
            &coordinator,
            None,
            Arc::new(NullObservers),
        );
        let result = orchestrator.run("", CancellationToken::new()).await;
        assert!(matches!(result, Err(StartError::EmptyPrompt)));
        assert!(!dir.path().join("s1").exists());
    }

    #[test]
    fn parse_schedule_recognizes_all_five_names() {
        assert_eq!(parse_schedule("Knowledge"), Some(ScheduleId::Knowledge));
        assert_eq!(parse_schedule("production please"), Some(ScheduleId::Production));
        assert_eq!(parse_schedule("gibberish"), None);
    }

    #[test]
    fn parse_analysis_splits_cause_from_dash_prefixed_solutions() {
        let text = "inference timed out mid-stream\n- retry the process\n- skip ahead\n- abort";
        let (cause, solutions) = parse_analysis(text).unwrap();
        assert_eq!(cause, "inference timed out mid-stream");
        assert_eq!(solutions, vec!["retry the process", "skip ahead", "abort"]);
    }

    #[test]
    fn parse_analysis_is_none_without_any_solution_lines() {
        assert!(parse_analysis("just a plain sentence with no dashes").is_none());
    }

    #[tokio::test]
    async fn resource_limit_exceeded_suspends_with_e012() {
        use crate::errors::ErrorCode;

        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), "s-limits");
        let model = StubModel("p1");
        let coordinator = ModelCoordinator::new();
        let mut config = OrchestratorConfig::default();
        config.limits.memory_limit_bytes = Some(1);
        let orchestrator = Orchestrator::new(
            config,
            store,
            dir.path().join("workspace"),
            Arc::new(AlwaysCompleteExecutor),
            &model,
            &coordinator,
            None,
            Arc::new(NullObservers),
        );

        let mut session = Session::new("s-limits", "build something");
        let snapshot = ResourceSnapshot::default();
        snapshot.record(u64::MAX, 0);
        let limits = ResourceLimits {
            memory_limit_bytes: Some(1),
            disk_limit_bytes: None,
        };

        let suspension = orchestrator
            .run_schedule(&mut session, ScheduleId::Knowledge, &CancellationToken::new(), &snapshot, &limits)
            .await
            .unwrap_err();

        assert_eq!(suspension.code, ErrorCode::E012);
        assert!(suspension.rule.contains("limit exceeded"));
    }
}
