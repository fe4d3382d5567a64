//! Wires the orchestrator core into the Tauri shell: one `WorkspaceRuntime`
//! per open workspace, owning the inference client, model bindings, patch
//! engine, and session store that `Orchestrator::run`/`resume` borrow for
//! the lifetime of a single drive.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tauri::{AppHandle, Emitter};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use tandem_orchestrator::agent::{Agent, ActionParser, ActionTrace};
use tandem_orchestrator::consultation::{
    ConsultationHandler, CountdownObserver, InputSource,
};
use tandem_orchestrator::errors::OrchestrationError;
use tandem_orchestrator::inference::{
    ChatMessage, CompletionRequest, HttpInferenceClient, InferenceClient, InferenceError,
};
use tandem_orchestrator::model_coordinator::{ModelCoordinator, Role};
use tandem_orchestrator::orchestrator::{
    NullObservers, Orchestrator, OrchestratorObservers, ProcessExecutor, SessionView,
    TerminationOutcome,
};
use tandem_orchestrator::patch_engine::PatchEngine;
use tandem_orchestrator::session::{Process, ProcessId, ScheduleId};
use tandem_orchestrator::store::SessionStore;
use tandem_orchestrator::OrchestratorConfig;

/// Single-slot rendezvous a Tauri command delivers a human's consultation
/// answer into. `read_answer` parks until `submit` is called or the slot
/// is dropped without an answer.
#[derive(Default)]
pub struct ConsultationChannel {
    pending: Mutex<Option<oneshot::Sender<String>>>,
}

impl ConsultationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, answer: String) -> bool {
        let mut guard = self.pending.lock().await;
        match guard.take() {
            Some(tx) => tx.send(answer).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl InputSource for ConsultationChannel {
    async fn read_answer(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock().await;
            *guard = Some(tx);
        }
        rx.await.ok()
    }
}

/// Forwards the four permitted UI hooks, plus the consultation countdown,
/// to the frontend as Tauri events rather than holding any state itself.
#[derive(Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RuntimeEvent {
    StateAppended { flow_code: String },
    ScheduleSelected { schedule: ScheduleId },
    ProcessSelected { schedule: ScheduleId, process: ProcessId },
    Error { message: String },
    CountdownStarted { remaining_ms: u64 },
}

pub struct EventBridge {
    app: AppHandle,
    session_id: String,
}

impl EventBridge {
    pub fn new(app: AppHandle, session_id: impl Into<String>) -> Self {
        Self { app, session_id: session_id.into() }
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.app.emit(
            &format!("orchestrator://{}", self.session_id),
            event,
        );
    }
}

impl OrchestratorObservers for EventBridge {
    fn on_state_appended(&self, flow_code: &str) {
        self.emit(RuntimeEvent::StateAppended { flow_code: flow_code.to_string() });
    }

    fn on_schedule_selected(&self, schedule: ScheduleId) {
        self.emit(RuntimeEvent::ScheduleSelected { schedule });
    }

    fn on_process_selected(&self, process: Process) {
        self.emit(RuntimeEvent::ProcessSelected {
            schedule: process.schedule,
            process: process.process,
        });
    }

    fn on_error(&self, error: &OrchestrationError) {
        self.emit(RuntimeEvent::Error { message: error.to_string() });
    }
}

impl CountdownObserver for EventBridge {
    fn on_countdown_started(&self, remaining_ms: u64) {
        self.emit(RuntimeEvent::CountdownStarted { remaining_ms });
    }
}

/// The EXECUTOR side: streams the coder model's completion for one
/// process, parses it into Actions line by line, and dispatches each to
/// the Patch Engine as it arrives (spec.md §4.2 "Action parsing").
pub struct AgentExecutor {
    patch_engine: PatchEngine,
    coordinator: Arc<ModelCoordinator>,
    inference: Arc<dyn InferenceClient>,
    next_action_id: AtomicU32,
}

impl AgentExecutor {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        coordinator: Arc<ModelCoordinator>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            patch_engine: PatchEngine::new(workspace_root, backup_root),
            coordinator,
            inference,
            next_action_id: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ProcessExecutor for AgentExecutor {
    async fn execute(
        &self,
        schedule: ScheduleId,
        process: ProcessId,
        view: SessionView<'_>,
        cancel: &CancellationToken,
    ) -> Result<ActionTrace, OrchestrationError> {
        let role = Process::new(schedule, process).role();
        let resolution = self
            .coordinator
            .resolve(role)
            .map_err(|e| OrchestrationError::ModelMissing(e.to_string()))?;

        let prompt = format!(
            "Original prompt: {}\nFlow code so far: {}\nSchedule: {:?} Process: {:?}\n\
             Emit actions as @name attr=\"value\" lines, closing content-bearing actions with @end.",
            view.prompt, view.flow_code, schedule, process
        );
        let request = CompletionRequest {
            model: resolution.model.model_id.clone(),
            messages: vec![
                ChatMessage::system("You are the executor for one orchestration process."),
                ChatMessage::user(prompt),
            ],
            max_tokens: None,
            temperature: None,
        };

        let mut stream = self
            .inference
            .stream_completion(request)
            .await
            .map_err(map_connect_error)?;

        let mut parser = ActionParser::new();
        let mut agent = Agent::new(
            &self.patch_engine,
            self.next_action_id.load(Ordering::SeqCst),
        );
        let mut actions = Vec::new();
        let mut completed = false;
        let mut buffer = String::new();

        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            // The connection is already established by this point, so a
            // chunk-level failure is a transient drop, not the inference
            // stack being down -- E014 (recoverable), not E010 (fatal).
            let chunk = chunk.map_err(|e| OrchestrationError::NetworkFailure(e.to_string()))?;
            buffer.push_str(&chunk.delta);
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                if let Some(kind) = parser
                    .feed_line(line.trim_end_matches('\n'))
                    .map_err(|e| OrchestrationError::UnknownAction(e.to_string()))?
                {
                    let (action, is_complete) = agent.execute_one(kind, schedule, process);
                    actions.push(action);
                    if is_complete {
                        completed = true;
                    }
                }
            }
            if chunk.finish_reason.is_some() {
                break;
            }
        }

        self.next_action_id
            .fetch_add(actions.len() as u32, Ordering::SeqCst);

        Ok(ActionTrace { actions, completed })
    }
}

/// Maps the initial `stream_completion` connect failure (nothing has been
/// produced yet) to its E0xx code: the inference stack being unreachable
/// or sending garbage is fatal (E010), a missing model is E011.
fn map_connect_error(err: InferenceError) -> OrchestrationError {
    match err {
        InferenceError::Unreachable(msg) => OrchestrationError::InferenceUnreachable(msg),
        InferenceError::ModelMissing(msg) => OrchestrationError::ModelMissing(msg),
        InferenceError::Malformed(msg) => OrchestrationError::InferenceUnreachable(msg),
    }
}

/// Everything a single `Orchestrator::run`/`resume` call needs, owned for
/// the duration of one drive so the borrowed-reference constructor can be
/// built on the stack of a spawned task.
pub struct WorkspaceRuntime {
    pub workspace_root: PathBuf,
    pub sessions_dir: PathBuf,
    pub config: OrchestratorConfig,
}

impl WorkspaceRuntime {
    pub fn new(workspace_root: impl Into<PathBuf>, sessions_dir: impl Into<PathBuf>, config: OrchestratorConfig) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            sessions_dir: sessions_dir.into(),
            config,
        }
    }

    fn build_coordinator(&self) -> ModelCoordinator {
        let mut coordinator = ModelCoordinator::new();
        coordinator.bind(
            Role::Orchestrator,
            tandem_types::ModelSpec {
                provider_id: "ollama".into(),
                model_id: self.config.models.orchestrator.tag.clone(),
            },
        );
        coordinator.bind(
            Role::Coder,
            tandem_types::ModelSpec {
                provider_id: "ollama".into(),
                model_id: self.config.models.coder.tag.clone(),
            },
        );
        coordinator.bind(
            Role::Researcher,
            tandem_types::ModelSpec {
                provider_id: "ollama".into(),
                model_id: self.config.models.researcher.tag.clone(),
            },
        );
        coordinator
    }

    /// Spec.md §4.4 startup check: pings every bound role before a drive
    /// begins. `Coder` is required for every schedule, so its absence is
    /// fatal (E011, "orchestrator refuses to start"); other unreachable
    /// roles are only logged, since they may never be exercised by this
    /// prompt's schedules.
    async fn verify_startup(
        coordinator: &ModelCoordinator,
        inference: &dyn InferenceClient,
    ) -> Result<(), String> {
        let unreachable = coordinator.verify_reachable(inference).await;
        if unreachable.is_empty() {
            return Ok(());
        }
        for role in &unreachable {
            tracing::warn!(?role, "bound model role did not respond to startup ping");
        }
        if unreachable.contains(&Role::Coder) {
            return Err(format!(
                "required model unreachable at startup: {:?}",
                Role::Coder
            ));
        }
        Ok(())
    }

    /// Starts a brand new session for `prompt` and drives it to completion,
    /// suspension, or cancellation. `consultation` is owned by the caller so
    /// it can be registered for `submit_consultation_answer` before the
    /// drive loop reaches a mandatory consultation point.
    pub async fn run_prompt(
        &self,
        prompt: String,
        session_id: String,
        app: AppHandle,
        consultation: Arc<ConsultationChannel>,
        cancel: CancellationToken,
    ) -> Result<TerminationOutcome, String> {
        let store = SessionStore::new(&self.sessions_dir, &session_id);
        let inference: Arc<dyn InferenceClient> =
            Arc::new(HttpInferenceClient::new(self.config.models.ollama_url.clone()));
        let coordinator = self.build_coordinator();
        Self::verify_startup(&coordinator, inference.as_ref()).await?;
        let coordinator = Arc::new(coordinator);
        let executor = Arc::new(AgentExecutor::new(
            self.workspace_root.clone(),
            self.sessions_dir.join(".backups"),
            coordinator.clone(),
            inference.clone(),
        ));
        let bridge = Arc::new(EventBridge::new(app, session_id.clone()));
        let observers: Arc<dyn OrchestratorObservers> = bridge.clone();
        let consultation_observer: &dyn CountdownObserver = bridge.as_ref();
        let inference_ref: &dyn InferenceClient = inference.as_ref();
        let consultation_input: &dyn InputSource = consultation.as_ref();

        let handler = ConsultationHandler::new(
            consultation_input,
            inference_ref,
            consultation_observer,
            self.config.models.coder.tag.clone(),
        );

        let orchestrator = Orchestrator::new(
            self.config.clone(),
            store,
            self.workspace_root.clone(),
            executor as Arc<dyn ProcessExecutor>,
            inference_ref,
            &coordinator,
            Some(handler),
            observers,
        );

        orchestrator
            .run(&prompt, cancel)
            .await
            .map_err(|e| e.to_string())
    }

    /// Resumes a session frozen by a prior suspension. The caller has
    /// already decided the recovery action and cleared/kept
    /// `session.suspension` accordingly before calling this.
    pub async fn resume_session(
        &self,
        session: tandem_orchestrator::Session,
        app: AppHandle,
        consultation: Arc<ConsultationChannel>,
        cancel: CancellationToken,
    ) -> Result<TerminationOutcome, String> {
        let session_id = session.session_id.clone();
        let store = SessionStore::new(&self.sessions_dir, &session_id);
        let inference: Arc<dyn InferenceClient> =
            Arc::new(HttpInferenceClient::new(self.config.models.ollama_url.clone()));
        let coordinator = self.build_coordinator();
        Self::verify_startup(&coordinator, inference.as_ref()).await?;
        let coordinator = Arc::new(coordinator);
        let executor = Arc::new(AgentExecutor::new(
            self.workspace_root.clone(),
            self.sessions_dir.join(".backups"),
            coordinator.clone(),
            inference.clone(),
        ));
        let bridge = Arc::new(EventBridge::new(app, session_id.clone()));
        let observers: Arc<dyn OrchestratorObservers> = bridge.clone();
        let consultation_observer: &dyn CountdownObserver = bridge.as_ref();
        let inference_ref: &dyn InferenceClient = inference.as_ref();
        let consultation_input: &dyn InputSource = consultation.as_ref();

        let handler = ConsultationHandler::new(
            consultation_input,
            inference_ref,
            consultation_observer,
            self.config.models.coder.tag.clone(),
        );

        let orchestrator = Orchestrator::new(
            self.config.clone(),
            store,
            self.workspace_root.clone(),
            executor as Arc<dyn ProcessExecutor>,
            inference_ref,
            &coordinator,
            Some(handler),
            observers,
        );

        orchestrator
            .resume(session, cancel)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Used where no human-in-the-loop or UI feed-through is wired up, such as
/// a background verification pass over an already-frozen session.
pub fn silent_observers() -> Arc<dyn OrchestratorObservers> {
    Arc::new(NullObservers)
}

pub fn logs_root(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join("logs")
}
