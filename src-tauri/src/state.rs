// Tandem Application State
use crate::logs::LogRingBuffer;
use crate::runtime::ConsultationChannel;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tandem_orchestrator::OrchestratorConfig;
use tokio_util::sync::CancellationToken;

/// A single prompt-driven orchestration run, from `run_prompt` start until
/// the frontend stops asking about it. Holds just enough to cancel the run
/// and to hand a human's consultation answer back in; everything else
/// (states, flow code, suspension) lives in the session's own `meta.json`.
pub struct RunHandle {
    pub cancel: CancellationToken,
    pub consultation: Arc<ConsultationChannel>,
}

/// Main application state managed by Tauri: the open workspace, its layered
/// orchestrator config, and the runs started against it.
pub struct AppState {
    /// Currently selected workspace path.
    pub workspace_path: RwLock<Option<PathBuf>>,
    /// Layered config (global/project/managed + env overrides).
    pub config: RwLock<OrchestratorConfig>,
    /// Active and recently-finished runs, keyed by session id.
    pub runs: RwLock<HashMap<String, RunHandle>>,
    /// In-memory tail of the tracing output, for the frontend's log panel.
    pub log_buffer: Arc<LogRingBuffer>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace_path: RwLock::new(None),
            config: RwLock::new(OrchestratorConfig::default()),
            runs: RwLock::new(HashMap::new()),
            log_buffer: Arc::new(LogRingBuffer::new(5000)),
        }
    }

    /// Set the workspace path. Sessions for this workspace live under
    /// `config.sessions.base_dir`, resolved relative to it.
    pub fn set_workspace(&self, path: PathBuf) {
        *self.workspace_path.write().unwrap() = Some(path);
    }

    pub fn get_workspace_path(&self) -> Option<PathBuf> {
        self.workspace_path.read().unwrap().clone()
    }

    pub fn sessions_dir(&self) -> Option<PathBuf> {
        let workspace = self.get_workspace_path()?;
        let base_dir = self.config.read().unwrap().sessions.base_dir.clone();
        Some(workspace.join(base_dir))
    }

    pub fn register_run(
        &self,
        session_id: String,
        cancel: CancellationToken,
        consultation: Arc<ConsultationChannel>,
    ) {
        self.runs
            .write()
            .unwrap()
            .insert(session_id, RunHandle { cancel, consultation });
    }

    pub fn remove_run(&self, session_id: &str) -> Option<RunHandle> {
        self.runs.write().unwrap().remove(session_id)
    }

    pub fn consultation_for(&self, session_id: &str) -> Option<Arc<ConsultationChannel>> {
        self.runs
            .read()
            .unwrap()
            .get(session_id)
            .map(|handle| handle.consultation.clone())
    }

    /// Requests cancellation of a running session; returns `false` if no run
    /// with that id is currently tracked (it may have already finished).
    pub fn cancel_run(&self, session_id: &str) -> bool {
        match self.runs.read().unwrap().get(session_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.runs.read().unwrap().contains_key(session_id)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable state snapshot for the frontend.
#[derive(Debug, Serialize)]
pub struct AppStateInfo {
    pub workspace_path: Option<String>,
    pub has_workspace: bool,
    pub active_run_count: usize,
}

impl From<&AppState> for AppStateInfo {
    fn from(state: &AppState) -> Self {
        let workspace = state.workspace_path.read().unwrap();
        Self {
            workspace_path: workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            has_workspace: workspace.is_some(),
            active_run_count: state.runs.read().unwrap().len(),
        }
    }
}
