//! Tauri command surface for the orchestrator shell. Every command here is
//! a thin adapter over `tandem_orchestrator`, `crate::state::AppState`, and
//! `crate::runtime::WorkspaceRuntime` -- no orchestration logic lives in
//! this file, matching the core's TOOLER/EXECUTOR boundary (spec.md §4.1,
//! §4.2): the frontend only ever starts/resumes/cancels a run, submits a
//! consultation answer, or observes -- it never decides navigation.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tauri::{AppHandle, Manager, State};
use tauri_plugin_store::StoreExt;
use tokio_util::sync::CancellationToken;

use tandem_orchestrator::errors::SuspensionError;
use tandem_orchestrator::orchestrator::TerminationOutcome;
use tandem_orchestrator::session::{Note, NoteStream, Session};
use tandem_orchestrator::store::SessionStore;
use tandem_orchestrator::OrchestratorConfig;

use crate::error::{Result, TandemError};
use crate::logs::{self, LogFileInfo, RingLine};
use crate::runtime::{ConsultationChannel, WorkspaceRuntime};
use crate::state::{AppState, AppStateInfo};

fn parse_note_stream(stream: &str) -> Result<NoteStream> {
    match stream {
        "orchestrator" => Ok(NoteStream::Orchestrator),
        "agent" => Ok(NoteStream::Agent),
        "human" => Ok(NoteStream::Human),
        other => Err(TandemError::ValidationError(format!(
            "unknown note stream: {other}"
        ))),
    }
}

fn workspace_runtime(state: &State<'_, AppState>) -> Result<WorkspaceRuntime> {
    let workspace_root = state
        .get_workspace_path()
        .ok_or_else(|| TandemError::InvalidConfig("no workspace is open".into()))?;
    let sessions_dir = state
        .sessions_dir()
        .ok_or_else(|| TandemError::InvalidConfig("no workspace is open".into()))?;
    let config = state.config.read().unwrap().clone();
    Ok(WorkspaceRuntime::new(workspace_root, sessions_dir, config))
}

fn session_store(state: &State<'_, AppState>, session_id: &str) -> Result<SessionStore> {
    let sessions_dir = state
        .sessions_dir()
        .ok_or_else(|| TandemError::InvalidConfig("no workspace is open".into()))?;
    Ok(SessionStore::new(sessions_dir, session_id))
}

// -- Workspace -------------------------------------------------------------

#[tauri::command]
pub fn get_app_state(state: State<'_, AppState>) -> AppStateInfo {
    AppStateInfo::from(state.inner())
}

#[tauri::command]
pub fn set_workspace_path(app: AppHandle, path: String, state: State<'_, AppState>) -> Result<()> {
    let path_buf = PathBuf::from(&path);
    if !path_buf.exists() {
        return Err(TandemError::NotFound(format!("path does not exist: {path}")));
    }
    state.set_workspace(path_buf);

    if let Ok(store) = app.store("settings.json") {
        store.set("workspace_path", serde_json::json!(path));
        let _ = store.save();
    }
    Ok(())
}

#[tauri::command]
pub fn get_workspace_path(state: State<'_, AppState>) -> Option<String> {
    state
        .get_workspace_path()
        .map(|p| p.to_string_lossy().to_string())
}

// -- Configuration -----------------------------------------------------------

#[tauri::command]
pub fn get_orchestrator_config(state: State<'_, AppState>) -> OrchestratorConfig {
    state.config.read().unwrap().clone()
}

#[tauri::command]
pub fn set_orchestrator_config(
    app: AppHandle,
    config: OrchestratorConfig,
    state: State<'_, AppState>,
) -> Result<()> {
    *state.config.write().unwrap() = config.clone();
    if let Ok(store) = app.store("settings.json") {
        let value = serde_json::to_value(&config).map_err(TandemError::Serialization)?;
        store.set("orchestrator_config", value);
        let _ = store.save();
    }
    Ok(())
}

// -- Runs --------------------------------------------------------------

/// Summary of one on-disk session, for the run list view.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub session_id: String,
    pub prompt: String,
    pub flow_code: String,
    pub suspended: bool,
    pub running: bool,
}

impl RunSummary {
    fn from_session(session: &Session, running: bool) -> Self {
        Self {
            session_id: session.session_id.clone(),
            prompt: session.prompt.clone(),
            flow_code: session.flow_code.clone(),
            suspended: session.suspension.is_some(),
            running,
        }
    }
}

fn log_outcome(session_id: &str, outcome: std::result::Result<TerminationOutcome, String>) {
    match outcome {
        Ok(TerminationOutcome::Completed(_)) => {
            tracing::info!(session_id, "run completed normally");
        }
        Ok(TerminationOutcome::Suspended(_, suspension)) => {
            tracing::warn!(session_id, code = ?suspension.code, "run suspended");
        }
        Ok(TerminationOutcome::Cancelled) => {
            tracing::info!(session_id, "run cancelled");
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "run failed");
        }
    }
}

/// Starts a brand-new session for `prompt` and drives it in the background.
/// Returns the new session id immediately; progress is delivered to the
/// frontend as `orchestrator://<session_id>` events.
#[tauri::command]
pub async fn start_run(app: AppHandle, prompt: String, state: State<'_, AppState>) -> Result<String> {
    if prompt.trim().is_empty() {
        return Err(TandemError::ValidationError("prompt must not be empty".into()));
    }

    let runtime = workspace_runtime(&state)?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    let consultation = Arc::new(ConsultationChannel::new());
    state.register_run(session_id.clone(), cancel.clone(), consultation.clone());

    let app_for_task = app.clone();
    let session_id_for_task = session_id.clone();
    tauri::async_runtime::spawn(async move {
        let outcome = runtime
            .run_prompt(prompt, session_id_for_task.clone(), app_for_task, consultation, cancel)
            .await;
        log_outcome(&session_id_for_task, outcome);
        if let Some(app_state) = app.try_state::<AppState>() {
            app_state.remove_run(&session_id_for_task);
        }
    });

    Ok(session_id)
}

/// Resumes a previously frozen session (spec.md §4.1 "Failure semantics":
/// Retry re-runs the offending process from the frozen state).
#[tauri::command]
pub async fn resume_run(app: AppHandle, session_id: String, state: State<'_, AppState>) -> Result<()> {
    let runtime = workspace_runtime(&state)?;
    let store = session_store(&state, &session_id)?;
    let mut session = store.read_meta().map_err(|e| TandemError::Orchestrator(e.to_string()))?;
    session.suspension = None;

    let cancel = CancellationToken::new();
    let consultation = Arc::new(ConsultationChannel::new());
    state.register_run(session_id.clone(), cancel.clone(), consultation.clone());

    let app_for_task = app.clone();
    let session_id_for_task = session_id.clone();
    tauri::async_runtime::spawn(async move {
        let outcome = runtime
            .resume_session(session, app_for_task, consultation, cancel)
            .await;
        log_outcome(&session_id_for_task, outcome);
        if let Some(app_state) = app.try_state::<AppState>() {
            app_state.remove_run(&session_id_for_task);
        }
    });

    Ok(())
}

#[tauri::command]
pub fn cancel_run(session_id: String, state: State<'_, AppState>) -> bool {
    state.cancel_run(&session_id)
}

#[tauri::command]
pub fn is_run_active(session_id: String, state: State<'_, AppState>) -> bool {
    state.is_running(&session_id)
}

#[tauri::command]
pub async fn submit_consultation_answer(
    session_id: String,
    answer: String,
    state: State<'_, AppState>,
) -> Result<bool> {
    match state.consultation_for(&session_id) {
        Some(channel) => Ok(channel.submit(answer).await),
        None => Ok(false),
    }
}

#[tauri::command]
pub fn get_run(session_id: String, state: State<'_, AppState>) -> Result<Session> {
    let store = session_store(&state, &session_id)?;
    store.read_meta().map_err(|e| TandemError::Orchestrator(e.to_string()))
}

#[tauri::command]
pub fn get_suspension(session_id: String, state: State<'_, AppState>) -> Result<Option<SuspensionError>> {
    let store = session_store(&state, &session_id)?;
    let session = store.read_meta().map_err(|e| TandemError::Orchestrator(e.to_string()))?;
    Ok(session.suspension)
}

#[tauri::command]
pub fn list_runs(state: State<'_, AppState>) -> Result<Vec<RunSummary>> {
    let sessions_dir = state
        .sessions_dir()
        .ok_or_else(|| TandemError::InvalidConfig("no workspace is open".into()))?;
    if !sessions_dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    let entries = std::fs::read_dir(&sessions_dir).map_err(TandemError::Io)?;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(session_id) = entry.file_name().to_str().map(|s| s.to_string()) else {
            continue;
        };
        let store = SessionStore::new(&sessions_dir, &session_id);
        if let Ok(session) = store.read_meta() {
            let running = state.is_running(&session_id);
            runs.push(RunSummary::from_session(&session, running));
        }
    }
    runs.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    Ok(runs)
}

#[tauri::command]
pub fn get_notes(session_id: String, stream: String, state: State<'_, AppState>) -> Result<Vec<Note>> {
    let note_stream = parse_note_stream(&stream)?;
    let store = session_store(&state, &session_id)?;
    store.read_notes(note_stream).map_err(|e| TandemError::Orchestrator(e.to_string()))
}

// -- Logs --------------------------------------------------------------

#[tauri::command]
pub fn list_app_log_files(app: AppHandle) -> Result<Vec<LogFileInfo>> {
    let app_data_dir = app
        .path()
        .app_data_dir()
        .map_err(|e| TandemError::InvalidConfig(e.to_string()))?;
    logs::list_log_files(&crate::runtime::logs_root(&app_data_dir))
}

#[tauri::command]
pub fn tail_app_log_file(app: AppHandle, file_name: String, tail_lines: usize) -> Result<Vec<String>> {
    let sanitized = logs::sanitize_log_file_name(&file_name)?;
    let app_data_dir = app
        .path()
        .app_data_dir()
        .map_err(|e| TandemError::InvalidConfig(e.to_string()))?;
    let path = logs::join_logs_dir(&crate::runtime::logs_root(&app_data_dir), &sanitized);
    let (lines, _) = logs::tail_file(&path, tail_lines, 1_048_576)?;
    Ok(lines)
}

/// Live tail of the in-memory ring buffer (console + file mirror), for the
/// frontend's log panel without re-reading the on-disk file.
#[tauri::command]
pub fn get_log_lines_since(since_seq: u64, state: State<'_, AppState>) -> Vec<RingLine> {
    state.log_buffer.since(since_seq)
}

#[tauri::command]
pub fn get_recent_log_lines(last_n: usize, state: State<'_, AppState>) -> Vec<RingLine> {
    state.log_buffer.snapshot(last_n)
}
