// Tandem - a local-first orchestrator shell around the Unified
// Orchestration Protocol core (`tandem_orchestrator`).

mod commands;
mod error;
mod logs;
mod runtime;
mod state;

use std::io;
use std::sync::Arc;

use tauri::Manager;
use tauri_plugin_store::StoreExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logs::LogRingBuffer;

/// Mirrors every formatted tracing line into the in-memory ring buffer the
/// frontend's log panel reads via `get_recent_log_lines`/`get_log_lines_since`,
/// in addition to whatever the wrapped writer (console or file) does with it.
struct RingWriter {
    buffer: Arc<LogRingBuffer>,
}

impl io::Write for RingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.split_terminator('\n') {
            if !line.is_empty() {
                self.buffer.push(line.to_string());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct RingWriterMaker {
    buffer: Arc<LogRingBuffer>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RingWriterMaker {
    type Writer = RingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RingWriter { buffer: self.buffer.clone() }
    }
}

/// Sets up console + daily-rotating file + in-memory ring buffer logging.
/// Rolling file naming and the `RUST_LOG` override follow the same shape
/// `logs::list_log_files` expects (`tandem.YYYY-MM-DD.log`).
fn init_tracing(app_data_dir: &std::path::Path, ring_buffer: Arc<LogRingBuffer>) {
    use std::fs;
    use tracing_appender::rolling;

    let logs_dir = app_data_dir.join("logs");
    fs::create_dir_all(&logs_dir).ok();

    let file_appender = rolling::daily(&logs_dir, "tandem");
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false);

    let console_layer = tracing_subscriber::fmt::layer();

    let ring_layer = tracing_subscriber::fmt::layer()
        .with_writer(RingWriterMaker { buffer: ring_buffer })
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=info,tauri=info".into()),
        )
        .with(console_layer)
        .with(file_layer)
        .with(ring_layer)
        .init();

    tracing::info!("Logging initialized (logs directory: {:?})", logs_dir);
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let mut builder = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_store::Builder::default().build())
        .setup(|app| {
            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("failed to resolve app data directory");
            std::fs::create_dir_all(&app_data_dir).ok();

            let app_state = state::AppState::new();
            init_tracing(&app_data_dir, app_state.log_buffer.clone());
            tracing::debug!("starting Tandem application");

            // Restore the previously opened workspace and layered config.
            if let Ok(store) = app.store("settings.json") {
                if let Some(path) = store.get("workspace_path") {
                    if let Some(path_str) = path.as_str() {
                        let path_buf = std::path::PathBuf::from(path_str);
                        if path_buf.exists() {
                            tracing::debug!("restoring saved workspace: {}", path_str);
                            app_state.set_workspace(path_buf);
                        }
                    }
                }

                if let Some(config_value) = store.get("orchestrator_config") {
                    match serde_json::from_value(config_value.clone()) {
                        Ok(config) => {
                            tracing::debug!("restoring saved orchestrator config");
                            *app_state.config.write().unwrap() = config;
                        }
                        Err(e) => {
                            tracing::warn!("failed to parse saved orchestrator config: {}", e);
                        }
                    }
                }
            }

            app.manage(app_state);
            tracing::debug!("Tandem setup complete");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Workspace
            commands::get_app_state,
            commands::set_workspace_path,
            commands::get_workspace_path,
            // Configuration
            commands::get_orchestrator_config,
            commands::set_orchestrator_config,
            // Runs
            commands::start_run,
            commands::resume_run,
            commands::cancel_run,
            commands::is_run_active,
            commands::submit_consultation_answer,
            commands::get_run,
            commands::get_suspension,
            commands::list_runs,
            commands::get_notes,
            // Logs
            commands::list_app_log_files,
            commands::tail_app_log_file,
            commands::get_log_lines_since,
            commands::get_recent_log_lines,
        ]);

    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    {
        builder = builder
            .plugin(tauri_plugin_single_instance::init(|_app, _args, _cwd| {
                tracing::info!("another instance tried to launch");
            }))
            .plugin(tauri_plugin_updater::Builder::new().build())
            .plugin(tauri_plugin_process::init());
    }

    builder
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
