//! Layered `OrchestratorConfig` (spec.md §6 "Configuration"). Follows the
//! teacher's `ProvidersConfig` convention: `serde`-derived structs with
//! per-field `#[serde(default = "...")]` fallbacks, loaded from JSON and
//! overridable by environment variables for strict/debug flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io { path: String, source: String },
    #[error("invalid config json: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBinding {
    pub tag: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    32_768
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_orchestrator_model")]
    pub orchestrator: ModelBinding,
    #[serde(default = "default_coder_model")]
    pub coder: ModelBinding,
    #[serde(default = "default_researcher_model")]
    pub researcher: ModelBinding,
    #[serde(default)]
    pub vision: Option<ModelBinding>,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

fn default_orchestrator_model() -> ModelBinding {
    ModelBinding {
        tag: "qwen2.5-coder:14b".into(),
        temperature: default_temperature(),
        max_tokens: default_max_tokens(),
        context_window: default_context_window(),
    }
}
fn default_coder_model() -> ModelBinding {
    default_orchestrator_model()
}
fn default_researcher_model() -> ModelBinding {
    ModelBinding {
        tag: "qwen2.5:7b".into(),
        temperature: 0.4,
        max_tokens: default_max_tokens(),
        context_window: default_context_window(),
    }
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            orchestrator: default_orchestrator_model(),
            coder: default_coder_model(),
            researcher: default_researcher_model(),
            vision: None,
            ollama_url: default_ollama_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("sessions")
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from("sessions/.backups")
}
fn default_backup_retention_days() -> u64 {
    30
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            backup_dir: default_backup_dir(),
            backup_retention_days: default_backup_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
    #[serde(default)]
    pub disk_limit_bytes: Option<u64>,
    #[serde(default)]
    pub token_limit: Option<u64>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    600_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: None,
            disk_limit_bytes: None,
            token_limit: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationConfig {
    #[serde(default = "default_consultation_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_consultation_countdown_ms")]
    pub default_countdown_ms: u64,
    #[serde(default = "default_true")]
    pub allow_ai_substitute: bool,
}

fn default_consultation_timeout_ms() -> u64 {
    60_000
}
fn default_consultation_countdown_ms() -> u64 {
    15_000
}
fn default_true() -> bool {
    true
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_consultation_timeout_ms(),
            default_countdown_ms: default_consultation_countdown_ms(),
            allow_ai_substitute: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub shell_allow_list: Vec<String>,
    #[serde(default)]
    pub net_allow_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub consultation: ConsultationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// `TANDEM_STRICT_NAVIGATION=1` turns E001 retries off entirely; used in
    /// test harnesses that want navigation violations to suspend on first
    /// offense rather than after one retry.
    #[serde(default)]
    pub strict_navigation: bool,
    /// `TANDEM_DEBUG=1` raises every `tracing` event's effective level.
    #[serde(default)]
    pub debug: bool,
}

impl OrchestratorConfig {
    /// Merges global -> project -> managed JSON layers field-by-field
    /// before ever deserializing into `OrchestratorConfig`, so a layer that
    /// only redeclares e.g. `models.coder.temperature` inherits every
    /// sibling field (like `models.coder.tag`) from the layer beneath it
    /// instead of losing it to `#[serde(default)]`. Mirrors the teacher's
    /// own `deep_merge` over `serde_json::Value` in
    /// `tandem-core/src/config.rs`.
    pub fn load_layered(
        global_path: Option<&Path>,
        project_path: Option<&Path>,
        managed_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut merged = serde_json::Value::Object(serde_json::Map::new());
        for path in [global_path, project_path, managed_path].into_iter().flatten() {
            if path.exists() {
                deep_merge(&mut merged, Self::read_json_value(path)?);
            }
        }
        let mut config: Self =
            serde_json::from_value(merged).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_json_value(path: &Path) -> Result<serde_json::Value, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_value(Self::read_json_value(path)?)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                source: e.to_string(),
            })?;
        }
        std::fs::write(path, json).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })
    }

    /// Environment variables override JSON-derived config, applied last
    /// (spec.md §3 "Configuration": env sits above project/global/managed).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TANDEM_STRICT_NAVIGATION") {
            self.strict_navigation = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("TANDEM_DEBUG") {
            self.debug = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(url) = std::env::var("TANDEM_OLLAMA_URL") {
            self.models.ollama_url = url;
        }
    }
}

/// Recursively merges `overlay` into `base` in place: objects merge
/// key-by-key, anything else (scalars, arrays) is replaced wholesale by
/// the overlay when present. Missing keys in `overlay` leave `base`
/// untouched, which is what lets a partial project-layer `config.json`
/// inherit the rest of a field's siblings from the global layer.
fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match overlay {
        serde_json::Value::Object(overlay_map) => {
            if !base.is_object() {
                *base = serde_json::Value::Object(serde_json::Map::new());
            }
            let base_map = base.as_object_mut().expect("just ensured object");
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        other => *base = other,
    }
}
