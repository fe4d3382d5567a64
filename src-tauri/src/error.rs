// Tandem Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

impl From<tandem_orchestrator::OrchestrationError> for TandemError {
    fn from(err: tandem_orchestrator::OrchestrationError) -> Self {
        TandemError::Orchestrator(err.to_string())
    }
}

impl From<tandem_orchestrator::orchestrator::StartError> for TandemError {
    fn from(err: tandem_orchestrator::orchestrator::StartError) -> Self {
        TandemError::Orchestrator(err.to_string())
    }
}

impl From<String> for TandemError {
    fn from(err: String) -> Self {
        TandemError::InvalidConfig(err)
    }
}

// Implement serialization for Tauri commands
impl serde::Serialize for TandemError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;
