//! Stable error taxonomy (spec.md §6, §7): E001-E015, severity, and the
//! suspension record emitted when the Orchestrator freezes a session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the fifteen stable error codes a session can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Forbidden process navigation (e.g. P1 -> P3).
    E001,
    /// Agent attempted schedule termination.
    E002,
    /// Agent attempted prompt termination.
    E003,
    /// Orchestrator attempted a file operation.
    E004,
    /// Orchestrator attempted code generation.
    E005,
    /// Orchestrator-as-agent role violation.
    E006,
    /// Agent-as-orchestrator role violation.
    E007,
    /// Premature schedule termination.
    E008,
    /// Unknown action name.
    E009,
    /// Inference server unreachable.
    E010,
    /// Required model missing.
    E011,
    /// Memory pressure.
    E012,
    /// Disk exhausted.
    E013,
    /// Network failure.
    E014,
    /// Git operation failed.
    E015,
}

impl ErrorCode {
    /// E001-E009 are recoverable via Retry/Skip/Abort; E010-E015 are
    /// fatal-on-entry (no model, no disk) and refuse to start.
    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::E001
            | ErrorCode::E002
            | ErrorCode::E003
            | ErrorCode::E004
            | ErrorCode::E005
            | ErrorCode::E006
            | ErrorCode::E007
            | ErrorCode::E008
            | ErrorCode::E009
            | ErrorCode::E014
            | ErrorCode::E015 => Severity::Recoverable,
            ErrorCode::E010 | ErrorCode::E011 | ErrorCode::E013 => Severity::Fatal,
            ErrorCode::E012 => Severity::FatalAboveThreshold,
        }
    }

    /// E010 and E013 bypass LLM analysis and use fixed user-facing strings.
    pub fn hardcoded_message(self) -> Option<&'static str> {
        match self {
            ErrorCode::E010 => Some("The local inference server is unreachable."),
            ErrorCode::E013 => Some("The workspace disk is exhausted."),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Recoverable,
    Fatal,
    FatalAboveThreshold,
}

/// Recovery action a human chooses in response to a suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Skip,
    Abort,
    Investigate,
}

/// Typed error surfaced from the Agent or navigation rules to the Orchestrator.
#[derive(Debug, Error, Clone)]
pub enum OrchestrationError {
    #[error("forbidden process navigation: {0}")]
    ForbiddenNavigation(String),

    #[error("agent attempted schedule termination")]
    AgentScheduleTermination,

    #[error("agent attempted prompt termination")]
    AgentPromptTermination,

    #[error("orchestrator attempted a file operation")]
    OrchestratorFileOp,

    #[error("orchestrator attempted code generation")]
    OrchestratorCodeGen,

    #[error("orchestrator-as-agent violation: {0}")]
    OrchestratorAsAgent(String),

    #[error("agent-as-orchestrator violation: {0}")]
    AgentAsOrchestrator(String),

    #[error("premature schedule termination: {0}")]
    PrematureScheduleTermination(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("inference server unreachable: {0}")]
    InferenceUnreachable(String),

    #[error("required model missing: {0}")]
    ModelMissing(String),

    #[error("memory pressure: {0}")]
    MemoryPressure(String),

    #[error("disk exhausted: {0}")]
    DiskExhausted(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("git operation failed: {0}")]
    GitFailed(String),

    #[error("consultation missing: {0}")]
    ConsultationMissing(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

impl OrchestrationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestrationError::ForbiddenNavigation(_) => ErrorCode::E001,
            OrchestrationError::AgentScheduleTermination => ErrorCode::E002,
            OrchestrationError::AgentPromptTermination => ErrorCode::E003,
            OrchestrationError::OrchestratorFileOp => ErrorCode::E004,
            OrchestrationError::OrchestratorCodeGen => ErrorCode::E005,
            OrchestrationError::OrchestratorAsAgent(_) => ErrorCode::E006,
            OrchestrationError::AgentAsOrchestrator(_) => ErrorCode::E007,
            OrchestrationError::PrematureScheduleTermination(_) => ErrorCode::E008,
            OrchestrationError::UnknownAction(_) => ErrorCode::E009,
            OrchestrationError::InferenceUnreachable(_) => ErrorCode::E010,
            OrchestrationError::ModelMissing(_) => ErrorCode::E011,
            OrchestrationError::MemoryPressure(_) => ErrorCode::E012,
            OrchestrationError::DiskExhausted(_) => ErrorCode::E013,
            OrchestrationError::NetworkFailure(_) => ErrorCode::E014,
            OrchestrationError::GitFailed(_) => ErrorCode::E015,
            // Consultation-missing and limit-exceeded are not part of the
            // E001-E015 table but still drive suspension (spec §4.6, §5 Limits).
            OrchestrationError::ConsultationMissing(_) => ErrorCode::E009,
            OrchestrationError::LimitExceeded(_) => ErrorCode::E012,
        }
    }

    /// Whether the session can continue after a user-chosen recovery action.
    pub fn recoverable(&self) -> bool {
        matches!(self.code().severity(), Severity::Recoverable)
    }
}

/// The structured record emitted when a session is frozen (spec.md §6
/// "Suspension console").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionError {
    pub code: ErrorCode,
    pub severity: Severity,
    pub component: String,
    pub rule: String,
    pub state_id: String,
    pub flow_code_with_x: String,
    pub analysis: String,
    pub solutions: Vec<String>,
    pub recoverable: bool,
}

impl SuspensionError {
    pub fn from_error(
        err: &OrchestrationError,
        component: &str,
        state_id: &str,
        flow_code_with_x: &str,
        analysis: String,
        mut solutions: Vec<String>,
    ) -> Self {
        solutions.truncate(3);
        Self {
            code: err.code(),
            severity: err.code().severity(),
            component: component.to_string(),
            rule: err.to_string(),
            state_id: state_id.to_string(),
            flow_code_with_x: flow_code_with_x.to_string(),
            analysis,
            solutions,
            recoverable: err.recoverable(),
        }
    }

    /// The recovery options offered in the suspension console: R|S|A|I.
    pub fn options(&self) -> Vec<RecoveryAction> {
        if self.recoverable {
            vec![
                RecoveryAction::Retry,
                RecoveryAction::Skip,
                RecoveryAction::Abort,
                RecoveryAction::Investigate,
            ]
        } else {
            vec![RecoveryAction::Abort, RecoveryAction::Investigate]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e001_is_recoverable() {
        let err = OrchestrationError::ForbiddenNavigation("P1->P3".into());
        assert_eq!(err.code(), ErrorCode::E001);
        assert!(err.recoverable());
    }

    #[test]
    fn e010_is_fatal_with_hardcoded_message() {
        let err = OrchestrationError::InferenceUnreachable("connection refused".into());
        assert_eq!(err.code(), ErrorCode::E010);
        assert!(!err.recoverable());
        assert!(ErrorCode::E010.hardcoded_message().is_some());
    }

    #[test]
    fn suspension_caps_solutions_at_three() {
        let err = OrchestrationError::UnknownAction("frobnicate".into());
        let s = SuspensionError::from_error(
            &err,
            "agent",
            "0003_S3P1",
            "S3P1X",
            "analysis".into(),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        );
        assert_eq!(s.solutions.len(), 3);
        assert!(s.options().contains(&RecoveryAction::Retry));
    }
}
