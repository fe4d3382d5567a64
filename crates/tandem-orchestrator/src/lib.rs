//! Unified Orchestration Protocol (UOP) core: the Orchestrator/Agent state
//! machine, the atomic patch engine, and the session persistence layer
//! (spec.md §1). Everything explicitly out of scope there -- the inference
//! server's wire protocol, the terminal UI, the repository indexer, the
//! LLM-as-judge evaluator, git hosting, and shell tool wrappers -- is
//! consumed only through the traits this crate defines, never reimplemented
//! here.

pub mod action;
pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod consultation;
pub mod errors;
pub mod inference;
pub mod model_coordinator;
pub mod monitor;
pub mod orchestrator;
pub mod patch_engine;
pub mod scheduler;
pub mod session;
pub mod store;

pub use action::{Action, ActionId, ActionKind, ActionOutcome};
pub use agent::{Agent, ActionParser, ActionTrace, AgentError, DiffPolicy};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use config::OrchestratorConfig;
pub use consultation::{ConsultationHandler, ConsultationOptions, ConsultationResponse};
pub use errors::{ErrorCode, OrchestrationError, RecoveryAction, Severity, SuspensionError};
pub use inference::{ChatMessage, CompletionRequest, HttpInferenceClient, InferenceClient};
pub use model_coordinator::{ModelCoordinator, Role};
pub use monitor::{LimitCheck, ResourceLimits, ResourceSnapshot};
pub use orchestrator::{NullObservers, Orchestrator, OrchestratorObservers, TerminationOutcome};
pub use patch_engine::{PatchEngine, PatchOp, TransactionMode};
pub use scheduler::ProcessNavigator;
pub use session::{Note, NoteSource, NoteStream, Process, ProcessId, ScheduleId, Session, State};
pub use store::SessionStore;
