//! The closed Action set (spec.md §3 Action, §9 "Dynamic dispatch on action
//! type"). Thirteen constructors, tagged, dispatched via match — no open
//! inheritance hierarchy.

use serde::{Deserialize, Serialize};

use crate::session::{ProcessId, ScheduleId};

/// A monotonically increasing action id, formatted `A0001`, `A0002`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u32);

impl ActionId {
    pub fn as_tag(&self) -> String {
        format!("A{:04}", self.0)
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// The closed enumeration of permitted agent effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    CreateFile { path: String, content: String },
    DeleteFile { path: String },
    CreateDir { path: String },
    DeleteDir { path: String },
    RenameFile { from: String, to: String },
    RenameDir { from: String, to: String },
    MoveFile { from: String, to: String },
    MoveDir { from: String, to: String },
    CopyFile { from: String, to: String },
    CopyDir { from: String, to: String },
    EditFile { path: String, content: String },
    RunCommand { command: String },
    Complete,
}

impl ActionKind {
    /// The action's canonical block name, as it appears in the model's
    /// line-oriented output (spec.md §4.2 "Action parsing").
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::CreateFile { .. } => "create_file",
            ActionKind::DeleteFile { .. } => "delete_file",
            ActionKind::CreateDir { .. } => "create_dir",
            ActionKind::DeleteDir { .. } => "delete_dir",
            ActionKind::RenameFile { .. } => "rename_file",
            ActionKind::RenameDir { .. } => "rename_dir",
            ActionKind::MoveFile { .. } => "move_file",
            ActionKind::MoveDir { .. } => "move_dir",
            ActionKind::CopyFile { .. } => "copy_file",
            ActionKind::CopyDir { .. } => "copy_dir",
            ActionKind::EditFile { .. } => "edit_file",
            ActionKind::RunCommand { .. } => "run_command",
            ActionKind::Complete => "complete",
        }
    }

    /// `complete` is the only non-mutating action; it is the sole control
    /// transfer back to the Orchestrator.
    pub fn is_complete(&self) -> bool {
        matches!(self, ActionKind::Complete)
    }

    /// Whether this action mutates the filesystem (routed to the patch
    /// engine) as opposed to the shell executor or a no-op control signal.
    pub fn is_filesystem_mutation(&self) -> bool {
        !matches!(self, ActionKind::RunCommand { .. } | ActionKind::Complete)
    }

    pub const ALL_NAMES: &'static [&'static str] = &[
        "create_file",
        "delete_file",
        "create_dir",
        "delete_dir",
        "rename_file",
        "rename_dir",
        "move_file",
        "move_dir",
        "copy_file",
        "copy_dir",
        "edit_file",
        "run_command",
        "complete",
    ];
}

/// The outcome of executing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed { reason: String },
    /// `run_command` outcome: exit code, stdout/stderr tail.
    CommandCompleted {
        exit_code: i32,
        stdout_tail: String,
        stderr_tail: String,
    },
    Cancelled,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Succeeded
                | ActionOutcome::CommandCompleted { exit_code: 0, .. }
        )
    }
}

/// A recorded action: the kind plus all stamped metadata (spec.md §3 Action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub schedule: ScheduleId,
    pub process: ProcessId,
    pub duration_ms: u64,
    pub outcome: Option<ActionOutcome>,
    /// Unified-diff reference for `edit_file`/`create_file`, populated by the
    /// Agent's diff policy (spec.md §4.2 "Diff policy").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_ref: Option<String>,
    /// Merged line-range summary for `edit_file` (max-overlap merging).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_ranges: Option<Vec<(usize, usize)>>,
}

impl Action {
    pub fn new(id: ActionId, kind: ActionKind, schedule: ScheduleId, process: ProcessId) -> Self {
        Self {
            id,
            kind,
            timestamp: chrono::Utc::now(),
            schedule,
            process,
            duration_ms: 0,
            outcome: None,
            diff_ref: None,
            line_ranges: None,
        }
    }
}

/// Generates monotonically increasing action ids for one session.
#[derive(Debug, Default)]
pub struct ActionIdGenerator {
    next: u32,
}

impl ActionIdGenerator {
    pub fn new(starting_from: u32) -> Self {
        Self { next: starting_from }
    }

    pub fn next_id(&mut self) -> ActionId {
        self.next += 1;
        ActionId(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_id_formats_with_zero_padding() {
        assert_eq!(ActionId(7).as_tag(), "A0007");
        assert_eq!(ActionId(1234).as_tag(), "A1234");
    }

    #[test]
    fn generator_is_monotonic() {
        let mut gen = ActionIdGenerator::new(0);
        assert_eq!(gen.next_id(), ActionId(1));
        assert_eq!(gen.next_id(), ActionId(2));
    }

    #[test]
    fn complete_is_the_only_non_mutating_control_action() {
        assert!(ActionKind::Complete.is_complete());
        assert!(!ActionKind::CreateFile {
            path: "a".into(),
            content: String::new()
        }
        .is_complete());
        assert!(!ActionKind::RunCommand {
            command: "ls".into()
        }
        .is_filesystem_mutation());
    }

    #[test]
    fn all_names_enumerates_thirteen_constructors() {
        assert_eq!(ActionKind::ALL_NAMES.len(), 13);
    }
}
