//! Agent / EXECUTOR (spec.md §4.2). Turns streamed model output into
//! validated Actions, dispatches them to the Patch Engine in emission
//! order, and records outcomes. Never selects schedule or process.

use std::time::Instant;

use thiserror::Error;

use crate::action::{Action, ActionId, ActionIdGenerator, ActionKind, ActionOutcome};
use crate::errors::OrchestrationError;
use crate::patch_engine::{PatchEngine, PatchError, PatchOp, TransactionMode};
use crate::session::{ProcessId, ScheduleId};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("action parse failure: {0}")]
    ParseFailure(String),
    #[error("patch engine failure: {0}")]
    PatchFailure(#[from] PatchError),
    #[error("command failed with exit code {0}")]
    CommandFailed(i32),
    #[error("consultation timeout without permitted substitute")]
    ConsultationTimeout,
    #[error("agent attempted a role it does not own: {0}")]
    RoleViolation(#[from] OrchestrationError),
}

/// Output of running one process to completion (or to a non-`complete`
/// failure).
#[derive(Debug)]
pub struct ActionTrace {
    pub actions: Vec<Action>,
    pub completed: bool,
}

/// Incrementally parses the model's line-oriented action blocks. An action
/// is only yielded once its closing delimiter line (`@end`) is observed
/// for content-bearing actions, or immediately for single-line actions
/// (spec.md §4.2 "Action parsing").
#[derive(Debug, Default)]
pub struct ActionParser {
    pending: Option<PendingBlock>,
}

#[derive(Debug)]
struct PendingBlock {
    name: String,
    attrs: std::collections::HashMap<String, String>,
    body: Vec<String>,
}

/// Action names whose header line alone suffices -- no `@end`-delimited
/// body. Everything else (`create_file`, `edit_file`) carries its payload
/// as body lines until `@end`.
const SINGLE_LINE_ACTIONS: &[&str] = &[
    "delete_file",
    "create_dir",
    "delete_dir",
    "rename_file",
    "rename_dir",
    "move_file",
    "move_dir",
    "copy_file",
    "copy_dir",
    "run_command",
    "complete",
];

impl ActionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of streamed output. Returns `Some(ActionKind)` once a
    /// complete block has been observed.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<ActionKind>, AgentError> {
        if let Some(block) = &mut self.pending {
            if line.trim() == "@end" {
                let block = self.pending.take().unwrap();
                return Ok(Some(finish_block(block)?));
            }
            block.body.push(line.to_string());
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if !trimmed.starts_with('@') {
            // Non-action prose between blocks is ignored.
            return Ok(None);
        }

        let (name, attrs) = parse_header(trimmed)?;
        if !ActionKind::ALL_NAMES.contains(&name.as_str()) {
            return Err(AgentError::ParseFailure(format!("unknown action: {name}")));
        }

        if SINGLE_LINE_ACTIONS.contains(&name.as_str()) {
            return Ok(Some(finish_block(PendingBlock {
                name,
                attrs,
                body: Vec::new(),
            })?));
        }

        self.pending = Some(PendingBlock {
            name,
            attrs,
            body: Vec::new(),
        });
        Ok(None)
    }
}

fn parse_header(line: &str) -> Result<(String, std::collections::HashMap<String, String>), AgentError> {
    let without_at = &line[1..];
    let mut parts = without_at.splitn(2, ' ');
    let name = parts
        .next()
        .ok_or_else(|| AgentError::ParseFailure("empty header".into()))?
        .to_string();
    let mut attrs = std::collections::HashMap::new();
    if let Some(rest) = parts.next() {
        let mut chars = rest.chars().peekable();
        while chars.peek().is_some() {
            while chars.peek() == Some(&' ') {
                chars.next();
            }
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' {
                    break;
                }
                key.push(c);
                chars.next();
            }
            if chars.next() != Some('=') {
                break;
            }
            if chars.next() != Some('"') {
                return Err(AgentError::ParseFailure(format!("malformed attribute in: {rest}")));
            }
            let mut value = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
            attrs.insert(key, value);
        }
    }
    Ok((name, attrs))
}

fn finish_block(block: PendingBlock) -> Result<ActionKind, AgentError> {
    let attr = |key: &str| -> Result<String, AgentError> {
        block
            .attrs
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::ParseFailure(format!("{} missing attribute {key}", block.name)))
    };
    let content = block.body.join("\n");

    Ok(match block.name.as_str() {
        "create_file" => ActionKind::CreateFile {
            path: attr("path")?,
            content,
        },
        "edit_file" => ActionKind::EditFile {
            path: attr("path")?,
            content,
        },
        "delete_file" => ActionKind::DeleteFile { path: attr("path")? },
        "create_dir" => ActionKind::CreateDir { path: attr("path")? },
        "delete_dir" => ActionKind::DeleteDir { path: attr("path")? },
        "rename_file" => ActionKind::RenameFile {
            from: attr("from")?,
            to: attr("to")?,
        },
        "rename_dir" => ActionKind::RenameDir {
            from: attr("from")?,
            to: attr("to")?,
        },
        "move_file" => ActionKind::MoveFile {
            from: attr("from")?,
            to: attr("to")?,
        },
        "move_dir" => ActionKind::MoveDir {
            from: attr("from")?,
            to: attr("to")?,
        },
        "copy_file" => ActionKind::CopyFile {
            from: attr("from")?,
            to: attr("to")?,
        },
        "copy_dir" => ActionKind::CopyDir {
            from: attr("from")?,
            to: attr("to")?,
        },
        "run_command" => ActionKind::RunCommand {
            command: attr("command")?,
        },
        "complete" => ActionKind::Complete,
        other => return Err(AgentError::ParseFailure(format!("unknown action: {other}"))),
    })
}

/// Unified diff with three lines of context, plus a max-overlap merge of
/// adjacent hunks into reported line ranges (spec.md §4.2 "Diff policy").
pub struct DiffPolicy;

impl DiffPolicy {
    pub fn unified_diff(old: &str, new: &str, path: &str) -> String {
        similar::TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string()
    }

    /// Collapses hunks whose line ranges are adjacent or overlapping into
    /// a single merged range, matching the teacher's max-overlap merge
    /// used for reporting (spec.md §4.2).
    pub fn merge_line_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        ranges.sort_by_key(|r| r.0);
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (start, end) in ranges {
            if let Some(last) = merged.last_mut() {
                if start <= last.1 + 1 {
                    last.1 = last.1.max(end);
                    continue;
                }
            }
            merged.push((start, end));
        }
        merged
    }
}

/// The 1-based new-file line ranges touched by an edit, before merging,
/// used to populate `Action::line_ranges` (spec.md §4.2 "Diff policy").
fn changed_line_ranges(old: &str, new: &str) -> Vec<(usize, usize)> {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut ranges = Vec::new();
    for op in diff.ops() {
        let new_range = op.new_range();
        if op.tag() != similar::DiffTag::Equal && !new_range.is_empty() {
            ranges.push((new_range.start + 1, new_range.end));
        }
    }
    ranges
}

/// Executes one process by consuming parsed actions and dispatching them,
/// in order, to the Patch Engine.
pub struct Agent<'a> {
    patch_engine: &'a PatchEngine,
    id_generator: ActionIdGenerator,
}

impl<'a> Agent<'a> {
    pub fn new(patch_engine: &'a PatchEngine, starting_action_id: u32) -> Self {
        Self {
            patch_engine,
            id_generator: ActionIdGenerator::new(starting_action_id),
        }
    }

    /// Dispatch one already-parsed action. Each action is its own
    /// single-operation transaction, preserving the emission order
    /// guarantee (spec.md §5 "Ordering guarantees") without requiring the
    /// whole process's actions to commit as one batch.
    pub fn execute_one(
        &mut self,
        kind: ActionKind,
        schedule: ScheduleId,
        process: ProcessId,
    ) -> (Action, bool) {
        let id = self.id_generator.next_id();
        let mut action = Action::new(id, kind.clone(), schedule, process);
        let is_complete = kind.is_complete();

        if is_complete {
            action.outcome = Some(ActionOutcome::Succeeded);
            return (action, true);
        }

        let started = Instant::now();
        let pre_image = match &kind {
            ActionKind::EditFile { path, .. } => self.patch_engine.read_current(path),
            _ => None,
        };
        let outcome = if kind.is_filesystem_mutation() {
            self.run_filesystem_mutation(&kind)
        } else {
            self.run_command_action(&kind)
        };
        action.duration_ms = started.elapsed().as_millis() as u64;

        if let (ActionKind::EditFile { path, content }, ActionOutcome::Succeeded) = (&kind, &outcome) {
            let old = pre_image.unwrap_or_default();
            action.diff_ref = Some(DiffPolicy::unified_diff(&old, content, path));
            action.line_ranges = Some(DiffPolicy::merge_line_ranges(changed_line_ranges(&old, content)));
        }
        action.outcome = Some(outcome);
        (action, false)
    }

    fn run_filesystem_mutation(&self, kind: &ActionKind) -> ActionOutcome {
        let op = PatchOp::new(kind.clone());
        match self.patch_engine.apply(&[op], TransactionMode::default()) {
            Ok(_) => ActionOutcome::Succeeded,
            Err(e) => ActionOutcome::Failed { reason: e.to_string() },
        }
    }

    fn run_command_action(&self, kind: &ActionKind) -> ActionOutcome {
        let op = PatchOp::new(kind.clone());
        match self.patch_engine.apply(&[op], TransactionMode::default()) {
            Ok(report) => {
                if let Some(output) = report.command_outputs.first() {
                    ActionOutcome::CommandCompleted {
                        exit_code: output.exit_code,
                        stdout_tail: output.stdout_tail.clone(),
                        stderr_tail: output.stderr_tail.clone(),
                    }
                } else {
                    ActionOutcome::Succeeded
                }
            }
            Err(e) => ActionOutcome::Failed { reason: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_action_immediately() {
        let mut parser = ActionParser::new();
        let result = parser
            .feed_line(r#"@delete_file path="src/old.rs""#)
            .unwrap();
        assert_eq!(result, Some(ActionKind::DeleteFile { path: "src/old.rs".into() }));
    }

    #[test]
    fn parses_content_bearing_action_only_at_end_delimiter() {
        let mut parser = ActionParser::new();
        assert_eq!(
            parser.feed_line(r#"@create_file path="src/main.rs""#).unwrap(),
            None
        );
        assert_eq!(parser.feed_line("fn main() {}").unwrap(), None);
        let result = parser.feed_line("@end").unwrap();
        assert_eq!(
            result,
            Some(ActionKind::CreateFile {
                path: "src/main.rs".into(),
                content: "fn main() {}".into(),
            })
        );
    }

    #[test]
    fn unknown_action_name_is_a_parse_failure() {
        let mut parser = ActionParser::new();
        let err = parser.feed_line(r#"@frobnicate path="x""#).unwrap_err();
        assert!(matches!(err, AgentError::ParseFailure(_)));
    }

    #[test]
    fn merge_line_ranges_collapses_adjacent_hunks() {
        let merged = DiffPolicy::merge_line_ranges(vec![(1, 5), (6, 10), (20, 25)]);
        assert_eq!(merged, vec![(1, 10), (20, 25)]);
    }

    #[test]
    fn complete_action_signals_process_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = PatchEngine::new(dir.path().join("workspace"), dir.path().join("backups"));
        let mut agent = Agent::new(&engine, 0);
        let (action, completed) =
            agent.execute_one(ActionKind::Complete, ScheduleId::Implement, ProcessId::P1);
        assert!(completed);
        assert!(action.outcome.unwrap().is_success());
    }
}
