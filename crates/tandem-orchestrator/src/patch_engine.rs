//! Atomic multi-file patch engine (spec.md §4.3). The only component
//! permitted to mutate workspace files: validate -> backup -> apply ->
//! verify -> rollback-on-failure.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::action::ActionKind;

#[derive(Debug, Error, Clone)]
pub enum PatchError {
    #[error("empty path in batch")]
    EmptyPath,
    #[error("duplicate target in batch: {0}")]
    DuplicateTarget(String),
    #[error("absolute path not allowed: {0}")]
    AbsolutePath(String),
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),
    #[error("checksum mismatch for {path}: expected {expected}, found {found}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("io error on {path}: {source}")]
    Io { path: String, source: String },
    #[error("command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },
}

/// Invocation modes (spec.md §4.3 "Modes").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMode {
    pub dry_run: bool,
    pub no_backup: bool,
    pub force: bool,
}

/// One action in a batch, optionally declaring an expected pre-image
/// checksum (validated) and a post-image checksum (verified after apply).
#[derive(Debug, Clone)]
pub struct PatchOp {
    pub kind: ActionKind,
    pub expected_pre_checksum: Option<String>,
    pub expected_post_checksum: Option<String>,
}

impl PatchOp {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            expected_pre_checksum: None,
            expected_post_checksum: None,
        }
    }
}

/// One file or directory change the engine intends to make or made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub description: String,
    pub path: String,
}

/// Result of a committed (non-dry-run) transaction.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub transaction_id: String,
    pub changes: Vec<ChangeRecord>,
    pub command_outputs: Vec<CommandOutput>,
    pub rolled_back: bool,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration_ms: u64,
}

/// Transactional patch engine rooted at a workspace directory.
pub struct PatchEngine {
    workspace_root: PathBuf,
    backup_root: PathBuf,
}

impl PatchEngine {
    pub fn new(workspace_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Reads the current on-disk content of a workspace-relative path, if
    /// it exists. Used by the Agent's diff policy to capture a pre-image
    /// before an `edit_file` lands.
    pub fn read_current(&self, path: &str) -> Option<String> {
        let full = self.workspace_root.join(path);
        std::fs::read_to_string(full).ok()
    }

    /// `detect_conflict`: true when the current on-disk content diverges
    /// from the expected pre-image (spec.md §4.3 "Conflict detection").
    pub fn detect_conflict(&self, path: &str, expected_base_checksum: &str) -> bool {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(_) => return true,
        };
        match std::fs::read(&full) {
            Ok(bytes) => checksum_bytes(&bytes) != expected_base_checksum,
            Err(_) => true,
        }
    }

    /// Run a batch of actions as one all-or-nothing transaction.
    pub fn apply(
        &self,
        ops: &[PatchOp],
        mode: TransactionMode,
    ) -> Result<TransactionReport, PatchError> {
        let transaction_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();

        // 1. Validation pass (no I/O beyond pre-image checksum reads).
        self.validate(ops, mode)?;

        if mode.dry_run {
            let changes = ops.iter().map(|op| describe(&op.kind)).collect();
            return Ok(TransactionReport {
                transaction_id,
                changes,
                command_outputs: Vec::new(),
                rolled_back: false,
            });
        }

        // 2. Backup pass.
        let backup_dir = self.backup_root.join(&transaction_id);
        let mut backed_up: Vec<PathBuf> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        if !mode.no_backup {
            std::fs::create_dir_all(&backup_dir).map_err(|e| PatchError::Io {
                path: backup_dir.display().to_string(),
                source: e.to_string(),
            })?;
            for op in ops {
                for path in mutated_paths(&op.kind) {
                    let full = self.resolve(&path)?;
                    if full.exists() && !backed_up.contains(&full) {
                        self.backup_one(&full, &backup_dir)?;
                        backed_up.push(full);
                    }
                }
            }
        }

        // 3. Apply pass, in the supplied deterministic order.
        let mut changes = Vec::new();
        let mut command_outputs = Vec::new();
        let apply_result = (|| -> Result<(), PatchError> {
            for op in ops {
                self.apply_one(op, &mut created, &mut changes, &mut command_outputs)?;
            }
            Ok(())
        })();

        if let Err(e) = apply_result {
            self.rollback(&backup_dir, &backed_up, &created, mode.no_backup);
            tracing::warn!(transaction_id = %transaction_id, error = %e, "patch transaction rolled back");
            return Err(e);
        }

        // 4. Verify pass: re-checksum declared post-images.
        for op in ops {
            if let Some(expected) = &op.expected_post_checksum {
                if let Some(path) = written_path(&op.kind) {
                    let full = self.resolve(&path)?;
                    let actual = checksum_file(&full)?;
                    if &actual != expected {
                        self.rollback(&backup_dir, &backed_up, &created, mode.no_backup);
                        return Err(PatchError::ChecksumMismatch {
                            path,
                            expected: expected.clone(),
                            found: actual,
                        });
                    }
                }
            }
        }

        Ok(TransactionReport {
            transaction_id,
            changes,
            command_outputs,
            rolled_back: false,
        })
    }

    fn validate(&self, ops: &[PatchOp], mode: TransactionMode) -> Result<(), PatchError> {
        let mut seen: HashSet<String> = HashSet::new();
        for op in ops {
            for path in target_paths(&op.kind) {
                if path.is_empty() {
                    return Err(PatchError::EmptyPath);
                }
                if Path::new(&path).is_absolute() {
                    return Err(PatchError::AbsolutePath(path));
                }
                if has_traversal(&path) {
                    return Err(PatchError::PathTraversal(path));
                }
                if !seen.insert(path.clone()) && !mode.force {
                    return Err(PatchError::DuplicateTarget(path));
                }
            }
            if let Some(expected) = &op.expected_pre_checksum {
                if let Some(path) = pre_image_path(&op.kind) {
                    let full = self.resolve(&path)?;
                    if full.exists() {
                        let actual = checksum_file(&full)?;
                        if &actual != expected && !mode.force {
                            return Err(PatchError::ChecksumMismatch {
                                path,
                                expected: expected.clone(),
                                found: actual,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_one(
        &self,
        op: &PatchOp,
        created: &mut Vec<PathBuf>,
        changes: &mut Vec<ChangeRecord>,
        command_outputs: &mut Vec<CommandOutput>,
    ) -> Result<(), PatchError> {
        match &op.kind {
            ActionKind::CreateFile { path, content } => {
                let full = self.resolve(path)?;
                self.write_with_parents(&full, content.as_bytes())?;
                created.push(full);
                changes.push(ChangeRecord {
                    description: "create_file".into(),
                    path: path.clone(),
                });
            }
            ActionKind::EditFile { path, content } => {
                let full = self.resolve(path)?;
                self.write_with_parents(&full, content.as_bytes())?;
                changes.push(ChangeRecord {
                    description: "edit_file".into(),
                    path: path.clone(),
                });
            }
            ActionKind::DeleteFile { path } => {
                let full = self.resolve(path)?;
                if full.exists() {
                    std::fs::remove_file(&full).map_err(io_err(path))?;
                }
                changes.push(ChangeRecord {
                    description: "delete_file".into(),
                    path: path.clone(),
                });
            }
            ActionKind::CreateDir { path } => {
                let full = self.resolve(path)?;
                std::fs::create_dir_all(&full).map_err(io_err(path))?;
                created.push(full);
                changes.push(ChangeRecord {
                    description: "create_dir".into(),
                    path: path.clone(),
                });
            }
            ActionKind::DeleteDir { path } => {
                let full = self.resolve(path)?;
                if full.exists() {
                    std::fs::remove_dir_all(&full).map_err(io_err(path))?;
                }
                changes.push(ChangeRecord {
                    description: "delete_dir".into(),
                    path: path.clone(),
                });
            }
            ActionKind::RenameFile { from, to } | ActionKind::RenameDir { from, to } => {
                let full_from = self.resolve(from)?;
                let full_to = self.resolve(to)?;
                if let Some(parent) = full_to.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err(to))?;
                }
                std::fs::rename(&full_from, &full_to).map_err(io_err(from))?;
                changes.push(ChangeRecord {
                    description: "rename".into(),
                    path: to.clone(),
                });
            }
            ActionKind::MoveFile { from, to } | ActionKind::MoveDir { from, to } => {
                let full_from = self.resolve(from)?;
                let full_to = self.resolve(to)?;
                if let Some(parent) = full_to.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err(to))?;
                }
                std::fs::rename(&full_from, &full_to).map_err(io_err(from))?;
                changes.push(ChangeRecord {
                    description: "move".into(),
                    path: to.clone(),
                });
            }
            ActionKind::CopyFile { from, to } => {
                let full_from = self.resolve(from)?;
                let full_to = self.resolve(to)?;
                if let Some(parent) = full_to.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err(to))?;
                }
                std::fs::copy(&full_from, &full_to).map_err(io_err(from))?;
                created.push(full_to);
                changes.push(ChangeRecord {
                    description: "copy_file".into(),
                    path: to.clone(),
                });
            }
            ActionKind::CopyDir { from, to } => {
                let full_from = self.resolve(from)?;
                let full_to = self.resolve(to)?;
                copy_dir_recursive(&full_from, &full_to).map_err(io_err(from))?;
                created.push(full_to);
                changes.push(ChangeRecord {
                    description: "copy_dir".into(),
                    path: to.clone(),
                });
            }
            ActionKind::RunCommand { command } => {
                let output = self.run_command(command)?;
                command_outputs.push(output);
                changes.push(ChangeRecord {
                    description: "run_command".into(),
                    path: command.clone(),
                });
            }
            ActionKind::Complete => {}
        }
        Ok(())
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, PatchError> {
        let start = std::time::Instant::now();
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace_root)
            .output()
            .map_err(|e| PatchError::CommandFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;
        Ok(CommandOutput {
            command: command.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout_tail: tail(&String::from_utf8_lossy(&output.stdout), 4096),
            stderr_tail: tail(&String::from_utf8_lossy(&output.stderr), 4096),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn backup_one(&self, full: &Path, backup_dir: &Path) -> Result<(), PatchError> {
        let rel = full
            .strip_prefix(&self.workspace_root)
            .unwrap_or(full)
            .to_path_buf();
        let dest = backup_dir.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PatchError::Io {
                path: dest.display().to_string(),
                source: e.to_string(),
            })?;
        }
        std::fs::copy(full, &dest).map_err(|e| PatchError::Io {
            path: full.display().to_string(),
            source: e.to_string(),
        })?;
        Ok(())
    }

    fn rollback(
        &self,
        backup_dir: &Path,
        backed_up: &[PathBuf],
        created: &[PathBuf],
        no_backup: bool,
    ) {
        if !no_backup {
            for full in backed_up {
                let rel = full.strip_prefix(&self.workspace_root).unwrap_or(full);
                let src = backup_dir.join(rel);
                if src.exists() {
                    if let Some(parent) = full.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    let _ = std::fs::copy(&src, full);
                }
            }
        }
        for path in created {
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(path);
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, PatchError> {
        if relative.is_empty() {
            return Err(PatchError::EmptyPath);
        }
        Ok(self.workspace_root.join(relative))
    }

    fn write_with_parents(&self, full: &Path, bytes: &[u8]) -> Result<(), PatchError> {
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PatchError::Io {
                path: parent.display().to_string(),
                source: e.to_string(),
            })?;
        }
        std::fs::write(full, bytes).map_err(|e| PatchError::Io {
            path: full.display().to_string(),
            source: e.to_string(),
        })
    }

    /// Prune backups older than `max_age_days` (spec.md §4.3 "Retention").
    pub fn prune_backups(&self, max_age_days: u64) -> std::io::Result<usize> {
        let mut pruned = 0;
        if !self.backup_root.exists() {
            return Ok(0);
        }
        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days * 86_400);
        for entry in std::fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                if let Ok(modified) = meta.modified() {
                    if modified < cutoff {
                        std::fs::remove_dir_all(entry.path())?;
                        pruned += 1;
                    }
                }
            }
        }
        Ok(pruned)
    }
}

fn io_err(path: &str) -> impl Fn(std::io::Error) -> PatchError + '_ {
    move |e| PatchError::Io {
        path: path.to_string(),
        source: e.to_string(),
    }
}

fn describe(kind: &ActionKind) -> ChangeRecord {
    ChangeRecord {
        description: kind.name().to_string(),
        path: target_paths(kind).join(", "),
    }
}

fn target_paths(kind: &ActionKind) -> Vec<String> {
    match kind {
        ActionKind::CreateFile { path, .. }
        | ActionKind::DeleteFile { path }
        | ActionKind::CreateDir { path }
        | ActionKind::DeleteDir { path }
        | ActionKind::EditFile { path, .. } => vec![path.clone()],
        ActionKind::RenameFile { from, to }
        | ActionKind::RenameDir { from, to }
        | ActionKind::MoveFile { from, to }
        | ActionKind::MoveDir { from, to }
        | ActionKind::CopyFile { from, to }
        | ActionKind::CopyDir { from, to } => vec![from.clone(), to.clone()],
        ActionKind::RunCommand { .. } | ActionKind::Complete => vec![],
    }
}

fn mutated_paths(kind: &ActionKind) -> Vec<String> {
    match kind {
        ActionKind::EditFile { path, .. } | ActionKind::DeleteFile { path } => vec![path.clone()],
        ActionKind::RenameFile { from, .. } | ActionKind::MoveFile { from, .. } => {
            vec![from.clone()]
        }
        _ => vec![],
    }
}

fn pre_image_path(kind: &ActionKind) -> Option<String> {
    match kind {
        ActionKind::EditFile { path, .. } => Some(path.clone()),
        _ => None,
    }
}

fn written_path(kind: &ActionKind) -> Option<String> {
    match kind {
        ActionKind::CreateFile { path, .. } | ActionKind::EditFile { path, .. } => {
            Some(path.clone())
        }
        _ => None,
    }
}

fn has_traversal(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn checksum_file(path: &Path) -> Result<String, PatchError> {
    let bytes = std::fs::read(path).map_err(|e| PatchError::Io {
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    Ok(checksum_bytes(&bytes))
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        s[s.len() - max_bytes..].to_string()
    }
}

/// Minimal hex encoding to avoid pulling in an extra crate for sha256 digests.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &Path) -> PatchEngine {
        PatchEngine::new(dir.join("workspace"), dir.join("backups"))
    }

    #[test]
    fn create_then_edit_round_trips() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());

        engine
            .apply(
                &[PatchOp::new(ActionKind::CreateFile {
                    path: "a.txt".into(),
                    content: "hello".into(),
                })],
                TransactionMode::default(),
            )
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("workspace/a.txt")).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn rollback_on_mid_batch_failure_restores_pre_image() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());

        // forbidden/x is a path-traversal-free but nonexistent-parent path;
        // to force a real apply-phase failure we target an edit on a path
        // whose parent is actually a file, causing create_dir_all to fail.
        std::fs::write(dir.path().join("workspace/blocker"), b"x").unwrap();

        let ops = vec![
            PatchOp::new(ActionKind::CreateFile {
                path: "a.txt".into(),
                content: "1".into(),
            }),
            PatchOp::new(ActionKind::CreateFile {
                path: "b.txt".into(),
                content: "2".into(),
            }),
            PatchOp::new(ActionKind::EditFile {
                path: "blocker/x".into(),
                content: "3".into(),
            }),
        ];

        let result = engine.apply(&ops, TransactionMode::default());
        assert!(result.is_err());
        assert!(!dir.path().join("workspace/a.txt").exists());
        assert!(!dir.path().join("workspace/b.txt").exists());
    }

    #[test]
    fn duplicate_targets_are_rejected_in_validation() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());
        let ops = vec![
            PatchOp::new(ActionKind::CreateFile {
                path: "a.txt".into(),
                content: "1".into(),
            }),
            PatchOp::new(ActionKind::DeleteFile { path: "a.txt".into() }),
        ];
        let err = engine.apply(&ops, TransactionMode::default()).unwrap_err();
        assert!(matches!(err, PatchError::DuplicateTarget(_)));
    }

    #[test]
    fn absolute_and_traversal_paths_rejected() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());

        let abs = engine.apply(
            &[PatchOp::new(ActionKind::CreateFile {
                path: "/etc/passwd".into(),
                content: "x".into(),
            })],
            TransactionMode::default(),
        );
        assert!(matches!(abs, Err(PatchError::AbsolutePath(_))));

        let trav = engine.apply(
            &[PatchOp::new(ActionKind::CreateFile {
                path: "../escape.txt".into(),
                content: "x".into(),
            })],
            TransactionMode::default(),
        );
        assert!(matches!(trav, Err(PatchError::PathTraversal(_))));
    }

    #[test]
    fn dry_run_performs_no_io() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());
        let report = engine
            .apply(
                &[PatchOp::new(ActionKind::CreateFile {
                    path: "a.txt".into(),
                    content: "hi".into(),
                })],
                TransactionMode {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(report.changes.len(), 1);
        assert!(!dir.path().join("workspace/a.txt").exists());
    }

    #[test]
    fn detect_conflict_flags_out_of_band_edits() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workspace")).unwrap();
        let engine = engine(dir.path());
        std::fs::write(dir.path().join("workspace/a.txt"), b"original").unwrap();
        let original_sum = checksum_bytes(b"original");
        assert!(!engine.detect_conflict("a.txt", &original_sum));

        std::fs::write(dir.path().join("workspace/a.txt"), b"tampered").unwrap();
        assert!(engine.detect_conflict("a.txt", &original_sum));
    }
}
