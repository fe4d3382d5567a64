//! Schedule-completion checkpoints (spec.md §6 disk layout:
//! `checkpoints/S<n>_complete.tar.gz`). A checkpoint is a tar.gz snapshot of
//! the tracked workspace files taken the moment a schedule's P3 is reached,
//! letting `restore.sh` jump straight to a schedule boundary instead of
//! replaying the whole diff chain.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::session::ScheduleId;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io { path: String, source: String },
    #[error("checkpoint for schedule {0} not found")]
    Missing(u8),
}

/// Writes and restores the per-schedule tarballs under a session's
/// `checkpoints/` directory.
pub struct CheckpointStore {
    checkpoints_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(session_root: impl Into<PathBuf>) -> Self {
        Self {
            checkpoints_dir: session_root.into().join("checkpoints"),
        }
    }

    fn path_for(&self, schedule: ScheduleId) -> PathBuf {
        self.checkpoints_dir
            .join(format!("S{}_complete.tar.gz", schedule.number()))
    }

    /// Archives `tracked` files (paths relative to `workspace_root`) into
    /// `checkpoints/S<n>_complete.tar.gz`. Implementers may start per
    /// schedule and add finer granularity later (spec.md §9 Open
    /// Questions); one tarball per completed schedule is the baseline.
    pub fn write(
        &self,
        schedule: ScheduleId,
        workspace_root: &Path,
        tracked: &[String],
    ) -> Result<PathBuf, CheckpointError> {
        std::fs::create_dir_all(&self.checkpoints_dir).map_err(io_err(&self.checkpoints_dir))?;
        let path = self.path_for(schedule);
        let temp_path = path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(io_err(&temp_path))?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let mut sorted = tracked.to_vec();
            sorted.sort();
            for rel in &sorted {
                let abs = workspace_root.join(rel);
                if abs.is_file() {
                    builder
                        .append_path_with_name(&abs, rel)
                        .map_err(|e| io_err(&abs)(io::Error::new(io::ErrorKind::Other, e)))?;
                }
            }
            builder
                .into_inner()
                .map_err(|e| io_err(&temp_path)(e))?
                .finish()
                .map_err(io_err(&temp_path))?;
        }

        std::fs::rename(&temp_path, &path).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Extracts a previously-written checkpoint into `dest_root`, overwriting
    /// any files it contains. Used by the restoration path when the target
    /// state is exactly a schedule boundary.
    pub fn restore(
        &self,
        schedule: ScheduleId,
        dest_root: &Path,
    ) -> Result<(), CheckpointError> {
        let path = self.path_for(schedule);
        if !path.exists() {
            return Err(CheckpointError::Missing(schedule.number()));
        }
        let file = File::open(&path).map_err(io_err(&path))?;
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(dest_root).map_err(io_err(dest_root))?;
        Ok(())
    }

    pub fn exists(&self, schedule: ScheduleId) -> bool {
        self.path_for(schedule).exists()
    }

    /// Lists the bytes of every tracked file without extracting to disk,
    /// used by tests and by diff-free integrity checks.
    pub fn read_entry(
        &self,
        schedule: ScheduleId,
        rel_path: &str,
    ) -> Result<Vec<u8>, CheckpointError> {
        let path = self.path_for(schedule);
        let file = File::open(&path).map_err(io_err(&path))?;
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        let entries = archive.entries().map_err(io_err(&path))?;
        for entry in entries {
            let mut entry = entry.map_err(io_err(&path))?;
            if entry.path().map_err(io_err(&path))?.to_string_lossy() == rel_path {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).map_err(io_err(&path))?;
                return Ok(buf);
            }
        }
        Err(CheckpointError::Missing(schedule.number()))
    }
}

fn io_err<P: AsRef<Path>>(path: P) -> impl Fn(io::Error) -> CheckpointError {
    let path = path.as_ref().display().to_string();
    move |e| CheckpointError::Io {
        path: path.clone(),
        source: e.to_string(),
    }
}
