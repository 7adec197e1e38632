//! Size and time rotated output artifacts
//!
//! Each connection writes to `<dir>/<prefix>.<n>`, where `n` comes from a process-wide
//! counter. An artifact is opened on first write and rotated after the write that takes it
//! past the size threshold or its age past the interval. Closed artifacts are flushed,
//! synced and moved to the archive directory when one is configured.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::{ReplayError, Result};

static ROTATION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_rotation() -> u64 {
    ROTATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// When an open artifact is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub interval: Duration,
}

impl RotationPolicy {
    fn is_due(&self, written: u64, opened_at: Instant) -> bool {
        written >= self.max_bytes || opened_at.elapsed() >= self.interval
    }
}

impl From<&OutputConfig> for RotationPolicy {
    fn from(config: &OutputConfig) -> Self {
        Self {
            max_bytes: config.max_file_bytes,
            interval: Duration::from_secs(config.rotate_interval_secs),
        }
    }
}

#[derive(Debug)]
struct Artifact {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    opened_at: Instant,
}

#[derive(Debug)]
pub struct RotatingFile {
    dir: PathBuf,
    archive_dir: Option<PathBuf>,
    prefix: String,
    policy: RotationPolicy,
    current: Option<Artifact>,
}

impl RotatingFile {
    pub fn new(
        dir: impl Into<PathBuf>,
        archive_dir: Option<PathBuf>,
        prefix: impl Into<String>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            dir: dir.into(),
            archive_dir,
            prefix: prefix.into(),
            policy,
            current: None,
        }
    }

    /// Path of the artifact currently open, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|a| a.path.as_path())
    }

    /// Append `bytes` to the open artifact, opening one first if needed.
    ///
    /// Failing to open an artifact is [`ReplayError::Persist`]; write failures are
    /// [`ReplayError::File`].
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let artifact = match self.current.take() {
            Some(artifact) => self.current.insert(artifact),
            None => {
                let artifact = self.open()?;
                self.current.insert(artifact)
            }
        };

        artifact
            .writer
            .write_all(bytes)
            .and_then(|_| artifact.writer.flush())
            .map_err(|e| ReplayError::file_error(artifact.path.clone(), e))?;
        artifact.written += bytes.len() as u64;

        if self.policy.is_due(artifact.written, artifact.opened_at) {
            self.finish();
        }
        Ok(())
    }

    fn open(&self) -> Result<Artifact> {
        let path = self.dir.join(format!("{}.{}", self.prefix, next_rotation()));
        let file = fs::create_dir_all(&self.dir)
            .and_then(|_| OpenOptions::new().create(true).write(true).truncate(true).open(&path))
            .map_err(|e| ReplayError::Persist {
                reason: format!("cannot open output file {}: {}", path.display(), e),
            })?;
        debug!(path = %path.display(), "Opened output file");
        Ok(Artifact { path, writer: BufWriter::new(file), written: 0, opened_at: Instant::now() })
    }

    /// Flush, sync and archive the open artifact.
    ///
    /// Failures are logged; the artifact is left where it is.
    pub fn finish(&mut self) {
        let Some(mut artifact) = self.current.take() else {
            return;
        };
        if let Err(e) = artifact.writer.flush().and_then(|_| artifact.writer.get_ref().sync_all()) {
            warn!(path = %artifact.path.display(), error = %e, "Failed to sync output file");
        }
        drop(artifact.writer);

        let Some(archive_dir) = &self.archive_dir else {
            return;
        };
        let Some(name) = artifact.path.file_name() else {
            return;
        };
        let target = archive_dir.join(name);
        match fs::create_dir_all(archive_dir).and_then(|_| fs::rename(&artifact.path, &target)) {
            Ok(()) => info!(
                from = %artifact.path.display(),
                to = %target.display(),
                bytes = artifact.written,
                "Archived output file"
            ),
            Err(e) => warn!(path = %artifact.path.display(), error = %e, "Failed to archive output file"),
        }
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        self.finish();
    }
}
