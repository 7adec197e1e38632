//! Per-connection append-only event log

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{ConnId, ReplayError, Result};

/// Appends one JSON line per event to `<dir>/<fingerprint>.events.jsonl`.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl EventLog {
    pub fn new(dir: &Path, conn: &ConnId) -> Self {
        Self { path: dir.join(format!("{}.events.jsonl", conn.fingerprint())), writer: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, line: &[u8]) -> Result<()> {
        let writer = match self.writer.take() {
            Some(writer) => self.writer.insert(writer),
            None => {
                let file = self
                    .path
                    .parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .and_then(|_| OpenOptions::new().create(true).append(true).open(&self.path))
                    .map_err(|e| ReplayError::file_error(self.path.clone(), e))?;
                self.writer.insert(BufWriter::new(file))
            }
        };
        writer
            .write_all(line)
            .and_then(|_| writer.flush())
            .map_err(|e| ReplayError::file_error(self.path.clone(), e))
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "Failed to flush event log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_conn;

    #[test]
    fn appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let conn = test_conn(1);

        let mut log = EventLog::new(dir.path(), &conn);
        log.append(b"{\"n\":1}\n").unwrap();
        drop(log);

        let mut log = EventLog::new(dir.path(), &conn);
        log.append(b"{\"n\":2}\n").unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        assert!(path.to_string_lossy().ends_with(".events.jsonl"));
        assert_eq!(fs::read_to_string(path).unwrap(), "{\"n\":1}\n{\"n\":2}\n");
    }
}
