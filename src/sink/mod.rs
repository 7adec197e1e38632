//! Persistence of completed events
//!
//! [`OutcomeSink`] writes each completed event of one connection, in order, as a JSON line
//! to the connection's rotating output artifact and optionally to its event log.

mod event_log;
mod record;
mod rotation;

pub use event_log::EventLog;
pub use record::{CapturedRecord, OutcomeRecord};
pub use rotation::{RotatingFile, RotationPolicy};

use crate::config::OutputConfig;
use crate::{CommandEvent, ConnId, Result};

#[derive(Debug)]
pub struct OutcomeSink {
    artifacts: RotatingFile,
    event_log: Option<EventLog>,
}

impl OutcomeSink {
    pub fn new(conn: &ConnId, output: &OutputConfig) -> Self {
        Self {
            artifacts: RotatingFile::new(
                &output.dir,
                output.archive_dir.clone(),
                conn.file_prefix(),
                RotationPolicy::from(output),
            ),
            event_log: output.event_log.then(|| EventLog::new(&output.dir, conn)),
        }
    }

    pub fn write(&mut self, event: &CommandEvent) -> Result<()> {
        let line = OutcomeRecord::new(event).to_json_line()?;
        self.artifacts.write(&line)?;
        if let Some(log) = self.event_log.as_mut() {
            log.append(&line)?;
        }
        Ok(())
    }

    /// Flush and archive the open artifact.
    pub fn close(mut self) {
        self.artifacts.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use crate::test_utils::test_conn;

    #[test]
    fn writes_artifact_and_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig { dir: dir.path().to_path_buf(), event_log: true, ..Default::default() };
        let conn = test_conn(4);
        let mut sink = OutcomeSink::new(&conn, &output);

        for text in ["BEGIN", "COMMIT"] {
            sink.write(&CommandEvent::new(conn, 1, Command::Query { text: text.into() })).unwrap();
        }
        sink.close();

        let mut artifact = None;
        let mut log = None;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.ends_with(".events.jsonl") {
                log = Some(path);
            } else if name.starts_with(&conn.file_prefix()) {
                artifact = Some(path);
            }
        }
        let artifact = std::fs::read_to_string(artifact.unwrap()).unwrap();
        let log = std::fs::read_to_string(log.unwrap()).unwrap();
        assert_eq!(artifact, log);
        let texts: Vec<String> = artifact
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["BEGIN", "COMMIT"]);
    }
}
