//! Reconstructed command events and their results

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::{ConnId, Value};

/// Kind of a reconstructed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Query,
    Prepare,
    Execute,
    Close,
    Handshake,
    Quit,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Query => "query",
            CommandKind::Prepare => "prepare",
            CommandKind::Execute => "execute",
            CommandKind::Close => "close",
            CommandKind::Handshake => "handshake",
            CommandKind::Quit => "quit",
        }
    }
}

/// Kind-specific payload of a command event.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// COM_QUERY with its statement text
    Query { text: String },
    /// COM_STMT_PREPARE, completed by the server's prepare-OK
    Prepare { stmt_id: u32, text: String, num_params: u16 },
    /// COM_STMT_EXECUTE with decoded parameters
    Execute { stmt_id: u32, text: String, params: Vec<Value> },
    /// COM_STMT_CLOSE; `text` is the closed statement's source when it was known
    Close { stmt_id: u32, text: String },
    /// Handshake response; `schema` is empty when the client connected without a database
    Handshake { schema: String, username: String },
    /// COM_QUIT
    Quit,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Query { .. } => CommandKind::Query,
            Command::Prepare { .. } => CommandKind::Prepare,
            Command::Execute { .. } => CommandKind::Execute,
            Command::Close { .. } => CommandKind::Close,
            Command::Handshake { .. } => CommandKind::Handshake,
            Command::Quit => CommandKind::Quit,
        }
    }

    /// Statement text carried by the command, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Command::Query { text }
            | Command::Prepare { text, .. }
            | Command::Execute { text, .. }
            | Command::Close { text, .. } => Some(text),
            Command::Handshake { .. } | Command::Quit => None,
        }
    }

    pub fn stmt_id(&self) -> Option<u32> {
        match self {
            Command::Prepare { stmt_id, .. }
            | Command::Execute { stmt_id, .. }
            | Command::Close { stmt_id, .. } => Some(*stmt_id),
            _ => None,
        }
    }
}

/// Column definition decoded from a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub charset: u16,
    pub length: u32,
    pub field_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl Column {
    /// True when the UNSIGNED column flag is set.
    pub fn is_unsigned(&self) -> bool {
        self.flags & crate::protocol::flags::column::UNSIGNED != 0
    }
}

/// Outcome of a command as observed in the captured traffic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureResult {
    pub error_code: u16,
    pub error_message: String,
    pub affected_rows: u64,
    pub insert_id: u64,
    pub status: u16,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub begin_ns: u64,
    pub end_ns: u64,
}

impl CaptureResult {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }
}

/// Outcome of executing a command against the live target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayResult {
    pub error_code: u16,
    pub error_message: String,
    /// Exact statement text executed on the target
    pub statement: String,
    /// Parameter values bound to the executed statement
    pub params: Vec<Value>,
    pub begin_ns: u64,
    pub end_ns: u64,
    /// Rows read back, each a complete ordered sequence of nullable display strings
    pub rows: Vec<Vec<Option<String>>>,
}

impl ReplayResult {
    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    /// Record a final error outcome.
    pub fn record_error(&mut self, code: u16, message: impl Into<String>) {
        self.error_code = code;
        self.error_message = message.into();
    }
}

#[derive(Serialize)]
struct ReplayResultFields<'a> {
    error_code: u16,
    error_message: &'a str,
    statement: &'a str,
    params: &'a [Value],
    begin_ns: u64,
    end_ns: u64,
    rows: &'a [Vec<Option<String>>],
}

/// A result without executed statement text serialises to an empty object.
///
/// Null columns serialise as JSON `null`, so they stay distinct from empty strings.
impl Serialize for ReplayResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.statement.is_empty() {
            return serializer.serialize_map(Some(0))?.end();
        }
        ReplayResultFields {
            error_code: self.error_code,
            error_message: &self.error_message,
            statement: &self.statement,
            params: &self.params,
            begin_ns: self.begin_ns,
            end_ns: self.end_ns,
            rows: &self.rows,
        }
        .serialize(serializer)
    }
}

/// One reconstructed logical command exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub conn: ConnId,
    /// Capture timestamp of the command's first frame, nanoseconds since the Unix epoch
    pub timestamp: u64,
    pub command: Command,
    pub captured: CaptureResult,
    pub replayed: ReplayResult,
}

impl CommandEvent {
    pub fn new(conn: ConnId, timestamp: u64, command: Command) -> Self {
        Self {
            conn,
            timestamp,
            command,
            captured: CaptureResult::default(),
            replayed: ReplayResult::default(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }
}

impl std::fmt::Display for CommandEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.conn, self.kind().as_str())?;
        if let Some(id) = self.command.stmt_id() {
            write!(f, " #{id}")?;
        }
        if let Some(text) = self.command.text() {
            write!(f, " {:?}", crate::logging::elide(text))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnId {
        ConnId::new("127.0.0.1:4000".parse().unwrap(), "127.0.0.1:3306".parse().unwrap())
    }

    #[test]
    fn replay_result_without_statement_is_empty_object() {
        let rr = ReplayResult { error_code: 1, ..Default::default() };
        assert_eq!(serde_json::to_string(&rr).unwrap(), "{}");
    }

    #[test]
    fn replay_result_keeps_null_distinct_from_empty() {
        let rr = ReplayResult {
            statement: "SELECT a, b".into(),
            rows: vec![vec![None, Some(String::new())]],
            ..Default::default()
        };
        let json = serde_json::to_value(&rr).unwrap();
        assert_eq!(json["rows"][0][0], serde_json::Value::Null);
        assert_eq!(json["rows"][0][1], serde_json::Value::String(String::new()));
    }

    #[test]
    fn command_accessors() {
        let cmd = Command::Execute { stmt_id: 7, text: "SELECT ?".into(), params: vec![] };
        assert_eq!(cmd.kind(), CommandKind::Execute);
        assert_eq!(cmd.stmt_id(), Some(7));
        assert_eq!(cmd.text(), Some("SELECT ?"));
        assert_eq!(Command::Quit.text(), None);
    }

    #[test]
    fn display_includes_kind_and_id() {
        let event = CommandEvent::new(conn(), 0, Command::Close { stmt_id: 3, text: String::new() });
        let rendered = event.to_string();
        assert!(rendered.contains("close #3"), "{rendered}");
    }
}
