//! Serialised form of a completed event

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::{CaptureResult, Command, CommandEvent, CommandKind, ReplayResult, Result, Value};

/// One persisted outcome, borrowed from the event it describes.
#[derive(Debug, Serialize)]
pub struct OutcomeRecord<'a> {
    pub kind: CommandKind,
    pub timestamp: u64,
    pub conn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stmt_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    #[serde(skip_serializing_if = "no_params")]
    pub params: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    pub captured: CapturedRecord<'a>,
    pub replayed: &'a ReplayResult,
}

fn no_params(params: &&[Value]) -> bool {
    params.is_empty()
}

impl<'a> OutcomeRecord<'a> {
    pub fn new(event: &'a CommandEvent) -> Self {
        let (params, schema, username) = match &event.command {
            Command::Execute { params, .. } => (params.as_slice(), None, None),
            Command::Handshake { schema, username } => (&[][..], Some(schema.as_str()), Some(username.as_str())),
            _ => (&[][..], None, None),
        };
        Self {
            kind: event.kind(),
            timestamp: event.timestamp,
            conn: event.conn.to_string(),
            stmt_id: event.command.stmt_id(),
            text: event.command.text(),
            params,
            schema,
            username,
            captured: CapturedRecord(&event.captured),
            replayed: &event.replayed,
        }
    }

    /// Serialise as a single JSON line, newline included.
    pub fn to_json_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Capture-side result; rows are keyed by column name when the names cover the row.
#[derive(Debug)]
pub struct CapturedRecord<'a>(&'a CaptureResult);

impl Serialize for CapturedRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let result = self.0;
        let names = result.column_names();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("error_code", &result.error_code)?;
        if !result.error_message.is_empty() {
            map.serialize_entry("error_message", &result.error_message)?;
        }
        map.serialize_entry("affected_rows", &result.affected_rows)?;
        map.serialize_entry("insert_id", &result.insert_id)?;
        map.serialize_entry("status", &result.status)?;
        if !names.is_empty() {
            map.serialize_entry("columns", &names)?;
        }
        map.serialize_entry("rows", &Rows { names: &names, rows: &result.rows })?;
        map.serialize_entry("begin_ns", &result.begin_ns)?;
        map.serialize_entry("end_ns", &result.end_ns)?;
        map.end()
    }
}

struct Rows<'a> {
    names: &'a [&'a str],
    rows: &'a [Vec<Value>],
}

impl Serialize for Rows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in self.rows {
            if self.names.len() == row.len() {
                seq.serialize_element(&KeyedRow { names: self.names, row })?;
            } else {
                seq.serialize_element(row)?;
            }
        }
        seq.end()
    }
}

struct KeyedRow<'a> {
    names: &'a [&'a str],
    row: &'a [Value],
}

impl Serialize for KeyedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.row.len()))?;
        for (name, value) in self.names.iter().zip(self.row) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Column;
    use crate::test_utils::test_conn;
    use serde_json::json;

    fn column(name: &str) -> Column {
        Column { name: name.into(), charset: 33, length: 11, field_type: 3, flags: 0, decimals: 0 }
    }

    #[test]
    fn rows_keyed_by_column_name() {
        let mut event = CommandEvent::new(test_conn(1), 5, Command::Query { text: "SELECT id, name FROM t".into() });
        event.captured.columns = vec![column("id"), column("name")];
        event.captured.rows = vec![vec![Value::Int(1), Value::Null]];

        let json = serde_json::to_value(OutcomeRecord::new(&event)).unwrap();
        assert_eq!(json["kind"], "query");
        assert_eq!(json["text"], "SELECT id, name FROM t");
        assert_eq!(json["captured"]["columns"], json!(["id", "name"]));
        assert_eq!(json["captured"]["rows"], json!([{ "id": 1, "name": null }]));
        assert_eq!(json["replayed"], json!({}));
    }

    #[test]
    fn mismatched_row_width_serialises_as_array() {
        let mut event = CommandEvent::new(test_conn(1), 5, Command::Query { text: "SELECT 1, 2".into() });
        event.captured.columns = vec![column("a")];
        event.captured.rows = vec![vec![Value::Int(1), Value::Int(2)]];

        let json = serde_json::to_value(OutcomeRecord::new(&event)).unwrap();
        assert_eq!(json["captured"]["rows"], json!([[1, 2]]));
    }

    #[test]
    fn execute_record_carries_params_and_replay() {
        let mut event = CommandEvent::new(
            test_conn(2),
            9,
            Command::Execute { stmt_id: 7, text: "SELECT ?".into(), params: vec![Value::UInt(255)] },
        );
        event.replayed.statement = "SELECT ?".into();
        event.replayed.params = vec![Value::UInt(255)];
        event.replayed.rows = vec![vec![Some("255".into())]];

        let line = OutcomeRecord::new(&event).to_json_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let json: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(json["stmt_id"], 7);
        assert_eq!(json["params"], json!([255]));
        assert_eq!(json["replayed"]["rows"], json!([["255"]]));
    }

    #[test]
    fn handshake_record_names_schema() {
        let event = CommandEvent::new(
            test_conn(3),
            1,
            Command::Handshake { schema: "shop".into(), username: "app".into() },
        );
        let json = serde_json::to_value(OutcomeRecord::new(&event)).unwrap();
        assert_eq!(json["schema"], "shop");
        assert_eq!(json["username"], "app");
        assert!(json.get("text").is_none());
        assert!(json.get("params").is_none());
    }
}
