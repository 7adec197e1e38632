//! Test utilities: protocol packet builders and a scripted replay target
//!
//! The builders produce payloads exactly as a MySQL client or server would put them on the
//! wire, so tests can feed the reconstruction state machine realistic frame sequences.
//! [`ScriptedDriver`] stands in for a live target: it records every call and plays back
//! scripted faults.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ConnectionLoss, ER_LOCK_WAIT_TIMEOUT};
use crate::protocol::flags::{capability, command, marker};
use crate::replay::{RowCollector, TargetConnection, TargetDriver};
use crate::{ConnId, Direction, Frame, ReplayError, Result, Value};

/// Connection identity `10.0.0.<n>:<40000 + n>` to `10.0.0.254:3306`.
pub fn test_conn(n: u8) -> ConnId {
    ConnId::new(
        format!("10.0.0.{}:{}", n, 40_000 + u16::from(n)).parse().expect("valid client address"),
        "10.0.0.254:3306".parse().expect("valid server address"),
    )
}

pub fn client_frame(seq: u8, payload: Vec<u8>) -> Frame {
    Frame::new(seq, Direction::ClientToServer, u64::from(seq), payload)
}

pub fn server_frame(seq: u8, payload: Vec<u8>) -> Frame {
    Frame::new(seq, Direction::ServerToClient, u64::from(seq), payload)
}

/// Split a message into frames of at most `max` bytes, starting at `start_seq`.
///
/// A message whose length is a multiple of `max` gets an empty terminator frame.
pub fn fragment(body: &[u8], max: usize, start_seq: u8, direction: Direction) -> Vec<Frame> {
    let mut frames: Vec<Frame> = body
        .chunks(max)
        .enumerate()
        .map(|(i, chunk)| Frame::new(start_seq.wrapping_add(i as u8), direction, 0, chunk.to_vec()))
        .collect();
    if body.len() % max == 0 {
        let seq = start_seq.wrapping_add(frames.len() as u8);
        frames.push(Frame::new(seq, direction, 0, Vec::new()));
    }
    frames
}

pub fn lenenc_int(value: u64) -> Vec<u8> {
    match value {
        0..=250 => vec![value as u8],
        251..=0xffff => {
            let mut out = vec![0xfc];
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out
        }
        0x1_0000..=0xff_ffff => {
            let mut out = vec![0xfd];
            out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
            out
        }
        _ => {
            let mut out = vec![0xfe];
            out.extend_from_slice(&value.to_le_bytes());
            out
        }
    }
}

pub fn lenenc_str(s: &str) -> Vec<u8> {
    let mut out = lenenc_int(s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out
}

fn request(command: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(command);
    out.extend_from_slice(body);
    out
}

pub fn query_request(sql: &str) -> Vec<u8> {
    request(command::QUERY, sql.as_bytes())
}

pub fn prepare_request(sql: &str) -> Vec<u8> {
    request(command::STMT_PREPARE, sql.as_bytes())
}

pub fn close_request(stmt_id: u32) -> Vec<u8> {
    request(command::STMT_CLOSE, &stmt_id.to_le_bytes())
}

pub fn quit_request() -> Vec<u8> {
    vec![command::QUIT]
}

fn execute_header(stmt_id: u32) -> Vec<u8> {
    let mut out = vec![command::STMT_EXECUTE];
    out.extend_from_slice(&stmt_id.to_le_bytes());
    out.push(0); // cursor flags
    out.extend_from_slice(&1u32.to_le_bytes());
    out
}

/// COM_STMT_EXECUTE that binds new parameter types.
///
/// Each parameter is `(field type, type flag, encoded value)`; `None` omits the parameter
/// block entirely.
pub fn execute_request(stmt_id: u32, null_bitmap: &[u8], params: Option<&[(u8, u8, Vec<u8>)]>) -> Vec<u8> {
    let mut out = execute_header(stmt_id);
    if let Some(params) = params {
        out.extend_from_slice(null_bitmap);
        out.push(1);
        for (field_type, flag, _) in params {
            out.push(*field_type);
            out.push(*flag);
        }
        for (_, _, value) in params {
            out.extend_from_slice(value);
        }
    }
    out
}

/// COM_STMT_EXECUTE that reuses previously bound parameter types.
pub fn execute_request_unbound(stmt_id: u32, null_bitmap: &[u8], values: &[u8]) -> Vec<u8> {
    let mut out = execute_header(stmt_id);
    out.extend_from_slice(null_bitmap);
    out.push(0);
    out.extend_from_slice(values);
    out
}

pub fn ok_packet(affected_rows: u64, insert_id: u64) -> Vec<u8> {
    let mut out = vec![marker::OK];
    out.extend(lenenc_int(affected_rows));
    out.extend(lenenc_int(insert_id));
    out.extend_from_slice(&[0x02, 0x00]); // autocommit
    out.extend_from_slice(&[0x00, 0x00]); // warnings
    out
}

pub fn err_packet(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut out = vec![marker::ERR];
    out.extend_from_slice(&code.to_le_bytes());
    out.push(marker::SQL_STATE);
    out.extend_from_slice(sql_state.as_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

pub fn eof_packet() -> Vec<u8> {
    vec![marker::EOF, 0x00, 0x00, 0x02, 0x00]
}

pub fn column_def(name: &str, field_type: u8, flags: u16) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "shop", "t", "t", name, name] {
        out.extend(lenenc_str(part));
    }
    out.push(0x0c);
    out.extend_from_slice(&33u16.to_le_bytes());
    out.extend_from_slice(&255u32.to_le_bytes());
    out.push(field_type);
    out.extend_from_slice(&flags.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Some(v) => out.extend(lenenc_str(v)),
            None => out.push(marker::NULL),
        }
    }
    out
}

/// Binary-protocol row; `values` holds the already encoded non-null values.
pub fn binary_row(nulls: &[bool], values: &[u8]) -> Vec<u8> {
    let mut bitmap = vec![0u8; (nulls.len() + 7 + 2) >> 3];
    for (i, _) in nulls.iter().enumerate().filter(|(_, null)| **null) {
        let bit = i + 2;
        bitmap[bit >> 3] |= 1 << (bit & 7);
    }
    let mut out = vec![marker::OK];
    out.extend(bitmap);
    out.extend_from_slice(values);
    out
}

pub fn prepare_ok(stmt_id: u32, columns: u16, params: u16) -> Vec<u8> {
    let mut out = vec![marker::OK];
    out.extend_from_slice(&stmt_id.to_le_bytes());
    out.extend_from_slice(&columns.to_le_bytes());
    out.extend_from_slice(&params.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Protocol v10 server greeting.
pub fn handshake_greeting() -> Vec<u8> {
    let mut out = vec![marker::HANDSHAKE_V10];
    out.extend_from_slice(b"8.0.36\0");
    out.extend_from_slice(&42u32.to_le_bytes());
    out.extend_from_slice(b"abcdefgh\0");
    out.extend_from_slice(&0xf7ffu16.to_le_bytes());
    out.push(33);
    out.extend_from_slice(&0x0002u16.to_le_bytes());
    out.extend_from_slice(&0x81ffu16.to_le_bytes());
    out.push(21);
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(b"ijklmnopqrst\0");
    out.extend_from_slice(b"mysql_native_password\0");
    out
}

/// Protocol 4.1 handshake response with a 20-byte scrambled password.
pub fn handshake_response(username: &str, schema: Option<&str>) -> Vec<u8> {
    let mut caps = capability::PROTOCOL_41 | capability::SECURE_CONNECTION;
    if schema.is_some() {
        caps |= capability::CONNECT_WITH_DB;
    }
    let mut out = caps.to_le_bytes().to_vec();
    out.extend_from_slice(&[0; 28]);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.push(20);
    out.extend_from_slice(&[0x5a; 20]);
    if let Some(schema) = schema {
        out.extend_from_slice(schema.as_bytes());
        out.push(0);
    }
    out
}

/// One call observed by [`ScriptedDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { schema: String },
    Query { sql: String },
    Prepare { sql: String },
    Execute { sql: String },
    CloseStatement { sql: String },
    Close,
}

impl Call {
    /// True for calls that reach the target after a connection is open.
    pub fn is_statement(&self) -> bool {
        matches!(self, Call::Query { .. } | Call::Prepare { .. } | Call::Execute { .. })
    }
}

/// A fault the scripted target returns instead of succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    LockWait,
    ConnectionClosed,
    Server(u16),
}

impl Fault {
    fn to_error(self) -> ReplayError {
        match self {
            Fault::LockWait => ReplayError::server(
                ER_LOCK_WAIT_TIMEOUT,
                "Lock wait timeout exceeded; try restarting transaction",
            ),
            Fault::ConnectionClosed => {
                ReplayError::connection_lost(ConnectionLoss::ConnectionClosed, "scripted connection closed")
            }
            Fault::Server(code) => ReplayError::server(code, format!("scripted server error {}", code)),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Call>,
    connect_faults: VecDeque<Fault>,
    prepare_faults: VecDeque<Fault>,
    statement_faults: VecDeque<Fault>,
    rows: Vec<Vec<Value>>,
}

/// Simulated replay target.
///
/// Every query and execute first returns the scripted rows and then, if a statement fault is
/// queued, fails with it; a retried attempt therefore sees partial rows that must be
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rows returned by every query and execute.
    pub fn with_rows(self, rows: Vec<Vec<Value>>) -> Self {
        self.lock().rows = rows;
        self
    }

    /// Fail the next `times` queries or executes with `fault`.
    pub fn fail_statements(&self, fault: Fault, times: usize) {
        self.lock().statement_faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn fail_prepares(&self, fault: Fault, times: usize) {
        self.lock().prepare_faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn fail_connects(&self, fault: Fault, times: usize) {
        self.lock().connect_faults.extend(std::iter::repeat_n(fault, times));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Connect { .. })).count()
    }

    /// Queries and executes whose text starts with `prefix`, in call order.
    pub fn statements_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Query { sql } | Call::Execute { sql } if sql.starts_with(prefix) => Some(sql),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    fn run_statement(&self, call: Call, rows: &mut RowCollector) -> Result<()> {
        let mut script = self.lock();
        script.calls.push(call);
        for row in script.rows.clone() {
            rows.push_row(row);
        }
        match script.statement_faults.pop_front() {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl TargetDriver for ScriptedDriver {
    type Conn = ScriptedConnection;

    async fn connect(&self, schema: &str) -> Result<ScriptedConnection> {
        tokio::task::yield_now().await;
        let fault = {
            let mut script = self.lock();
            script.calls.push(Call::Connect { schema: schema.to_string() });
            script.connect_faults.pop_front()
        };
        match fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(ScriptedConnection { driver: self.clone() }),
        }
    }
}

/// Prepared statement handle of the scripted target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedStatement {
    pub sql: String,
}

#[derive(Debug)]
pub struct ScriptedConnection {
    driver: ScriptedDriver,
}

#[async_trait::async_trait]
impl TargetConnection for ScriptedConnection {
    type Statement = ScriptedStatement;

    async fn query(&mut self, sql: &str, rows: &mut RowCollector) -> Result<()> {
        tokio::task::yield_now().await;
        self.driver.run_statement(Call::Query { sql: sql.to_string() }, rows)
    }

    async fn prepare(&mut self, sql: &str) -> Result<ScriptedStatement> {
        tokio::task::yield_now().await;
        let fault = {
            let mut script = self.driver.lock();
            script.calls.push(Call::Prepare { sql: sql.to_string() });
            script.prepare_faults.pop_front()
        };
        match fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(ScriptedStatement { sql: sql.to_string() }),
        }
    }

    async fn execute(
        &mut self,
        statement: &ScriptedStatement,
        _params: &[Value],
        rows: &mut RowCollector,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        self.driver.run_statement(Call::Execute { sql: statement.sql.clone() }, rows)
    }

    async fn close_statement(&mut self, statement: ScriptedStatement) -> Result<()> {
        self.driver.record(Call::CloseStatement { sql: statement.sql });
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.driver.record(Call::Close);
        Ok(())
    }
}
