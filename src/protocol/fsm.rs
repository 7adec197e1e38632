//! Per-connection protocol session
//!
//! [`Session`] consumes the ordered frames of one connection and reconstructs the logical
//! command exchanges in them. Frames are buffered per command: a sequence-0 frame starts a
//! new command, each following frame must carry the next sequence number, and a gap moves
//! the session to [`State::SkipPacket`] until the next sequence-0 frame.
//!
//! Events are emitted when a command is complete:
//!
//! | Command         | Emitted on                                          |
//! |-----------------|-----------------------------------------------------|
//! | query / execute | the end of the server's result                      |
//! | prepare         | the server's prepare-OK; the descriptor is learned |
//! | close           | the request; the descriptor is forgotten            |
//! | quit            | the request; the session becomes terminal           |
//! | handshake       | the client's handshake response                     |

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use super::codec::Reader;
use super::flags::command;
use super::handshake::{decode_handshake_response, is_greeting};
use super::params::decode_execute_params;
use super::resultset::{ResultDecoder, RowFormat};
use super::state::State;
use crate::logging::elide;
use crate::types::MAX_PAYLOAD_LEN;
use crate::{CaptureResult, Command, CommandEvent, ConnId, Direction, Frame, ReplayError, Result};

/// Prepared statement descriptor as learned from the captured traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub id: u32,
    pub text: String,
    pub num_params: u16,
    /// Two bytes per parameter, learned from the first execute that binds types
    pub param_types: Option<Vec<u8>>,
}

/// Reassemble the logical message starting at buffer index `k`.
///
/// Consecutive frames from `k` that fill the fragmentation boundary are joined with the
/// first shorter frame that terminates them. Returns the joined payload and the number of
/// frames it spans, or `None` when the message is not fully buffered yet.
pub fn load(frames: &[Frame], k: usize, max_frame_size: usize) -> Option<(Vec<u8>, usize)> {
    let rest = frames.get(k..)?;
    let end = rest.iter().position(|f| !f.is_max_size(max_frame_size))?;
    let group = &rest[..=end];
    let mut body = Vec::with_capacity(group.iter().map(Frame::len).sum());
    for frame in group {
        body.extend_from_slice(&frame.payload);
    }
    Some((body, group.len()))
}

/// Statement id and parameter count of a prepare-OK body.
fn decode_prepare_ok(body: &[u8]) -> Result<(u32, u16)> {
    let mut r = Reader::new(body);
    r.skip(1)?;
    let stmt_id = r.u32_le()?;
    let _columns = r.u16_le()?;
    let num_params = r.u16_le()?;
    Ok((stmt_id, num_params))
}

/// True when `query` is a SELECT statement (leading spaces skipped, case-insensitive).
pub fn is_select(query: &str) -> bool {
    let trimmed = query.trim_start_matches(' ');
    trimmed.len() >= 6 && trimmed.as_bytes()[..6].eq_ignore_ascii_case(b"select")
}

/// Protocol reconstruction state machine for one connection.
#[derive(Debug)]
pub struct Session {
    conn: ConnId,
    state: State,
    frames: Vec<Frame>,
    max_frame_size: usize,
    begin_ns: u64,
    /// Buffer index of the first response frame
    response_start: usize,
    pending: Option<Command>,
    decoder: Option<ResultDecoder>,
    statements: HashMap<u32, PreparedStatement>,
    schema: String,
    username: String,
}

impl Session {
    pub fn new(conn: ConnId) -> Self {
        Self {
            conn,
            state: State::Init,
            frames: Vec::new(),
            max_frame_size: MAX_PAYLOAD_LEN,
            begin_ns: 0,
            response_start: 0,
            pending: None,
            decoder: None,
            statements: HashMap::new(),
            schema: String::new(),
            username: String::new(),
        }
    }

    /// Override the fragmentation boundary.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.max(1);
        self
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Schema from the most recent handshake response.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn statement(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    pub fn statements(&self) -> impl Iterator<Item = &PreparedStatement> {
        self.statements.values()
    }

    /// Frames buffered for the current command.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Reassemble the buffered message starting at index `k`.
    pub fn load(&self, k: usize) -> Option<(Vec<u8>, usize)> {
        load(&self.frames, k, self.max_frame_size)
    }

    fn next_seq(&self) -> u8 {
        self.frames.last().map_or(0, |f| f.seq.wrapping_add(1))
    }

    fn ready(&self) -> bool {
        self.frames.last().is_some_and(|f| !f.is_max_size(self.max_frame_size))
    }

    /// Feed the next frame; returns the command event it completes, if any.
    pub fn handle(&mut self, frame: Frame) -> Option<CommandEvent> {
        if self.state.is_terminal() {
            return None;
        }

        if frame.seq == 0 && !self.state.is_reading() {
            self.reset(frame.timestamp);
            self.frames.push(frame);
        } else if frame.seq == self.next_seq() && !self.frames.is_empty() {
            self.frames.push(frame);
        } else {
            trace!(
                conn = %self.conn,
                expected = self.next_seq(),
                got = frame.seq,
                state = %self.state,
                "Frame out of sequence"
            );
            self.transition(State::SkipPacket);
            return None;
        }

        if !self.ready() {
            trace!(conn = %self.conn, frames = self.frames.len(), "Waiting for more fragments");
            return None;
        }

        match self.state {
            State::Init => self.classify(),
            State::ComStmtPrepareRequest => self.prepare_response(),
            State::HandshakeRequest => self.handshake_response(),
            State::ComQuery | State::ComQueryReading => {
                self.read_result(State::ComQueryReading, State::ComQueryDone)
            }
            State::ComStmtExecute | State::ComStmtExecuteReading => {
                self.read_result(State::ComStmtExecuteReading, State::ComStmtExecuteDone)
            }
            _ => None,
        }
    }

    fn reset(&mut self, begin_ns: u64) {
        self.frames.clear();
        self.pending = None;
        self.decoder = None;
        self.response_start = 0;
        self.begin_ns = begin_ns;
        self.state = State::Init;
    }

    fn transition(&mut self, to: State) {
        let from = self.state;
        self.state = to;
        if from != to {
            debug!(conn = %self.conn, from = %from, to = %to, "Session state changed");
        }
    }

    fn unknown(&mut self, reason: impl std::fmt::Display) -> Option<CommandEvent> {
        warn!(conn = %self.conn, from = %self.state, reason = %reason, "Moving session to Unknown");
        self.state = State::Unknown;
        None
    }

    fn emit(&self, command: Command, captured: CaptureResult) -> CommandEvent {
        let mut event = CommandEvent::new(self.conn, self.begin_ns, command);
        event.captured = captured;
        event.captured.begin_ns = self.begin_ns;
        if event.captured.end_ns == 0 {
            event.captured.end_ns = self.frames.last().map_or(self.begin_ns, |f| f.timestamp);
        }
        event
    }

    fn classify(&mut self) -> Option<CommandEvent> {
        let Some((body, consumed)) = self.load(0) else {
            return self.unknown("init: cannot load packet");
        };
        self.response_start = consumed;
        let direction = self.frames[0].direction;

        match (direction, body.first().copied()) {
            (Direction::ClientToServer, Some(command::QUERY)) => {
                let text = String::from_utf8_lossy(&body[1..]).into_owned();
                debug!(conn = %self.conn, query = %elide(&text), "COM_QUERY");
                self.pending = Some(Command::Query { text });
                self.decoder = Some(ResultDecoder::new(RowFormat::Text, consumed));
                self.transition(State::ComQuery);
                None
            }
            (Direction::ClientToServer, Some(command::STMT_EXECUTE)) => {
                match self.decode_execute(&body[1..]) {
                    Ok(command) => {
                        debug!(conn = %self.conn, stmt_id = ?command.stmt_id(), "COM_STMT_EXECUTE");
                        self.pending = Some(command);
                        self.decoder = Some(ResultDecoder::new(RowFormat::Binary, consumed));
                        self.transition(State::ComStmtExecute);
                        None
                    }
                    Err(err) => self.unknown(format!("stmt execute: {}", err)),
                }
            }
            (Direction::ClientToServer, Some(command::STMT_PREPARE)) => {
                let text = String::from_utf8_lossy(&body[1..]).into_owned();
                debug!(conn = %self.conn, query = %elide(&text), "COM_STMT_PREPARE");
                self.pending = Some(Command::Prepare { stmt_id: 0, text, num_params: 0 });
                self.transition(State::ComStmtPrepareRequest);
                None
            }
            (Direction::ClientToServer, Some(command::STMT_CLOSE)) => {
                let stmt_id = match Reader::new(&body[1..]).u32_le() {
                    Ok(id) => id,
                    Err(err) => return self.unknown(format!("stmt close: cannot read stmt id: {}", err)),
                };
                let text = self.statements.remove(&stmt_id).map(|s| s.text).unwrap_or_default();
                self.transition(State::ComStmtClose);
                Some(self.emit(Command::Close { stmt_id, text }, CaptureResult::default()))
            }
            (Direction::ClientToServer, Some(command::QUIT)) => {
                self.transition(State::ComQuit);
                Some(self.emit(Command::Quit, CaptureResult::default()))
            }
            (Direction::ServerToClient, _) if is_greeting(&body) => {
                self.transition(State::HandshakeRequest);
                None
            }
            (Direction::ClientToServer, Some(byte)) => {
                self.unknown(format!("init: skip client command(0x{:02x})", byte))
            }
            _ => self.unknown("init: unsupported packet"),
        }
    }

    /// COM_STMT_EXECUTE body after the command byte.
    fn decode_execute(&mut self, data: &[u8]) -> Result<Command> {
        let mut r = Reader::new(data);
        let stmt_id = r.u32_le()?;
        let stmt = self
            .statements
            .get_mut(&stmt_id)
            .ok_or_else(|| ReplayError::decode("Execute request", format!("unknown stmt id {}", stmt_id)))?;
        // flags (1) and iteration count (4)
        r.skip(5)?;

        let num_params = stmt.num_params as usize;
        let mut params = Vec::new();
        if num_params > 0 {
            let null_bitmap = r.bytes((num_params + 7) >> 3)?;
            if r.u8()? == 1 {
                stmt.param_types = Some(r.bytes(num_params << 1)?.to_vec());
            }
            let types = stmt
                .param_types
                .as_deref()
                .ok_or_else(|| ReplayError::decode("Execute request", "param types is missing"))?;
            params = decode_execute_params(num_params, null_bitmap, types, r.rest())?;
        }
        Ok(Command::Execute { stmt_id, text: stmt.text.clone(), params })
    }

    fn prepare_response(&mut self) -> Option<CommandEvent> {
        let Some((body, _)) = self.load(self.response_start) else {
            return self.unknown("stmt prepare: cannot load packet");
        };
        if self.frames[self.response_start].direction != Direction::ServerToClient {
            return self.unknown("stmt prepare: unexpected packet direction");
        }
        if body.first() != Some(&0) {
            info!(conn = %self.conn, "Prepare failed on the captured server");
            return self.unknown("stmt prepare: not ok");
        }

        let (stmt_id, num_params) = match decode_prepare_ok(&body) {
            Ok(v) => v,
            Err(err) => return self.unknown(format!("stmt prepare: {}", err)),
        };

        let text = match self.pending.take() {
            Some(Command::Prepare { text, .. }) => text,
            _ => String::new(),
        };
        self.statements.insert(
            stmt_id,
            PreparedStatement { id: stmt_id, text: text.clone(), num_params, param_types: None },
        );
        self.transition(State::ComStmtPrepareResponse);
        Some(self.emit(Command::Prepare { stmt_id, text, num_params }, CaptureResult::default()))
    }

    fn handshake_response(&mut self) -> Option<CommandEvent> {
        let Some((body, _)) = self.load(self.response_start) else {
            return self.unknown("handshake: cannot load packet");
        };
        if self.frames[self.response_start].direction != Direction::ClientToServer {
            return self.unknown("handshake: unexpected packet direction");
        }
        match decode_handshake_response(&body) {
            Ok(hs) => {
                self.schema = hs.schema.clone();
                self.username = hs.username.clone();
                self.transition(State::HandshakeResponse);
                info!(conn = %self.conn, schema = %self.schema, username = %self.username, "Handshake");
                Some(self.emit(
                    Command::Handshake { schema: hs.schema, username: hs.username },
                    CaptureResult::default(),
                ))
            }
            Err(err) => self.unknown(format!("handshake: {}", err)),
        }
    }

    fn read_result(&mut self, reading: State, done: State) -> Option<CommandEvent> {
        self.transition(reading);
        let Some(decoder) = self.decoder.as_mut() else {
            return self.unknown("result: no pending command");
        };
        if !decoder.advance(&self.frames, self.max_frame_size) {
            return None;
        }
        let captured = self.decoder.take().map(ResultDecoder::into_result).unwrap_or_default();
        let Some(command) = self.pending.take() else {
            return self.unknown("result: no pending command");
        };
        self.transition(done);
        Some(self.emit(command, captured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use crate::protocol::flags::field_type as ft;
    use crate::test_utils::*;
    use proptest::prelude::*;

    fn session() -> Session {
        Session::new(test_conn(1))
    }

    fn feed(session: &mut Session, frames: Vec<Frame>) -> Vec<CommandEvent> {
        frames.into_iter().filter_map(|f| session.handle(f)).collect()
    }

    fn select_one_frames() -> Vec<Frame> {
        vec![
            client_frame(0, query_request("SELECT 1")),
            server_frame(1, lenenc_int(1)),
            server_frame(2, column_def("1", ft::LONGLONG, 0)),
            server_frame(3, eof_packet()),
            server_frame(4, text_row(&[Some("1")])),
            server_frame(5, eof_packet()),
        ]
    }

    #[test]
    fn query_with_result_set() {
        let mut s = session();
        let events = feed(&mut s, select_one_frames());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.command, Command::Query { text: "SELECT 1".into() });
        assert_eq!(event.captured.rows, vec![vec![Value::Text("1".into())]]);
        assert_eq!(s.state(), State::ComQueryDone);
    }

    #[test]
    fn query_with_ok() {
        let mut s = session();
        let events = feed(
            &mut s,
            vec![client_frame(0, query_request("UPDATE t SET a = 1")), server_frame(1, ok_packet(5, 0))],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].captured.affected_rows, 5);
    }

    #[test]
    fn out_of_sequence_frame_skips_and_resyncs() {
        let mut s = session();
        let frames = vec![
            client_frame(0, query_request("SELECT 'aborted'")),
            server_frame(1, lenenc_int(1)),
            server_frame(3, column_def("x", ft::VAR_STRING, 0)),
        ];
        assert!(feed(&mut s, frames).is_empty());
        assert_eq!(s.state(), State::SkipPacket);

        let events = feed(&mut s, select_one_frames());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command, Command::Query { text: "SELECT 1".into() });
        assert_eq!(events[0].captured.column_names(), vec!["1"]);
    }

    #[test]
    fn fragmented_query_is_reassembled() {
        let mut s = session().with_max_frame_size(8);
        let body = query_request("SELECT 123456789");
        let frames = fragment(&body, 8, 0, Direction::ClientToServer);
        let n = frames.len() as u8;
        let mut all = frames;
        all.push(server_frame(n, ok_packet(0, 0)));
        let events = feed(&mut s, all);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].command.text(), Some("SELECT 123456789"));
    }

    #[test]
    fn load_waits_for_terminator() {
        let frames = vec![
            Frame::new(0, Direction::ClientToServer, 0, vec![1u8; 4]),
            Frame::new(1, Direction::ClientToServer, 0, vec![2u8; 4]),
        ];
        assert_eq!(load(&frames, 0, 4), None);
        let mut frames = frames;
        frames.push(Frame::new(2, Direction::ClientToServer, 0, vec![3u8]));
        let (body, n) = load(&frames, 0, 4).unwrap();
        assert_eq!(n, 3);
        assert_eq!(body.len(), 9);
        assert_eq!(load(&frames, 1, 4).map(|(b, n)| (b.len(), n)), Some((5, 2)));
        assert_eq!(load(&frames, 3, 4), None);
    }

    #[test]
    fn prepare_execute_close_lifecycle() {
        let mut s = session();
        let prepared = feed(
            &mut s,
            vec![
                client_frame(0, prepare_request("SELECT ? + ?")),
                server_frame(1, prepare_ok(7, 1, 2)),
            ],
        );
        assert_eq!(
            prepared[0].command,
            Command::Prepare { stmt_id: 7, text: "SELECT ? + ?".into(), num_params: 2 }
        );
        assert_eq!(s.statement(7).map(|st| st.num_params), Some(2));

        let params = [(ft::TINY, 0x80, vec![0xff]), (ft::LONG, 0, vec![1, 0, 0, 0])];
        let executed = feed(
            &mut s,
            vec![
                client_frame(0, execute_request(7, &[0], Some(&params[..]))),
                server_frame(1, ok_packet(0, 0)),
            ],
        );
        assert_eq!(executed.len(), 1);
        assert_eq!(
            executed[0].command,
            Command::Execute {
                stmt_id: 7,
                text: "SELECT ? + ?".into(),
                params: vec![Value::UInt(255), Value::Int(1)],
            }
        );

        // types are reused when the client does not rebind them
        let cached = feed(
            &mut s,
            vec![
                client_frame(0, execute_request_unbound(7, &[0b10], &[3])),
                server_frame(1, ok_packet(0, 0)),
            ],
        );
        match &cached[0].command {
            Command::Execute { params, .. } => assert_eq!(params, &vec![Value::UInt(3), Value::Null]),
            other => panic!("unexpected {other:?}"),
        }

        let closed = feed(&mut s, vec![client_frame(0, close_request(7))]);
        assert_eq!(closed[0].command, Command::Close { stmt_id: 7, text: "SELECT ? + ?".into() });
        assert!(s.statement(7).is_none());
    }

    #[test]
    fn execute_of_unknown_statement_is_unknown() {
        let mut s = session();
        let events = feed(&mut s, vec![client_frame(0, execute_request(99, &[], None))]);
        assert!(events.is_empty());
        assert_eq!(s.state(), State::Unknown);
    }

    #[test]
    fn execute_without_any_types_is_unknown() {
        let mut s = session();
        feed(&mut s, vec![client_frame(0, prepare_request("SELECT ?")), server_frame(1, prepare_ok(1, 0, 1))]);
        let events = feed(&mut s, vec![client_frame(0, execute_request_unbound(1, &[0], &[1]))]);
        assert!(events.is_empty());
        assert_eq!(s.state(), State::Unknown);
    }

    #[test]
    fn failed_prepare_learns_nothing() {
        let mut s = session();
        let events = feed(
            &mut s,
            vec![
                client_frame(0, prepare_request("SELEC 1")),
                server_frame(1, err_packet(1064, "42000", "syntax")),
            ],
        );
        assert!(events.is_empty());
        assert_eq!(s.state(), State::Unknown);
        assert_eq!(s.statements().count(), 0);
    }

    #[test]
    fn handshake_records_schema() {
        let mut s = session();
        let events = feed(
            &mut s,
            vec![
                server_frame(0, handshake_greeting()),
                client_frame(1, handshake_response("app", Some("orders"))),
                server_frame(2, ok_packet(0, 0)),
            ],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].command,
            Command::Handshake { schema: "orders".into(), username: "app".into() }
        );
        assert_eq!(s.schema(), "orders");
    }

    #[test]
    fn unknown_command_recovers_on_next_command() {
        let mut s = session();
        assert!(feed(&mut s, vec![client_frame(0, vec![0x0e])]).is_empty());
        assert_eq!(s.state(), State::Unknown);
        assert_eq!(feed(&mut s, select_one_frames()).len(), 1);
    }

    #[test]
    fn quit_is_terminal() {
        let mut s = session();
        let events = feed(&mut s, vec![client_frame(0, vec![command::QUIT])]);
        assert_eq!(events[0].command, Command::Quit);
        assert!(feed(&mut s, select_one_frames()).is_empty());
        assert_eq!(s.state(), State::ComQuit);
    }

    #[test]
    fn is_select_detection() {
        assert!(is_select("SELECT 1"));
        assert!(is_select("   select * from t"));
        assert!(!is_select("UPDATE t"));
        assert!(!is_select("sel"));
    }

    proptest! {
        #[test]
        fn long_results_survive_sequence_wraparound(rows in 250usize..300) {
            let mut s = session();
            let mut frames = vec![
                client_frame(0, query_request("SELECT n FROM numbers")),
                server_frame(1, lenenc_int(1)),
                server_frame(2, column_def("n", ft::LONGLONG, 0)),
                server_frame(3, eof_packet()),
            ];
            for i in 0..rows {
                frames.push(server_frame((4 + i) as u8, text_row(&[Some(&i.to_string())])));
            }
            frames.push(server_frame((4 + rows) as u8, eof_packet()));
            let events = feed(&mut s, frames);
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].captured.rows.len(), rows);
        }

        #[test]
        fn arbitrary_frames_never_panic(
            frames in prop::collection::vec(
                (any::<u8>(), any::<bool>(), prop::collection::vec(any::<u8>(), 0..24)),
                0..40,
            )
        ) {
            let mut s = session().with_max_frame_size(16);
            for (seq, client, payload) in frames {
                let direction = if client { Direction::ClientToServer } else { Direction::ServerToClient };
                let _ = s.handle(Frame::new(seq % 4, direction, 0, payload));
            }
        }
    }
}
