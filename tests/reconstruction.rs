//! End-to-end reconstruction through the public API

use futures::StreamExt;
use sqlreplay::protocol::flags::{capability, field_type as ft};
use sqlreplay::protocol::{Session, State};
use sqlreplay::stream::ReconstructExt;
use sqlreplay::{Command, CommandKind, ConnId, Direction, Frame, Value};

fn conn() -> ConnId {
    ConnId::new("192.168.1.20:51234".parse().unwrap(), "192.168.1.10:3306".parse().unwrap())
}

fn client(seq: u8, payload: Vec<u8>) -> Frame {
    Frame::new(seq, Direction::ClientToServer, 1_000 + u64::from(seq), payload)
}

fn server(seq: u8, payload: Vec<u8>) -> Frame {
    Frame::new(seq, Direction::ServerToClient, 2_000 + u64::from(seq), payload)
}

fn lenenc_str(s: &str) -> Vec<u8> {
    assert!(s.len() < 251);
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn command(byte: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![byte];
    out.extend_from_slice(body);
    out
}

fn ok() -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
}

fn eof() -> Vec<u8> {
    vec![0xfe, 0x00, 0x00, 0x22, 0x00]
}

fn column(name: &str, field_type: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "shop", "orders", "orders", name, name] {
        out.extend(lenenc_str(part));
    }
    out.push(0x0c);
    out.extend_from_slice(&33u16.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());
    out.push(field_type);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0]);
    out
}

fn greeting() -> Vec<u8> {
    let mut out = vec![0x0a];
    out.extend_from_slice(b"5.7.44\0");
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(b"12345678\0");
    out
}

fn login(user: &str, schema: &str) -> Vec<u8> {
    let caps = capability::PROTOCOL_41 | capability::SECURE_CONNECTION | capability::CONNECT_WITH_DB;
    let mut out = caps.to_le_bytes().to_vec();
    out.extend_from_slice(&[0; 28]);
    out.extend_from_slice(user.as_bytes());
    out.push(0);
    out.push(0);
    out.extend_from_slice(schema.as_bytes());
    out.push(0);
    out
}

fn session_frames() -> Vec<Frame> {
    let mut execute = command(0x17, &5u32.to_le_bytes());
    execute.extend_from_slice(&[0, 1, 0, 0, 0]);
    execute.extend_from_slice(&[0x00, 0x01, ft::LONGLONG, 0x00]);
    execute.extend_from_slice(&42i64.to_le_bytes());

    let mut prepare_ok = vec![0x00];
    prepare_ok.extend_from_slice(&5u32.to_le_bytes());
    prepare_ok.extend_from_slice(&1u16.to_le_bytes());
    prepare_ok.extend_from_slice(&1u16.to_le_bytes());
    prepare_ok.extend_from_slice(&[0, 0, 0]);

    let mut binary_row = vec![0x00, 0x00];
    binary_row.extend(lenenc_str("open"));

    vec![
        server(0, greeting()),
        client(1, login("shopper", "shop")),
        server(2, ok()),
        client(0, command(0x03, b"SELECT id, status FROM orders")),
        server(1, vec![2]),
        server(2, column("id", ft::LONGLONG)),
        server(3, column("status", ft::VAR_STRING)),
        server(4, eof()),
        server(5, [lenenc_str("1"), lenenc_str("paid")].concat()),
        server(6, [lenenc_str("2"), vec![0xfb]].concat()),
        server(7, eof()),
        client(0, command(0x16, b"SELECT status FROM orders WHERE id = ?")),
        server(1, prepare_ok),
        client(0, execute),
        server(1, vec![1]),
        server(2, column("status", ft::VAR_STRING)),
        server(3, eof()),
        server(4, binary_row),
        server(5, eof()),
        client(0, command(0x19, &5u32.to_le_bytes())),
        client(0, vec![0x01]),
    ]
}

#[tokio::test]
async fn full_session_through_stream() {
    let events: Vec<_> = futures::stream::iter(session_frames())
        .reconstruct(Session::new(conn()))
        .collect()
        .await;

    let kinds: Vec<CommandKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            CommandKind::Handshake,
            CommandKind::Query,
            CommandKind::Prepare,
            CommandKind::Execute,
            CommandKind::Close,
            CommandKind::Quit,
        ]
    );

    assert_eq!(events[0].command, Command::Handshake { schema: "shop".into(), username: "shopper".into() });

    let query = &events[1];
    assert_eq!(query.captured.column_names(), vec!["id", "status"]);
    assert_eq!(
        query.captured.rows,
        vec![
            vec![Value::Text("1".into()), Value::Text("paid".into())],
            vec![Value::Text("2".into()), Value::Null],
        ]
    );
    assert_eq!(query.timestamp, 1_000);
    assert!(query.captured.end_ns >= query.captured.begin_ns);

    assert_eq!(
        events[3].command,
        Command::Execute {
            stmt_id: 5,
            text: "SELECT status FROM orders WHERE id = ?".into(),
            params: vec![Value::Int(42)],
        }
    );
    assert_eq!(events[3].captured.rows, vec![vec![Value::Text("open".into())]]);
    assert_eq!(
        events[4].command,
        Command::Close { stmt_id: 5, text: "SELECT status FROM orders WHERE id = ?".into() }
    );
}

#[test]
fn error_response_carries_code_and_message() {
    let mut session = Session::new(conn());
    assert!(session.handle(client(0, command(0x03, b"SELECT * FROM missing"))).is_none());

    let mut err = vec![0xff];
    err.extend_from_slice(&1146u16.to_le_bytes());
    err.extend_from_slice(b"#42S02Table 'shop.missing' doesn't exist");
    let event = session.handle(server(1, err)).unwrap();

    assert_eq!(event.captured.error_code, 1146);
    assert_eq!(event.captured.error_message, "Table 'shop.missing' doesn't exist");
    assert!(event.captured.rows.is_empty());
}

#[test]
fn gap_in_sequence_resyncs_without_leaking_bytes() {
    let mut session = Session::new(conn());
    assert!(session.handle(client(0, command(0x03, b"SELECT 'lost'"))).is_none());
    assert!(session.handle(server(1, vec![1])).is_none());
    assert!(session.handle(server(3, eof())).is_none());
    assert_eq!(session.state(), State::SkipPacket);

    // frames continuing the aborted exchange are ignored
    assert!(session.handle(server(4, ok())).is_none());

    assert!(session.handle(client(0, command(0x03, b"DO 1"))).is_none());
    let event = session.handle(server(1, ok())).unwrap();
    assert_eq!(event.command, Command::Query { text: "DO 1".into() });
    assert_eq!(session.frames().len(), 2);
}

#[test]
fn large_result_wraps_sequence_numbers() {
    let mut session = Session::new(conn());
    let rows = 300usize;
    let mut frames = vec![
        client(0, command(0x03, b"SELECT n FROM numbers")),
        server(1, vec![1]),
        server(2, column("n", ft::LONG)),
        server(3, eof()),
    ];
    for i in 0..rows {
        frames.push(server((4 + i) as u8, lenenc_str(&i.to_string())));
    }
    frames.push(server((4 + rows) as u8, eof()));

    let events: Vec<_> = frames.into_iter().filter_map(|f| session.handle(f)).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].captured.rows.len(), rows);
    assert_eq!(events[0].captured.rows[299], vec![Value::Text("299".into())]);
}

#[test]
fn fragmented_command_is_joined() {
    let mut session = Session::new(conn()).with_max_frame_size(16);
    let body = command(0x03, b"SELECT 'a fragmented statement'");
    let mut seq = 0u8;
    for chunk in body.chunks(16) {
        assert!(session.handle(client(seq, chunk.to_vec())).is_none());
        seq += 1;
    }
    if body.len() % 16 == 0 {
        assert!(session.handle(client(seq, Vec::new())).is_none());
        seq += 1;
    }
    let event = session.handle(server(seq, ok())).unwrap();
    assert_eq!(event.command.text(), Some("SELECT 'a fragmented statement'"));
}
