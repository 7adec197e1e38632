//! Protocol reconstruction
//!
//! Everything needed to turn the captured frames of one connection into [`CommandEvent`]s:
//!
//! - [`flags`] - command bytes, markers, capability and column flags, field types
//! - [`codec`] - bounds-checked primitive decoders
//! - [`params`] - execute parameters and binary values
//! - [`handshake`] - the client handshake response
//! - [`resultset`] - OK / ERR / text and binary result sets
//! - [`fsm`] - the per-connection [`Session`] state machine
//!
//! ```rust
//! use sqlreplay::protocol::Session;
//! use sqlreplay::{ConnId, Direction, Frame};
//!
//! let conn = ConnId::new("10.0.0.1:50000".parse()?, "10.0.0.2:3306".parse()?);
//! let mut session = Session::new(conn);
//!
//! let mut query = vec![0x03];
//! query.extend_from_slice(b"DELETE FROM sessions");
//! assert!(session.handle(Frame::new(0, Direction::ClientToServer, 1, query)).is_none());
//!
//! let ok = vec![0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00];
//! let event = session.handle(Frame::new(1, Direction::ServerToClient, 2, ok)).unwrap();
//! assert_eq!(event.captured.affected_rows, 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`CommandEvent`]: crate::CommandEvent

pub mod codec;
pub mod flags;
pub mod fsm;
pub mod handshake;
pub mod params;
pub mod resultset;
pub mod state;

pub use fsm::{PreparedStatement, Session, is_select};
pub use handshake::HandshakeResponse;
pub use resultset::{ResultDecoder, RowFormat};
pub use state::State;
