//! Protocol session states

use std::fmt;

/// State of a per-connection protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Init,
    /// Unrecognised or undecodable command; waits for the next sequence-0 frame
    Unknown,
    /// Sequence gap; frames are discarded until the next sequence-0 frame
    SkipPacket,
    ComQuery,
    ComQueryReading,
    ComQueryDone,
    ComStmtExecute,
    ComStmtExecuteReading,
    ComStmtExecuteDone,
    ComStmtPrepareRequest,
    ComStmtPrepareResponse,
    ComStmtClose,
    /// Terminal
    ComQuit,
    HandshakeRequest,
    HandshakeResponse,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Init => "Init",
            State::Unknown => "Unknown",
            State::SkipPacket => "SkipPacket",
            State::ComQuery => "ComQuery",
            State::ComQueryReading => "ComQuery-Reading",
            State::ComQueryDone => "ComQuery-Done",
            State::ComStmtExecute => "ComStmtExecute",
            State::ComStmtExecuteReading => "ComStmtExecute-Reading",
            State::ComStmtExecuteDone => "ComStmtExecute-Done",
            State::ComStmtPrepareRequest => "ComStmtPrepare-Request",
            State::ComStmtPrepareResponse => "ComStmtPrepare-Response",
            State::ComStmtClose => "ComStmtClose",
            State::ComQuit => "ComQuit",
            State::HandshakeRequest => "Handshake-Request",
            State::HandshakeResponse => "Handshake-Response",
        }
    }

    /// Mid-result states, where a sequence-0 frame is a wrapped sequence number rather than
    /// a new command.
    pub fn is_reading(&self) -> bool {
        matches!(self, State::ComQueryReading | State::ComStmtExecuteReading)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::ComQuit)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
