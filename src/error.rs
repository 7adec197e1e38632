//! Error types for protocol reconstruction and replay.
//!
//! Every fault in the crate is a [`ReplayError`]. The variants follow the taxonomy the
//! replay pipeline acts on:
//!
//! - **Decode faults** (`Decode`): non-fatal, the protocol session moves to
//!   `Unknown` and resynchronises on the next sequence-0 frame
//! - **Transient contention** (`Server` with code 1205): retried in place
//! - **Connection loss** (`ConnectionLost`): teardown, one reconnect, one retry
//! - **Server rejection** (`Server`, `Driver`): recorded on the replay-side result
//! - **Local validation** (`StatementNotFound`): synthesised without a network call
//! - **Persistence** (`File`, `Persist`): `Persist` ends the session's persistence pipeline
//!
//! ```rust
//! use sqlreplay::ReplayError;
//!
//! let err = ReplayError::server(1205, "Lock wait timeout exceeded; try restarting transaction");
//! assert!(err.is_lock_wait());
//! assert!(err.is_retryable());
//! assert_eq!(err.code(), 1205);
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for replay operations.
pub type Result<T, E = ReplayError> = std::result::Result<T, E>;

/// Server error number for "Lock wait timeout exceeded".
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;

/// Sentinel code recorded when an execute names a statement that was never prepared.
pub const STATEMENT_NOT_FOUND_CODE: u16 = 10000;

/// Sentinel code recorded for errors that carry no server error number.
pub const UNKNOWN_ERROR_CODE: u16 = 20000;

/// Sentinel message paired with [`UNKNOWN_ERROR_CODE`].
pub const UNKNOWN_ERROR_MESSAGE: &str =
    "Failed to execute SQL and failed to convert to mysql error";

/// The connection-loss conditions that trigger a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLoss {
    /// The ambient deadline supplied at connection-open time elapsed.
    DeadlineExceeded,
    /// The connection was already closed.
    ConnectionClosed,
    /// The driver reports the connection as invalid (broken pipe, bad handshake state).
    InvalidConnection,
}

impl std::fmt::Display for ConnectionLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionLoss::DeadlineExceeded => "deadline exceeded",
            ConnectionLoss::ConnectionClosed => "connection already closed",
            ConnectionLoss::InvalidConnection => "invalid connection",
        };
        f.write_str(name)
    }
}

/// Main error type for replay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReplayError {
    #[error("Malformed packet in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("Connection lost ({kind}): {reason}")]
    ConnectionLost { kind: ConnectionLoss, reason: String },

    #[error("{stmt_id} is not exist , maybe prepare fail")]
    StatementNotFound { stmt_id: u32 },

    #[error("Driver error: {reason}")]
    Driver { reason: String },

    #[error("Output file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Persistence pipeline failed: {reason}")]
    Persist { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Worker task stopped: {reason}")]
    Worker { reason: String },

    #[error("Failed to serialize record")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

impl ReplayError {
    /// Returns true for the transient lock-wait condition (server error 1205).
    pub fn is_lock_wait(&self) -> bool {
        matches!(self, ReplayError::Server { code, .. } if *code == ER_LOCK_WAIT_TIMEOUT)
    }

    /// Returns true for faults that call for a teardown and reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ReplayError::ConnectionLost { .. })
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplayError::Server { .. } => self.is_lock_wait(),
            ReplayError::ConnectionLost { .. } => true,
            ReplayError::Decode { .. } => false,
            ReplayError::StatementNotFound { .. } => false,
            ReplayError::Driver { .. } => false,
            ReplayError::File { .. } => false,
            ReplayError::Persist { .. } => false,
            ReplayError::Config { .. } => false,
            ReplayError::Worker { .. } => false,
            ReplayError::Serialize { .. } => false,
        }
    }

    /// Error number recorded on a replay-side result.
    pub fn code(&self) -> u16 {
        match self {
            ReplayError::Server { code, .. } => *code,
            ReplayError::StatementNotFound { .. } => STATEMENT_NOT_FOUND_CODE,
            _ => UNKNOWN_ERROR_CODE,
        }
    }

    /// Error description recorded on a replay-side result.
    pub fn message(&self) -> String {
        match self {
            ReplayError::Server { message, .. } => message.clone(),
            ReplayError::StatementNotFound { .. } => self.to_string(),
            _ => UNKNOWN_ERROR_MESSAGE.to_string(),
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ReplayError::Decode { .. } => vec![
                "Check the capture for dropped or truncated frames",
                "Verify the capture started before the connection handshake",
            ],
            ReplayError::Server { .. } => vec![
                "Compare the target schema with the captured source schema",
                "Check the target server error log",
            ],
            ReplayError::ConnectionLost { .. } => vec![
                "Check the target server is reachable",
                "Increase the connect timeout in the target configuration",
            ],
            ReplayError::StatementNotFound { .. } => vec![
                "Check that the prepare for this statement was captured",
                "Look for a failed prepare earlier in the same connection",
            ],
            ReplayError::Driver { .. } => vec!["Inspect the driver error in the replay log"],
            ReplayError::File { .. } | ReplayError::Persist { .. } => vec![
                "Check the output directory exists and is writable",
                "Ensure sufficient disk space",
                "Check the archive directory is on the same filesystem",
            ],
            ReplayError::Config { .. } => vec!["Check the configuration file against the documented keys"],
            ReplayError::Worker { .. } => vec!["Check the log for a panic in the session's worker task"],
            ReplayError::Serialize { .. } => vec!["Report the event that failed to serialize"],
        }
    }

    /// Helper constructor for decode faults.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        ReplayError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for server-reported errors.
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        ReplayError::Server { code, message: message.into() }
    }

    /// Helper constructor for connection-loss faults.
    pub fn connection_lost(kind: ConnectionLoss, reason: impl Into<String>) -> Self {
        ReplayError::ConnectionLost { kind, reason: reason.into() }
    }

    /// Helper constructor for unrecognised driver errors.
    pub fn driver(reason: impl Into<String>) -> Self {
        ReplayError::Driver { reason: reason.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        ReplayError::File { path, source }
    }

    /// Helper constructor for worker task failures.
    pub fn worker(reason: impl Into<String>) -> Self {
        ReplayError::Worker { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        ReplayError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        ReplayError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
