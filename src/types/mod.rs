//! Core data model for reconstructed traffic.
//!
//! - [`Frame`] is one captured protocol fragment, tagged with sequence number and direction
//! - [`ConnId`] identifies one captured connection and keys every per-connection structure
//! - [`Value`] is a decoded parameter or column value
//! - [`CommandEvent`] is one reconstructed command with its capture-side and replay-side results

mod conn;
mod event;
mod frame;
mod value;

pub use conn::*;
pub use event::*;
pub use frame::*;
pub use value::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}
