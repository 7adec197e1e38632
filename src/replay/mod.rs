//! Replay of reconstructed commands against a live target
//!
//! - [`TargetDriver`] / [`TargetConnection`] abstract the target server
//! - [`Replayer`] applies events one by one on a single pinned connection
//! - [`ReplaySession`] runs the gated apply worker and the persist worker for one connection

mod driver;
#[cfg(feature = "mysql")]
mod mysql;
mod replayer;
mod retry;
mod session;
mod statements;


pub use driver::{RowCollector, TargetConnection, TargetDriver};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlConnection, MySqlDriver};
pub use replayer::Replayer;
pub use retry::RetryPolicy;
pub use session::{ReplaySession, SessionOptions};
pub use statements::{CachedStatement, StatementCache};
