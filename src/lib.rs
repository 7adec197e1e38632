//! Reconstruct MySQL wire-protocol traffic and replay it against a live server.
//!
//! sqlreplay turns the captured frames of client connections back into logical commands
//! (queries, prepared statements, their results) and re-issues them against a candidate
//! target, recording what the captured server and the target returned side by side.
//!
//! # Architecture
//!
//! - **Reconstruction**: a per-connection state machine ([`protocol::Session`]) reassembles
//!   fragmented frames and emits one [`CommandEvent`] per completed command exchange
//! - **Replay**: a [`replay::ReplaySession`] per connection applies events in order on a
//!   single pinned target connection, with lock-wait retry and reconnect-once semantics
//! - **Persistence**: completed events are written as JSON lines to rotating per-connection
//!   artifacts by a separate worker, decoupling replay latency from storage latency
//! - **Gating**: events around a consistency checkpoint are skipped or only logged
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlreplay::config::ReplayConfig;
//! use sqlreplay::registry::ConnectionRegistry;
//! use sqlreplay::replay::{SessionOptions, TargetDriver};
//! use sqlreplay::stats::ReplayStats;
//! use sqlreplay::{ConnId, Frame};
//!
//! async fn run<D: TargetDriver>(
//!     driver: D,
//!     frames: Vec<(ConnId, Frame)>,
//! ) -> anyhow::Result<()> {
//!     let config = ReplayConfig::from_path("replay.yaml")?;
//!     sqlreplay::logging::init(&config.logging)?;
//!
//!     let mut registry = ConnectionRegistry::new(
//!         Some(Arc::new(driver)),
//!         SessionOptions::from_config(&config),
//!         Arc::new(ReplayStats::new()),
//!     );
//!     for (conn, frame) in frames {
//!         registry.on_frame(conn, frame).await?;
//!     }
//!     for (conn, err) in registry.close_all().await {
//!         eprintln!("{conn}: {err}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod gate;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod replay;
pub mod sink;
pub mod stats;
pub mod stream;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub use error::*;
pub use types::*;
