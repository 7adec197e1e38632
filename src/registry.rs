//! Connection registry: the frame entry point
//!
//! Owns one protocol [`Session`] and one [`ReplaySession`] per [`ConnId`]. Frames of a
//! connection must come from a single feeder, in capture order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::protocol::Session;
use crate::replay::{ReplaySession, SessionOptions, TargetDriver};
use crate::stats::ReplayStats;
use crate::{CommandKind, ConnId, Frame, ReplayError, Result};

struct Connection<D: TargetDriver> {
    protocol: Session,
    replay: ReplaySession<D>,
}

pub struct ConnectionRegistry<D: TargetDriver> {
    driver: Option<Arc<D>>,
    options: Arc<SessionOptions>,
    stats: Arc<ReplayStats>,
    connections: HashMap<ConnId, Connection<D>>,
}

impl<D: TargetDriver> std::fmt::Debug for ConnectionRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("capture_only", &self.driver.is_none())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl<D: TargetDriver> ConnectionRegistry<D> {
    /// A registry without a driver runs every connection capture-only.
    pub fn new(driver: Option<Arc<D>>, options: SessionOptions, stats: Arc<ReplayStats>) -> Self {
        Self { driver, options: Arc::new(options), stats, connections: HashMap::new() }
    }

    pub fn stats(&self) -> &Arc<ReplayStats> {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, conn: &ConnId) -> bool {
        self.connections.contains_key(conn)
    }

    /// Protocol session of a tracked connection.
    pub fn protocol(&self, conn: &ConnId) -> Option<&Session> {
        self.connections.get(conn).map(|c| &c.protocol)
    }

    /// Feed one captured frame, admitting any completed command to the connection's replay
    /// session. A quit closes the connection once its events are applied and persisted.
    pub async fn on_frame(&mut self, conn: ConnId, frame: Frame) -> Result<()> {
        let entry = self.connections.entry(conn).or_insert_with(|| {
            debug!(conn = %conn, "Tracking new connection");
            Connection {
                protocol: Session::new(conn).with_max_frame_size(self.options.max_frame_size),
                replay: ReplaySession::new(
                    conn,
                    self.driver.clone(),
                    Arc::clone(&self.options),
                    Arc::clone(&self.stats),
                ),
            }
        });

        let Some(event) = entry.protocol.handle(frame) else {
            return Ok(());
        };
        let quit = event.kind() == CommandKind::Quit;
        entry.replay.admit(event).await?;
        if quit {
            self.close(&conn).await?;
        }
        Ok(())
    }

    /// Stop tracking `conn`, waiting for its pending events.
    pub async fn close(&mut self, conn: &ConnId) -> Result<()> {
        let Some(connection) = self.connections.remove(conn) else {
            return Ok(());
        };
        connection.replay.close().await
    }

    /// Close every tracked connection, returning the ones that failed.
    pub async fn close_all(&mut self) -> Vec<(ConnId, ReplayError)> {
        let closing = self.connections.drain().map(|(conn, c)| async move { (conn, c.replay.close().await) });
        let failures: Vec<_> = join_all(closing)
            .await
            .into_iter()
            .filter_map(|(conn, result)| result.err().map(|e| (conn, e)))
            .collect();
        info!(failed = failures.len(), "Closed all connections");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::protocol::flags::field_type as ft;
    use crate::test_utils::*;

    fn registry(dir: &std::path::Path, driver: &Arc<ScriptedDriver>) -> ConnectionRegistry<ScriptedDriver> {
        let options = SessionOptions {
            output: OutputConfig { dir: dir.to_path_buf(), ..Default::default() },
            ..Default::default()
        };
        ConnectionRegistry::new(Some(Arc::clone(driver)), options, Arc::new(ReplayStats::new()))
    }

    fn login(schema: &str) -> Vec<Frame> {
        vec![
            server_frame(0, handshake_greeting()),
            client_frame(1, handshake_response("app", Some(schema))),
            server_frame(2, ok_packet(0, 0)),
        ]
    }

    fn select(text: &str) -> Vec<Frame> {
        vec![
            client_frame(0, query_request(text)),
            server_frame(1, lenenc_int(1)),
            server_frame(2, column_def("a", ft::VAR_STRING, 0)),
            server_frame(3, eof_packet()),
            server_frame(4, text_row(&[Some("v")])),
            server_frame(5, eof_packet()),
        ]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_flow_to_target_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = registry(dir.path(), &driver);

        let (a, b) = (test_conn(1), test_conn(2));
        for (frame_a, frame_b) in login("shop").into_iter().zip(login("orders")) {
            registry.on_frame(a, frame_a).await.unwrap();
            registry.on_frame(b, frame_b).await.unwrap();
        }
        for frame in select("SELECT a FROM shop_t") {
            registry.on_frame(a, frame).await.unwrap();
        }
        for frame in select("SELECT a FROM orders_t") {
            registry.on_frame(b, frame).await.unwrap();
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.protocol(&a).map(|s| s.schema()), Some("shop"));

        assert!(registry.close_all().await.is_empty());
        assert!(registry.is_empty());

        let calls = driver.calls();
        assert!(calls.contains(&Call::Connect { schema: "shop".into() }));
        assert!(calls.contains(&Call::Connect { schema: "orders".into() }));
        assert_eq!(driver.statements_matching("SELECT a FROM").len(), 2);
        assert_eq!(registry.stats().snapshot().events_admitted, 4);
    }

    #[tokio::test]
    async fn quit_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = registry(dir.path(), &driver);
        let conn = test_conn(3);

        for frame in select("SELECT 1") {
            registry.on_frame(conn, frame).await.unwrap();
        }
        registry.on_frame(conn, client_frame(0, quit_request())).await.unwrap();

        assert!(!registry.contains(&conn));
        assert_eq!(driver.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn close_all_reports_persistence_failures() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = registry(&blocked, &driver);

        for frame in select("SELECT 1") {
            registry.on_frame(test_conn(4), frame).await.unwrap();
        }
        let failures = registry.close_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, test_conn(4));
        assert!(matches!(failures[0].1, ReplayError::Persist { .. }));
    }
}
