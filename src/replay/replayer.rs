//! Applying reconstructed commands to the live target
//!
//! [`Replayer`] owns one pinned physical connection and the statement cache for one
//! captured connection. Connection-loss faults lead to a teardown that keeps statement
//! text, one reconnect with the last schema, and exactly one retry of the event. Every
//! other final error is recorded on the event's replay-side result.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::driver::{RowCollector, TargetConnection, TargetDriver};
use super::retry::RetryPolicy;
use super::statements::StatementCache;
use crate::error::ConnectionLoss;
use crate::stats::ReplayStats;
use crate::types::now_ns;
use crate::{Command, CommandEvent, ConnId, ReplayError, ReplayResult, Result, Value};

type Conn<D> = <D as TargetDriver>::Conn;
type Statement<D> = <Conn<D> as TargetConnection>::Statement;

pub struct Replayer<D: TargetDriver> {
    conn_id: ConnId,
    driver: Arc<D>,
    conn: Option<Conn<D>>,
    schema: String,
    statements: StatementCache<Statement<D>>,
    retry: RetryPolicy,
    stats: Arc<ReplayStats>,
}

impl<D: TargetDriver> std::fmt::Debug for Replayer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("conn_id", &self.conn_id)
            .field("connected", &self.conn.is_some())
            .field("schema", &self.schema)
            .field("statements", &self.statements.len())
            .finish()
    }
}

fn no_connection() -> ReplayError {
    ReplayError::connection_lost(ConnectionLoss::ConnectionClosed, "no live connection")
}

impl<D: TargetDriver> Replayer<D> {
    pub fn new(conn_id: ConnId, driver: Arc<D>, retry: RetryPolicy, stats: Arc<ReplayStats>) -> Self {
        Self {
            conn_id,
            driver,
            conn: None,
            schema: String::new(),
            statements: StatementCache::new(),
            retry,
            stats,
        }
    }

    /// Schema of the most recent handshake; reconnects reuse it.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn statements(&self) -> &StatementCache<Statement<D>> {
        &self.statements
    }

    /// Apply one event, recording its outcome on `event.replayed`.
    ///
    /// Returns the final error, which is already recorded on the event.
    pub async fn apply(&mut self, event: &mut CommandEvent) -> Result<()> {
        let mut reconnected = false;
        loop {
            let err = match self.dispatch(event).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_connection_loss() && !reconnected {
                warn!(conn = %self.conn_id, event = %event, cause = %err, "Reconnecting after connection loss");
                reconnected = true;
                self.stats.reconnected();
                self.teardown(true).await;
                let schema = self.schema.clone();
                match self.connect(&schema).await {
                    Ok(()) => continue,
                    Err(reconnect_err) => {
                        warn!(conn = %self.conn_id, error = %reconnect_err, "Reconnect failed");
                        event.replayed.record_error(reconnect_err.code(), reconnect_err.message());
                        return Err(reconnect_err);
                    }
                }
            }

            warn!(conn = %self.conn_id, event = %event, error = %err, "Failed to apply event");
            event.replayed.record_error(err.code(), err.message());
            return Err(err);
        }
    }

    async fn dispatch(&mut self, event: &mut CommandEvent) -> Result<()> {
        match &event.command {
            Command::Query { text } => self.query(text, &mut event.replayed).await,
            Command::Prepare { stmt_id, text, .. } => self.prepare(*stmt_id, text).await,
            Command::Execute { stmt_id, params, .. } => {
                self.execute(*stmt_id, params, &mut event.replayed).await
            }
            Command::Close { stmt_id, .. } => {
                self.close_statement(*stmt_id).await;
                Ok(())
            }
            Command::Handshake { schema, .. } => {
                self.teardown(false).await;
                self.connect(schema).await
            }
            Command::Quit => {
                self.teardown(false).await;
                Ok(())
            }
        }
    }

    /// Open a fresh connection scoped to `schema`.
    async fn connect(&mut self, schema: &str) -> Result<()> {
        self.schema = schema.to_string();
        debug!(conn = %self.conn_id, schema = %schema, "Connecting to target");
        let conn = self.driver.connect(schema).await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let schema = self.schema.clone();
            self.connect(&schema).await?;
        }
        Ok(())
    }

    async fn query(&mut self, text: &str, replayed: &mut ReplayResult) -> Result<()> {
        self.ensure_connected().await?;
        let conn = self.conn.as_mut().ok_or_else(no_connection)?;

        replayed.statement = text.to_string();
        replayed.params.clear();
        let mut rows = RowCollector::new();
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            rows.clear();
            replayed.begin_ns = now_ns();
            let result = conn.query(text, &mut rows).await;
            replayed.end_ns = now_ns();
            match result {
                Err(err) if self.retry.permits(attempts, &err) => {
                    warn!(conn = %self.conn_id, attempts, "Lock wait timeout, retrying query");
                    self.stats.lock_wait_retried();
                    self.retry.pause().await;
                }
                other => break other,
            }
        };
        replayed.rows = rows.into_rows();
        result
    }

    async fn prepare(&mut self, stmt_id: u32, text: &str) -> Result<()> {
        if let Some(previous) = self.statements.remove(stmt_id).and_then(|s| s.handle) {
            if let Some(conn) = self.conn.as_mut() {
                if let Err(err) = conn.close_statement(previous).await {
                    warn!(conn = %self.conn_id, stmt_id, error = %err, "Failed to close replaced statement");
                }
            }
        }

        self.ensure_connected().await?;
        let conn = self.conn.as_mut().ok_or_else(no_connection)?;
        let handle = conn.prepare(text).await?;
        self.statements.insert(stmt_id, text, Some(handle));
        trace!(conn = %self.conn_id, stmt_id, "Prepared statement");
        Ok(())
    }

    async fn execute(&mut self, stmt_id: u32, params: &[Value], replayed: &mut ReplayResult) -> Result<()> {
        let Some(text) = self.statements.text(stmt_id).map(str::to_string) else {
            return Err(ReplayError::StatementNotFound { stmt_id });
        };

        self.ensure_connected().await?;
        let conn = self.conn.as_mut().ok_or_else(no_connection)?;
        if self.statements.handle(stmt_id).is_none() {
            debug!(conn = %self.conn_id, stmt_id, "Re-preparing statement");
            let handle = conn.prepare(&text).await?;
            self.statements.set_handle(stmt_id, handle);
        }
        let handle = self
            .statements
            .handle(stmt_id)
            .ok_or(ReplayError::StatementNotFound { stmt_id })?;

        replayed.statement = text;
        replayed.params = params.to_vec();
        let mut rows = RowCollector::new();
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            rows.clear();
            replayed.begin_ns = now_ns();
            let result = conn.execute(handle, params, &mut rows).await;
            replayed.end_ns = now_ns();
            match result {
                Err(err) if self.retry.permits(attempts, &err) => {
                    warn!(conn = %self.conn_id, stmt_id, attempts, "Lock wait timeout, retrying execute");
                    self.stats.lock_wait_retried();
                    self.retry.pause().await;
                }
                other => break other,
            }
        };
        replayed.rows = rows.into_rows();
        result
    }

    async fn close_statement(&mut self, stmt_id: u32) {
        let Some(handle) = self.statements.remove(stmt_id).and_then(|s| s.handle) else {
            return;
        };
        if let Some(conn) = self.conn.as_mut() {
            if let Err(err) = conn.close_statement(handle).await {
                warn!(conn = %self.conn_id, stmt_id, error = %err, "Failed to close statement");
            }
        }
    }

    /// Close the live connection.
    ///
    /// With `reconnect` the cached statement text survives and only the handles are
    /// dropped; otherwise the cache is emptied.
    pub async fn teardown(&mut self, reconnect: bool) {
        let handles = if reconnect {
            self.statements.invalidate()
        } else {
            self.statements.drain_handles()
        };
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        for handle in handles {
            if let Err(err) = conn.close_statement(handle).await {
                debug!(conn = %self.conn_id, error = %err, "Failed to close statement during teardown");
            }
        }
        if let Err(err) = conn.close().await {
            warn!(conn = %self.conn_id, error = %err, "Failed to close target connection");
        }
    }

    /// Release the connection and every cached statement.
    pub async fn close(mut self) {
        self.teardown(false).await;
    }
}
