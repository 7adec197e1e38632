//! Target server abstraction
//!
//! The replay engine talks to the live target only through these traits. A driver opens
//! schema-scoped connections; a connection runs queries, prepares and executes statements,
//! and hands every scanned row to a [`RowCollector`] as plain [`Value`]s, so statement text
//! and row contents are first-class data rather than driver internals.

use crate::{Result, Value};

/// Opens connections to the replay target.
#[async_trait::async_trait]
pub trait TargetDriver: Send + Sync + 'static {
    type Conn: TargetConnection;

    /// Open one physical connection scoped to `schema` (empty for the server default).
    ///
    /// Connection-loss conditions must be reported as [`ReplayError::ConnectionLost`] so the
    /// replayer can tell them apart from rejected operations.
    ///
    /// [`ReplayError::ConnectionLost`]: crate::ReplayError::ConnectionLost
    async fn connect(&self, schema: &str) -> Result<Self::Conn>;
}

/// One live connection to the replay target.
#[async_trait::async_trait]
pub trait TargetConnection: Send + 'static {
    /// Server-side prepared statement handle
    type Statement: Send + Sync + 'static;

    /// Run `sql` as a text-protocol query, pushing every returned row into `rows`.
    async fn query(&mut self, sql: &str, rows: &mut RowCollector) -> Result<()>;

    async fn prepare(&mut self, sql: &str) -> Result<Self::Statement>;

    /// Execute a prepared statement with positional parameters.
    async fn execute(
        &mut self,
        statement: &Self::Statement,
        params: &[Value],
        rows: &mut RowCollector,
    ) -> Result<()>;

    async fn close_statement(&mut self, statement: Self::Statement) -> Result<()>;

    /// Disconnect, consuming the connection.
    async fn close(self) -> Result<()>;
}

/// Accumulates the rows read back from the target in display-string form.
///
/// Nulls stay `None` so they remain distinct from empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowCollector {
    rows: Vec<Vec<Option<String>>>,
}

impl RowCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one complete row.
    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row.iter().map(Value::to_display).collect());
    }

    /// Drop rows accumulated by a failed attempt.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Option<String>>> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_preserves_nulls_and_order() {
        let mut rows = RowCollector::new();
        rows.push_row(vec![Value::Int(1), Value::Null]);
        rows.push_row(vec![Value::Text(String::new()), Value::UInt(2)]);
        assert_eq!(
            rows.rows(),
            &[
                vec![Some("1".to_string()), None],
                vec![Some(String::new()), Some("2".to_string())],
            ]
        );
        rows.clear();
        assert!(rows.is_empty());
    }
}
