//! `mysql_async` backed replay target

use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Row};
use tracing::debug;

use super::driver::{RowCollector, TargetConnection, TargetDriver};
use crate::config::TargetConfig;
use crate::error::ConnectionLoss;
use crate::{ReplayError, Result, Value};

/// Opens one `mysql_async` connection per replay session.
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    opts: Opts,
    connect_timeout: Duration,
}

impl MySqlDriver {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let opts = Opts::from_url(&config.url)
            .map_err(|e| ReplayError::config(format!("invalid target url: {}", e)))?;
        Ok(Self { opts, connect_timeout: Duration::from_millis(config.connect_timeout_ms) })
    }
}

#[async_trait::async_trait]
impl TargetDriver for MySqlDriver {
    type Conn = MySqlConnection;

    async fn connect(&self, schema: &str) -> Result<MySqlConnection> {
        let db = (!schema.is_empty()).then(|| schema.to_string());
        let opts = OptsBuilder::from_opts(self.opts.clone()).db_name(db);
        let conn = tokio::time::timeout(self.connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                ReplayError::connection_lost(
                    ConnectionLoss::DeadlineExceeded,
                    format!("connect did not finish within {:?}", self.connect_timeout),
                )
            })?
            .map_err(map_error)?;
        debug!(schema, id = conn.id(), "Opened target connection");
        Ok(MySqlConnection { conn })
    }
}

#[derive(Debug)]
pub struct MySqlConnection {
    conn: Conn,
}

#[async_trait::async_trait]
impl TargetConnection for MySqlConnection {
    type Statement = mysql_async::Statement;

    async fn query(&mut self, sql: &str, rows: &mut RowCollector) -> Result<()> {
        let result: Vec<Row> = self.conn.query(sql).await.map_err(map_error)?;
        for row in result {
            rows.push_row(row_values(row));
        }
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> Result<mysql_async::Statement> {
        self.conn.prep(sql).await.map_err(map_error)
    }

    async fn execute(
        &mut self,
        statement: &mysql_async::Statement,
        params: &[Value],
        rows: &mut RowCollector,
    ) -> Result<()> {
        let params = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(to_mysql).collect())
        };
        let result: Vec<Row> = self.conn.exec(statement.clone(), params).await.map_err(map_error)?;
        for row in result {
            rows.push_row(row_values(row));
        }
        Ok(())
    }

    async fn close_statement(&mut self, statement: mysql_async::Statement) -> Result<()> {
        self.conn.close(statement).await.map_err(map_error)
    }

    async fn close(self) -> Result<()> {
        self.conn.disconnect().await.map_err(map_error)
    }
}

fn map_error(err: mysql_async::Error) -> ReplayError {
    match err {
        mysql_async::Error::Server(e) => ReplayError::server(e.code, e.message),
        mysql_async::Error::Io(e) => ReplayError::connection_lost(ConnectionLoss::InvalidConnection, e.to_string()),
        mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed) => {
            ReplayError::connection_lost(ConnectionLoss::ConnectionClosed, "connection closed by target")
        }
        other => ReplayError::driver(other.to_string()),
    }
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Int(v) => mysql_async::Value::Int(*v),
        Value::UInt(v) => mysql_async::Value::UInt(*v),
        Value::Float(v) => mysql_async::Value::Float(*v),
        Value::Double(v) => mysql_async::Value::Double(*v),
        Value::Text(s) => mysql_async::Value::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => mysql_async::Value::Bytes(b.clone()),
    }
}

fn from_mysql(value: mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(v) => Value::Int(v),
        mysql_async::Value::UInt(v) => Value::UInt(v),
        mysql_async::Value::Float(v) => Value::Float(v),
        mysql_async::Value::Double(v) => Value::Double(v),
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            Value::Text(render_date(year, month, day, hour, minute, second, micros))
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            Value::Text(render_time(negative, days, hours, minutes, seconds, micros))
        }
    }
}

/// Render a DATE/DATETIME the way the captured binary value with the same content is
/// rendered: the server sends 0, 4, 7 or 11 bytes depending on which parts are non-zero.
fn render_date(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, micros: u32) -> String {
    let date = format!("{year:04}-{month:02}-{day:02}");
    let clock = format!("{hour:02}:{minute:02}:{second:02}");
    if micros > 0 {
        format!("{date} {clock}.{micros:06}")
    } else if hour > 0 || minute > 0 || second > 0 {
        format!("{date} {clock}")
    } else if year > 0 || month > 0 || day > 0 {
        date
    } else {
        "0000-00-00 00:00:00".to_string()
    }
}

/// Render a TIME as `[-]D HH:MM:SS[.ffffff]`, matching captured binary values.
fn render_time(negative: bool, days: u32, hours: u8, minutes: u8, seconds: u8, micros: u32) -> String {
    let sign = if negative { "-" } else { "" };
    let clock = format!("{days} {hours:02}:{minutes:02}:{seconds:02}");
    if micros > 0 {
        format!("{sign}{clock}.{micros:06}")
    } else if negative || days > 0 || hours > 0 || minutes > 0 || seconds > 0 {
        format!("{sign}{clock}")
    } else {
        "0 00:00:00".to_string()
    }
}

// `Row::unwrap` hands back the raw column values; none have been taken yet
fn row_values(row: Row) -> Vec<Value> {
    row.unwrap().into_iter().map(from_mysql).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        let closed = map_error(mysql_async::Error::Driver(mysql_async::DriverError::ConnectionClosed));
        assert!(closed.is_connection_loss());

        let io = map_error(mysql_async::Error::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        )));
        assert!(io.is_connection_loss());
    }

    #[test]
    fn value_conversion() {
        assert_eq!(from_mysql(mysql_async::Value::NULL), Value::Null);
        assert_eq!(from_mysql(mysql_async::Value::Bytes(b"abc".to_vec())), Value::Text("abc".into()));
        assert_eq!(
            from_mysql(mysql_async::Value::Date(2024, 2, 29, 13, 5, 9, 0)),
            Value::Text("2024-02-29 13:05:09".into())
        );
        assert_eq!(
            from_mysql(mysql_async::Value::Time(true, 1, 2, 3, 4, 0)),
            Value::Text("-1 02:03:04".into())
        );
        assert_eq!(to_mysql(&Value::Text("x".into())), mysql_async::Value::Bytes(b"x".to_vec()));
    }

    fn captured(field_type: u8, bytes: &[u8]) -> Value {
        crate::protocol::params::decode_binary_value(&mut crate::protocol::codec::Reader::new(bytes), field_type, false)
            .unwrap()
    }

    #[test]
    fn temporal_values_render_like_captured_ones() {
        use crate::protocol::flags::field_type as ft;

        let cases = [
            (mysql_async::Value::Date(2024, 2, 29, 0, 0, 0, 0), ft::DATE, vec![4, 0xe8, 0x07, 2, 29]),
            (mysql_async::Value::Date(2024, 2, 29, 13, 5, 9, 0), ft::DATETIME, vec![7, 0xe8, 0x07, 2, 29, 13, 5, 9]),
            (
                mysql_async::Value::Date(2024, 2, 29, 13, 5, 9, 42),
                ft::DATETIME,
                vec![11, 0xe8, 0x07, 2, 29, 13, 5, 9, 42, 0, 0, 0],
            ),
            (mysql_async::Value::Date(0, 0, 0, 0, 0, 0, 0), ft::DATE, vec![0]),
            (mysql_async::Value::Time(true, 1, 2, 3, 4, 0), ft::TIME, vec![8, 1, 1, 0, 0, 0, 2, 3, 4]),
            (
                mysql_async::Value::Time(false, 0, 2, 3, 4, 7),
                ft::TIME,
                vec![12, 0, 0, 0, 0, 0, 2, 3, 4, 7, 0, 0, 0],
            ),
            (mysql_async::Value::Time(false, 0, 0, 0, 0, 0), ft::TIME, vec![0]),
        ];
        for (replayed, field_type, wire) in cases {
            assert_eq!(from_mysql(replayed), captured(field_type, &wire));
        }
    }

    #[test]
    fn rejects_bad_url() {
        let config = TargetConfig { url: "not a url".into(), connect_timeout_ms: 10 };
        assert!(matches!(MySqlDriver::new(&config), Err(ReplayError::Config { .. })));
    }
}
