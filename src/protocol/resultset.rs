//! Result-set decoding
//!
//! [`ResultDecoder`] follows a server response across as many frames as it takes to arrive.
//! The text (COM_QUERY) and binary (COM_STMT_EXECUTE) variants share one pipeline:
//!
//! 1. a header message: OK, ERR, LOCAL INFILE request, or a length-encoded column count
//! 2. one column definition per column
//! 3. the EOF that conventionally follows the column definitions, when present
//! 4. rows until an EOF or ERR marker
//!
//! Each call to [`ResultDecoder::advance`] consumes every complete logical message that is
//! buffered and reports whether the result has ended.

use tracing::{debug, trace, warn};

use super::codec::Reader;
use super::flags::marker;
use super::fsm::load;
use super::params::decode_binary_value;
use crate::error::UNKNOWN_ERROR_CODE;
use crate::{CaptureResult, Column, Frame, ReplayError, Result, Value};

/// Row encoding of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY responses: every value length-encoded text, `0xfb` for NULL
    Text,
    /// COM_STMT_EXECUTE responses: null bitmap then typed binary values
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Columns,
    ColumnsEof,
    Rows,
    Done,
}

/// Outcome of a header message.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Ok { affected_rows: u64, insert_id: u64, status: u16 },
    Err { code: u16, message: String },
    LocalInfile,
    Columns(usize),
}

/// True for an EOF marker message (as opposed to a row starting with `0xfe`).
pub fn is_eof(msg: &[u8]) -> bool {
    msg.first() == Some(&marker::EOF) && msg.len() < 9
}

/// Decode a result-set header message.
pub fn decode_header(msg: &[u8]) -> Result<Header> {
    let first = *msg.first().ok_or_else(|| ReplayError::decode("Result header", "empty message"))?;
    match first {
        marker::OK => {
            let mut r = Reader::new(&msg[1..]);
            let affected_rows = r.lenenc_int()?.unwrap_or(0);
            let insert_id = r.lenenc_int()?.unwrap_or(0);
            let status = r.u16_le()?;
            Ok(Header::Ok { affected_rows, insert_id, status })
        }
        marker::ERR => {
            let (code, message) = decode_err(msg)?;
            Ok(Header::Err { code, message })
        }
        marker::LOCAL_INFILE => Ok(Header::LocalInfile),
        _ => {
            let mut r = Reader::new(msg);
            let count = r.lenenc_int()?.unwrap_or(0);
            if !r.is_empty() {
                return Err(ReplayError::decode(
                    "Result header",
                    format!("{} trailing bytes after column count", r.remaining()),
                ));
            }
            let count = usize::try_from(count)
                .map_err(|_| ReplayError::decode("Result header", "column count overflows"))?;
            Ok(Header::Columns(count))
        }
    }
}

/// Decode an ERR message into its error number and message.
pub fn decode_err(msg: &[u8]) -> Result<(u16, String)> {
    let mut r = Reader::new(msg);
    if r.u8()? != marker::ERR {
        return Err(ReplayError::decode("Error packet", "missing 0xff marker"));
    }
    let code = r.u16_le()?;
    if r.peek() == Some(marker::SQL_STATE) {
        r.skip(1)?;
        // 5-character SQL state
        r.skip(5.min(r.remaining()))?;
    }
    Ok((code, r.rest_string()))
}

/// Decode one column definition message.
pub fn decode_column(msg: &[u8]) -> Result<Column> {
    if msg.first() == Some(&marker::EOF) && (msg.len() == 5 || msg.len() == 1) {
        return Err(ReplayError::decode("Column definition", "column count mismatch"));
    }
    let mut r = Reader::new(msg);
    r.skip_lenenc()?; // catalog
    r.skip_lenenc()?; // schema
    r.skip_lenenc()?; // table
    r.skip_lenenc()?; // original table
    let name = r.lenenc_string()?;
    r.skip_lenenc()?; // original name
    r.skip(1)?;
    let charset = r.u16_le()?;
    let length = r.u32_le()?;
    let field_type = r.u8()?;
    let flags = r.u16_le()?;
    let decimals = r.u8()?;
    Ok(Column { name, charset, length, field_type, flags, decimals })
}

/// Decode a text-protocol row.
pub fn decode_text_row(msg: &[u8], columns: usize) -> Result<Vec<Value>> {
    let mut r = Reader::new(msg);
    let mut row = Vec::with_capacity(columns);
    for _ in 0..columns {
        if r.peek() == Some(marker::NULL) {
            r.skip(1)?;
            row.push(Value::Null);
            continue;
        }
        let bytes = r.lenenc_bytes()?.unwrap_or_default();
        row.push(Value::Text(String::from_utf8_lossy(bytes).into_owned()));
    }
    Ok(row)
}

/// Decode a binary-protocol row.
pub fn decode_binary_row(msg: &[u8], columns: &[Column]) -> Result<Vec<Value>> {
    let mut r = Reader::new(msg);
    if r.u8()? != marker::OK {
        return Err(ReplayError::decode("Binary row", "missing 0x00 row header"));
    }
    // the null bitmap of binary rows is offset by two bits
    let bitmap = r.bytes((columns.len() + 7 + 2) >> 3)?;
    let mut row = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit >> 3] & (1 << (bit & 7)) != 0 {
            row.push(Value::Null);
            continue;
        }
        row.push(decode_binary_value(&mut r, column.field_type, column.is_unsigned())?);
    }
    Ok(row)
}

/// Incremental decoder for one server response.
#[derive(Debug, Clone)]
pub struct ResultDecoder {
    format: RowFormat,
    phase: Phase,
    /// Index of the next unconsumed frame in the session buffer
    cursor: usize,
    column_count: usize,
    result: CaptureResult,
}

impl ResultDecoder {
    /// `start` is the buffer index of the first response frame.
    pub fn new(format: RowFormat, start: usize) -> Self {
        Self {
            format,
            phase: Phase::Header,
            cursor: start,
            column_count: 0,
            result: CaptureResult::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn result(&self) -> &CaptureResult {
        &self.result
    }

    pub fn into_result(self) -> CaptureResult {
        self.result
    }

    /// Consume every complete message buffered in `frames`. Returns true once the result
    /// has ended.
    ///
    /// A malformed header or column definition records the sentinel capture error and ends
    /// the result. A malformed row ends the result with the rows decoded so far.
    pub fn advance(&mut self, frames: &[Frame], max_frame_size: usize) -> bool {
        while self.phase != Phase::Done {
            let Some((msg, consumed)) = load(frames, self.cursor, max_frame_size) else {
                break;
            };
            let next = self.cursor + consumed;
            if let Some(last) = frames.get(next - 1) {
                self.result.end_ns = last.timestamp;
            }
            match self.step(&msg) {
                Ok(true) => self.cursor = next,
                // message left for the next phase
                Ok(false) => {}
                Err(err) => {
                    self.cursor = next;
                    self.fail(err);
                }
            }
        }
        self.is_done()
    }

    /// Returns whether `msg` was consumed.
    fn step(&mut self, msg: &[u8]) -> Result<bool> {
        match self.phase {
            Phase::Header => {
                match decode_header(msg)? {
                    Header::Ok { affected_rows, insert_id, status } => {
                        self.result.affected_rows = affected_rows;
                        self.result.insert_id = insert_id;
                        self.result.status = status;
                        self.phase = Phase::Done;
                    }
                    Header::Err { code, message } => {
                        debug!(code, message = %message, "Captured server error");
                        self.result.error_code = code;
                        self.result.error_message = message;
                        self.phase = Phase::Done;
                    }
                    // the file contents are not part of the capture
                    Header::LocalInfile => self.phase = Phase::Done,
                    Header::Columns(0) => self.phase = Phase::Done,
                    Header::Columns(n) => {
                        trace!(columns = n, "Result set header");
                        self.column_count = n;
                        self.result.columns.reserve(n);
                        self.phase = Phase::Columns;
                    }
                }
                Ok(true)
            }
            Phase::Columns => {
                self.result.columns.push(decode_column(msg)?);
                if self.result.columns.len() == self.column_count {
                    self.phase = Phase::ColumnsEof;
                }
                Ok(true)
            }
            Phase::ColumnsEof => {
                self.phase = Phase::Rows;
                Ok(is_eof(msg))
            }
            Phase::Rows => {
                if is_eof(msg) {
                    if msg.len() == 5 {
                        self.result.status = u16::from_le_bytes([msg[3], msg[4]]);
                    }
                    self.phase = Phase::Done;
                    return Ok(true);
                }
                if msg.first() == Some(&marker::ERR) {
                    let (code, message) = decode_err(msg)?;
                    self.result.error_code = code;
                    self.result.error_message = message;
                    self.phase = Phase::Done;
                    return Ok(true);
                }
                let row = match self.format {
                    RowFormat::Text => decode_text_row(msg, self.column_count)?,
                    RowFormat::Binary => decode_binary_row(msg, &self.result.columns)?,
                };
                self.result.rows.push(row);
                Ok(true)
            }
            Phase::Done => Ok(true),
        }
    }

    fn fail(&mut self, err: ReplayError) {
        match self.phase {
            Phase::Rows => {
                warn!(rows = self.result.rows.len(), error = %err, "Failed to decode row, ending result");
            }
            _ => {
                warn!(error = %err, "Failed to decode result, recording capture error");
                if self.result.error_code == 0 {
                    self.result.error_code = UNKNOWN_ERROR_CODE;
                    self.result.error_message = err.to_string();
                }
            }
        }
        self.phase = Phase::Done;
    }
}
