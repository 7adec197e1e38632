//! Handshake response decoding
//!
//! The client's reply to the server greeting carries the username and, when the client
//! connected with a database, the schema the replayed connection must be scoped to.

use super::codec::Reader;
use super::flags::capability;
use crate::{ReplayError, Result};

/// Fields of a client handshake response needed for replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub username: String,
    /// Empty when the client did not connect with a database
    pub schema: String,
}

fn short(what: &str, err: ReplayError) -> ReplayError {
    ReplayError::decode("Handshake response", format!("cannot read {}: {}", what, err))
}

/// True when a server-direction payload looks like a protocol 9 or 10 greeting.
pub fn is_greeting(payload: &[u8]) -> bool {
    use super::flags::marker::{HANDSHAKE_V9, HANDSHAKE_V10};
    payload.len() >= 6 && matches!(payload[0], HANDSHAKE_V9 | HANDSHAKE_V10)
}

/// Decode a handshake response body.
pub fn decode_handshake_response(body: &[u8]) -> Result<HandshakeResponse> {
    let mut r = Reader::new(body);
    let mut caps = r.u16_le().map_err(|e| short("capability flags", e))? as u32;

    if caps & capability::PROTOCOL_41 == 0 {
        return decode_legacy(r, caps);
    }

    let upper = r.u16_le().map_err(|e| short("extended capability flags", e))? as u32;
    caps |= upper << 16;
    // max-packet size (4), character set (1), reserved (23)
    r.skip(28).map_err(|e| short("max-packet size, character set and reserved", e))?;
    let username = r.nul_terminated().map_err(|e| short("username", e))?;

    if caps & capability::PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let len = r
            .lenenc_int()
            .map_err(|e| short("length of auth-response", e))?
            .unwrap_or(0);
        let len = usize::try_from(len)
            .map_err(|_| ReplayError::decode("Handshake response", "auth-response length overflows"))?;
        r.skip(len).map_err(|e| short("auth-response", e))?;
    } else if caps & capability::SECURE_CONNECTION != 0 {
        let len = r.u8().map_err(|e| short("length of auth-response", e))?;
        r.skip(len as usize).map_err(|e| short("auth-response", e))?;
    } else {
        r.nul_terminated().map_err(|e| short("auth-response", e))?;
    }

    let schema = if caps & capability::CONNECT_WITH_DB != 0 {
        lossy(r.nul_terminated().map_err(|e| short("database", e))?)
    } else {
        String::new()
    };

    Ok(HandshakeResponse { capabilities: caps, username: lossy(username), schema })
}

/// Pre-4.1 layout: 3-byte max-packet size, then positional NUL-terminated fields.
fn decode_legacy(mut r: Reader<'_>, caps: u32) -> Result<HandshakeResponse> {
    r.skip(3).map_err(|e| short("max-packet size", e))?;
    let username = lossy(r.nul_terminated().map_err(|e| short("username", e))?);
    let mut schema = String::new();
    if caps & capability::CONNECT_WITH_DB != 0 {
        r.nul_terminated().map_err(|e| short("auth-response", e))?;
        schema = lossy(r.nul_terminated().map_err(|e| short("database", e))?);
    }
    Ok(HandshakeResponse { capabilities: caps, username, schema })
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
