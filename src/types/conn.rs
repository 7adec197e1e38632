//! Connection identity

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use xxhash_rust::xxh3::xxh3_64;

/// Identity of one captured connection.
///
/// Every per-connection structure (protocol session, replay session, output artifacts) is
/// keyed by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

impl ConnId {
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self { client, server }
    }

    /// Hexadecimal xxh3 fingerprint of `client->server`, used to name output artifacts.
    ///
    /// The hash is fixed by the xxh3 format, so names survive toolchain upgrades.
    pub fn fingerprint(&self) -> String {
        format!("{:016x}", xxh3_64(self.to_string().as_bytes()))
    }

    /// File-name-safe prefix for this connection's artifacts: `<fingerprint>-<client>`.
    pub fn file_prefix(&self) -> String {
        let client = self.client.to_string().replace([':', '[', ']'], "_");
        format!("{}-{}", self.fingerprint(), client)
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.client, self.server)
    }
}
