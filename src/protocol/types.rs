//! Wire-shaped types for the stdout line protocol (§4.4, §6.2).

use bytes::Bytes;

use crate::definition::IntegrationDefinition;

/// One accepted config-protocol entry: the owning config-name plus the
/// child definitions it declares for that family (§3, §6.2).
#[derive(Debug, Clone)]
pub struct ConfigRequestEntry {
    pub config_name: String,
    pub definitions: Vec<IntegrationDefinition>,
}

/// The config-protocol envelope is opaque to the detector; recognizing and
/// parsing it is delegated to this collaborator (§4.4, §9 "opaque builder").
pub trait ConfigRequestBuilder: Send + Sync {
    fn try_build(&self, line: &[u8]) -> Option<ConfigRequestEntry>;
}

/// The result of classifying one stdout line — a true tagged enum per the
/// §9 design note, not an overloaded return/error code.
#[derive(Debug, Clone)]
pub enum StdoutLine {
    Heartbeat,
    CommandRequest { version: u32, raw: Bytes },
    ConfigRequest(ConfigRequestEntry),
    Payload(Bytes),
}
