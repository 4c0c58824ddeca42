//! Classifies one stdout line as exactly one protocol shape (§4.4).

use bstr::ByteSlice;
use bytes::Bytes;
use serde_json::Value;

use super::types::{ConfigRequestBuilder, StdoutLine};

/// Classification is exclusive and evaluated in the order: heartbeat,
/// command-request, config-request, payload.
pub fn classify(line: &[u8], config_builder: &dyn ConfigRequestBuilder) -> StdoutLine {
    if line.trim() == b"{}" {
        return StdoutLine::Heartbeat;
    }
    if let Some(version) = command_request_version(line) {
        return StdoutLine::CommandRequest {
            version,
            raw: Bytes::copy_from_slice(line),
        };
    }
    if let Some(entry) = config_builder.try_build(line) {
        return StdoutLine::ConfigRequest(entry);
    }
    StdoutLine::Payload(Bytes::copy_from_slice(line))
}

/// `command_request_version` must be a JSON string containing a decimal
/// integer; a numeric field here is malformed and falls through to the next
/// classification rule rather than being treated as a command-request.
fn command_request_version(line: &[u8]) -> Option<u32> {
    let value: Value = serde_json::from_slice(line).ok()?;
    let field = value.as_object()?.get("command_request_version")?;
    field.as_str()?.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::ConfigRequestEntry;

    struct NoConfigRequests;
    impl ConfigRequestBuilder for NoConfigRequests {
        fn try_build(&self, _line: &[u8]) -> Option<ConfigRequestEntry> {
            None
        }
    }

    #[test]
    fn heartbeat_trims_surrounding_whitespace() {
        assert!(matches!(
            classify(b"  {}  ", &NoConfigRequests),
            StdoutLine::Heartbeat
        ));
    }

    #[test]
    fn numeric_version_field_is_not_a_command_request() {
        let line = br#"{"command_request_version":1,"commands":[]}"#;
        assert!(matches!(
            classify(line, &NoConfigRequests),
            StdoutLine::Payload(_)
        ));
    }

    #[test]
    fn string_version_field_is_a_command_request() {
        let line = br#"{"command_request_version":"1","commands":[]}"#;
        match classify(line, &NoConfigRequests) {
            StdoutLine::CommandRequest { version, .. } => assert_eq!(version, 1),
            other => panic!("expected CommandRequest, got {other:?}"),
        }
    }

    #[test]
    fn arbitrary_telemetry_is_a_payload() {
        let line = br#"{"event_type":"TestSample","value":"hello"}"#;
        assert!(matches!(
            classify(line, &NoConfigRequests),
            StdoutLine::Payload(_)
        ));
    }
}
