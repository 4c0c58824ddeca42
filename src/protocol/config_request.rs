//! Default JSON builder for the config-protocol envelope (§6.2, §9 "opaque
//! builder collaborator"). Embedders may substitute their own
//! `ConfigRequestBuilder`; this one recognizes a sibling shape to the
//! command-request envelope, scoped under a named config-group.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use super::types::{ConfigRequestBuilder, ConfigRequestEntry};
use crate::definition::{ExecSpec, IntegrationDefinition, StderrQueueSize};

#[derive(Deserialize)]
struct Envelope {
    config_protocol_version: String,
    config_name: String,
    integrations: Vec<ChildEntry>,
}

#[derive(Deserialize)]
struct ChildEntry {
    name: String,
    command: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

const DEFAULT_CHILD_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct JsonConfigRequestBuilder;

impl ConfigRequestBuilder for JsonConfigRequestBuilder {
    fn try_build(&self, line: &[u8]) -> Option<ConfigRequestEntry> {
        let envelope: Envelope = serde_json::from_slice(line).ok()?;
        if envelope.config_protocol_version != "1" {
            return None;
        }

        let definitions = envelope
            .integrations
            .into_iter()
            .map(|entry| {
                let args = entry.args.unwrap_or_default();
                let env = entry.env.unwrap_or_default();
                let exec = match entry.command {
                    Some(command) if !command.is_empty() => {
                        let mut argv = Vec::with_capacity(args.len() + 1);
                        argv.push(command);
                        argv.extend(args.clone());
                        ExecSpec::Argv(argv)
                    }
                    _ => ExecSpec::Named {
                        name: entry.name.clone(),
                        args: args.clone(),
                    },
                };
                IntegrationDefinition {
                    name: entry.name.clone(),
                    instance_name: Some(entry.name),
                    exec,
                    env,
                    embedded_config: None,
                    interval: entry
                        .interval_ms
                        .map(Duration::from_millis)
                        .unwrap_or(DEFAULT_CHILD_INTERVAL),
                    timeout: None,
                    when: Vec::new(),
                    labels: BTreeMap::new(),
                    tags: BTreeMap::new(),
                    inventory_source: None,
                    stderr_queue_size: StderrQueueSize::DEFAULT,
                    parent: None,
                    feature: None,
                }
            })
            .collect();

        Some(ConfigRequestEntry {
            config_name: envelope.config_name,
            definitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_config_protocol_envelope() {
        let builder = JsonConfigRequestBuilder;
        let entry = builder
            .try_build(
                br#"{"config_protocol_version":"1","config_name":"docker","integrations":[{"name":"c1","command":"nri-docker"}]}"#,
            )
            .unwrap();
        assert_eq!(entry.config_name, "docker");
        assert_eq!(entry.definitions.len(), 1);
    }

    #[test]
    fn unrelated_json_is_not_a_config_request() {
        let builder = JsonConfigRequestBuilder;
        assert!(builder
            .try_build(br#"{"event_type":"TestSample"}"#)
            .is_none());
    }

    #[test]
    fn wrong_version_is_not_a_config_request() {
        let builder = JsonConfigRequestBuilder;
        assert!(builder
            .try_build(
                br#"{"config_protocol_version":"2","config_name":"docker","integrations":[]}"#
            )
            .is_none());
    }
}
