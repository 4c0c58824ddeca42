//! Builds `IntegrationDefinition`s from an accepted command-request envelope (§6.2).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::definition::{ExecSpec, IntegrationDefinition, StderrQueueSize};
use crate::errors::{Result, SupervisorError};

#[derive(Deserialize)]
struct Envelope {
    command_request_version: String,
    commands: Vec<CommandEntry>,
}

#[derive(Deserialize)]
struct CommandEntry {
    name: String,
    command: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
}

/// Parses a raw command-request line into its embedded definitions. Only
/// `command_request_version == "1"` is recognized (§6.2). `null` `args`/`env`
/// are tolerated and equivalent to empty.
pub fn build_definitions(raw: &[u8]) -> Result<Vec<IntegrationDefinition>> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    if envelope.command_request_version != "1" {
        return Err(SupervisorError::UnsupportedCommandVersion(
            envelope.command_request_version,
        ));
    }

    Ok(envelope
        .commands
        .into_iter()
        .map(|cmd| {
            let args = cmd.args.unwrap_or_default();
            let env = cmd.env.unwrap_or_default();
            let exec = match cmd.command {
                Some(command) if !command.is_empty() => {
                    let mut argv = Vec::with_capacity(args.len() + 1);
                    argv.push(command);
                    argv.extend(args.clone());
                    ExecSpec::Argv(argv)
                }
                _ => ExecSpec::Named {
                    name: cmd.name.clone(),
                    args: args.clone(),
                },
            };
            IntegrationDefinition {
                name: cmd.name.clone(),
                instance_name: Some(cmd.name),
                exec,
                env,
                embedded_config: None,
                interval: Duration::ZERO,
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
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_args_and_env_equal_empty() {
        let a = build_definitions(
            br#"{"command_request_version":"1","commands":[{"name":"x","command":"echo","args":null,"env":null}]}"#,
        )
        .unwrap();
        let b = build_definitions(
            br#"{"command_request_version":"1","commands":[{"name":"x","command":"echo","args":[],"env":{}}]}"#,
        )
        .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content_hash(), b[0].content_hash());
    }

    #[test]
    fn empty_command_resolves_by_name() {
        let defs = build_definitions(
            br#"{"command_request_version":"1","commands":[{"name":"shell-test","args":["--flag"]}]}"#,
        )
        .unwrap();
        assert_eq!(
            defs[0].exec,
            ExecSpec::Named {
                name: "shell-test".into(),
                args: vec!["--flag".into()]
            }
        );
        assert!(defs[0].is_single_run());
    }

    #[test]
    fn non_empty_command_wins_over_name_resolution() {
        let defs = build_definitions(
            br#"{"command_request_version":"1","commands":[{"name":"x","command":"nri-docker","args":["--verbose"]}]}"#,
        )
        .unwrap();
        assert_eq!(
            defs[0].exec,
            ExecSpec::Argv(vec!["nri-docker".into(), "--verbose".into()])
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err =
            build_definitions(br#"{"command_request_version":"2","commands":[]}"#).unwrap_err();
        assert!(matches!(err, SupervisorError::UnsupportedCommandVersion(_)));
    }
}
