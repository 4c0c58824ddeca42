//! Minimal concrete collaborators wired up by the standalone binary.
//!
//! None of this is required by the core (§6's traits are the only contract
//! the core depends on); an embedder is free to substitute YAML parsing, a
//! real telemetry transport, or a service-discovery-backed id lookup.
//! `JsonFileLoader` reads JSON rather than YAML deliberately: YAML parsing
//! is an explicit non-goal (§1), but `IntegrationDefinition` already derives
//! `serde::Deserialize`, so a JSON file format needs no parser of its own.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::definition::{ExecSpec, IntegrationDefinition};
use crate::errors::{Result, SupervisorError};
use crate::group::{FeaturesCache, GroupHandles};
use crate::traits::{
    ChildStreams, Emitter, Executor, IdLookup, InstancesLookup, Loader, Match, SupervisorChildError,
};

/// Reads a JSON array of `IntegrationDefinition` from `cfg_path`. Any
/// definition with a `feature` name populates the returned `FeaturesCache`.
/// Discovery sources are not representable in this default format; build a
/// custom `Loader` to support them.
#[derive(Default)]
pub struct JsonFileLoader;

#[async_trait]
impl Loader for JsonFileLoader {
    async fn load(&self, cfg_path: &Path) -> Result<(GroupHandles, FeaturesCache)> {
        let content = tokio::fs::read_to_string(cfg_path)
            .await
            .map_err(|e| SupervisorError::LoadFailed(cfg_path.display().to_string(), e.to_string()))?;
        let definitions: Vec<IntegrationDefinition> = serde_json::from_str(&content)
            .map_err(|e| SupervisorError::LoadFailed(cfg_path.display().to_string(), e.to_string()))?;

        let mut features = FeaturesCache::new();
        let mut sanitized = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(feature) = &definition.feature {
                features.insert(feature.clone(), cfg_path.to_path_buf());
            }
            sanitized.push(definition.sanitize()?);
        }

        Ok((
            GroupHandles {
                definitions: sanitized,
                discovery: None,
            },
            features,
        ))
    }
}

/// Launches subprocesses with `tokio::process::Command`. `ExecSpec::Named`
/// is resolved by treating the name as a bare executable on `PATH`; a real
/// instances lookup (looking a name up in an installed-integrations
/// manifest) is an embedder concern this default does not implement.
pub struct ProcessExecutor {
    passthrough_env: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(passthrough_env: Vec<String>) -> Self {
        Self { passthrough_env }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn launch(
        &self,
        definition: &IntegrationDefinition,
        matched: &Match,
        scope: CancellationToken,
    ) -> Result<ChildStreams> {
        let (program, args) = match &definition.exec {
            ExecSpec::Argv(argv) => {
                let mut iter = argv.iter();
                let program = iter
                    .next()
                    .ok_or_else(|| {
                        SupervisorError::LaunchFailed(definition.name.clone(), "empty argv".into())
                    })?
                    .clone();
                (program, iter.cloned().collect::<Vec<_>>())
            }
            ExecSpec::Named { name, args } => (name.clone(), args.clone()),
        };

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &definition.env {
            command.env(key.to_uppercase(), value);
        }
        for (key, value) in matched {
            command.env(key.to_uppercase(), value);
        }
        for key in &self.passthrough_env {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::LaunchFailed(definition.name.clone(), e.to_string()))?;

        let pid = child.id();
        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");

        let (stdout_tx, stdout_rx) = mpsc::channel(64);
        let (stderr_tx, stderr_rx) = mpsc::channel(64);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        tokio::spawn(stream_lines(stdout, stdout_tx));
        tokio::spawn(stream_lines(stderr, stderr_tx));

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => {}
                        Ok(status) => {
                            let _ = errors_tx
                                .send(SupervisorChildError {
                                    message: format!("exited with {status}"),
                                    exit_code: status.code(),
                                })
                                .await;
                        }
                        Err(err) => {
                            let _ = errors_tx
                                .send(SupervisorChildError { message: err.to_string(), exit_code: None })
                                .await;
                        }
                    }
                }
                _ = scope.cancelled() => {
                    // `child` drops at the end of this task; `kill_on_drop`
                    // tears the process down.
                }
            }
        });

        Ok(ChildStreams {
            stdout: stdout_rx,
            stderr: stderr_rx,
            errors: errors_rx,
            pid,
        })
    }
}

/// Resolves `ExecSpec::Named` against `PATH`, the way a shell would; a real
/// deployment substitutes an installed-integrations manifest lookup here.
#[derive(Default)]
pub struct PathInstancesLookup;

#[async_trait]
impl InstancesLookup for PathInstancesLookup {
    async fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let Some(path_var) = std::env::var_os("PATH") else {
            return Ok(Vec::new());
        };
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            if tokio::fs::metadata(&candidate).await.is_ok() {
                return Ok(vec![candidate.display().to_string()]);
            }
        }
        Ok(Vec::new())
    }
}

async fn stream_lines(stream: impl tokio::io::AsyncRead + Unpin, tx: mpsc::Sender<Bytes>) {
    let mut lines = LinesStream::new(BufReader::new(stream).lines());
    while let Some(Ok(line)) = lines.next().await {
        if tx.send(Bytes::from(line)).await.is_err() {
            return;
        }
    }
}

/// Writes each telemetry payload as one JSON line on the supervisor's own
/// stdout; a real deployment substitutes its telemetry transport here.
#[derive(Default)]
pub struct StdoutEmitter;

#[async_trait]
impl Emitter for StdoutEmitter {
    async fn emit(
        &self,
        definition: &IntegrationDefinition,
        labels: &BTreeMap<String, String>,
        entity_rewrites: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> Result<()> {
        let envelope = serde_json::json!({
            "emit_id": Uuid::new_v4().to_string(),
            "emitted_at": chrono::Utc::now().to_rfc3339(),
            "integration": definition.name,
            "labels": labels,
            "entity_rewrites": entity_rewrites,
            "payload": String::from_utf8_lossy(payload),
        });
        let line = format!("{envelope}\n");
        tokio::io::stdout()
            .write_all(line.as_bytes())
            .await
            .map_err(SupervisorError::Io)?;
        Ok(())
    }
}

/// Resolves the host's short entity name from `HOSTNAME`, falling back to a
/// fixed placeholder; a real deployment substitutes a proper host-identity
/// service here.
#[derive(Default)]
pub struct EnvIdLookup;

#[async_trait]
impl IdLookup for EnvIdLookup {
    async fn agent_short_entity_name(&self) -> Result<String> {
        Ok(std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn path_instances_lookup_returns_empty_for_unknown_name() {
        let lookup = PathInstancesLookup;
        let resolved = lookup
            .resolve("definitely-not-a-real-integration-binary")
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn env_id_lookup_falls_back_without_hostname() {
        // SAFETY: test-only, single-threaded within this test's scope.
        unsafe {
            std::env::remove_var("HOSTNAME");
        }
        let lookup = EnvIdLookup;
        assert_eq!(
            lookup.agent_short_entity_name().await.unwrap(),
            "unknown-host"
        );
    }
}
