//! Fake collaborators used across the integration test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use integration_supervisor::definition::IntegrationDefinition;
use integration_supervisor::errors::Result;
use integration_supervisor::traits::{ChildStreams, DiscoverySource, Emitter, Executor, IdLookup, Match, SupervisorChildError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One step of a fake child process's lifetime.
#[derive(Clone)]
pub enum ScriptEvent {
    Stdout(String),
    Stderr(String),
    Error { message: String, exit_code: Option<i32> },
    Delay(Duration),
}

/// An `Executor` that replays a fixed script instead of spawning a real
/// process. `cancelled_flag` is set if a `Delay` step observes the launch
/// scope cancel before the delay elapses, standing in for a real process
/// being killed on timeout (`kill_on_drop` in `ProcessExecutor`).
pub struct ScriptedExecutor {
    pub events: Vec<ScriptEvent>,
    pub cancelled_flag: Arc<AtomicBool>,
    pub pid: Option<u32>,
}

impl ScriptedExecutor {
    pub fn new(events: Vec<ScriptEvent>) -> Self {
        Self {
            events,
            cancelled_flag: Arc::new(AtomicBool::new(false)),
            pid: Some(4242),
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn launch(
        &self,
        _definition: &IntegrationDefinition,
        _matched: &Match,
        scope: CancellationToken,
    ) -> Result<ChildStreams> {
        let (stdout_tx, stdout_rx) = mpsc::channel(16);
        let (stderr_tx, stderr_rx) = mpsc::channel(16);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let events = self.events.clone();
        let cancelled_flag = self.cancelled_flag.clone();

        tokio::spawn(async move {
            for event in events {
                match event {
                    ScriptEvent::Stdout(line) => {
                        if stdout_tx.send(Bytes::from(line.into_bytes())).await.is_err() {
                            return;
                        }
                    }
                    ScriptEvent::Stderr(line) => {
                        if stderr_tx.send(Bytes::from(line.into_bytes())).await.is_err() {
                            return;
                        }
                    }
                    ScriptEvent::Error { message, exit_code } => {
                        let _ = errors_tx.send(SupervisorChildError { message, exit_code }).await;
                        return;
                    }
                    ScriptEvent::Delay(duration) => {
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => {}
                            _ = scope.cancelled() => {
                                cancelled_flag.store(true, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(ChildStreams {
            stdout: stdout_rx,
            stderr: stderr_rx,
            errors: errors_rx,
            pid: self.pid,
        })
    }
}

/// One payload captured by `RecordingEmitter`.
#[derive(Debug, Clone)]
pub struct EmittedPayload {
    pub integration: String,
    pub entity_rewrites: BTreeMap<String, String>,
    pub payload: String,
}

#[derive(Default)]
pub struct RecordingEmitter {
    pub emitted: Mutex<Vec<EmittedPayload>>,
}

#[async_trait]
impl Emitter for RecordingEmitter {
    async fn emit(
        &self,
        definition: &IntegrationDefinition,
        _labels: &BTreeMap<String, String>,
        entity_rewrites: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> Result<()> {
        self.emitted.lock().unwrap().push(EmittedPayload {
            integration: definition.name.clone(),
            entity_rewrites: entity_rewrites.clone(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }
}

/// Always reports a fixed host name.
pub struct FixedIdLookup(pub &'static str);

#[async_trait]
impl IdLookup for FixedIdLookup {
    async fn agent_short_entity_name(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Returns a fixed set of matches every call, simulating a discovery pass
/// that fans out over several already-known targets (§4.5 step 2).
pub struct FixedDiscovery {
    pub matches: Vec<Match>,
}

#[async_trait]
impl DiscoverySource for FixedDiscovery {
    async fn fetch(&self) -> Result<Vec<Match>> {
        Ok(self.matches.clone())
    }
}

pub fn single_match(key: &str, value: &str) -> Match {
    let mut m = Match::new();
    m.insert(key.to_string(), value.to_string());
    m
}

/// An `Executor` that counts launches and closes all three streams
/// immediately, for tests only interested in launch cadence (e.g. whether a
/// recurring runner stops being relaunched once its Group is stopped).
pub struct CountingExecutor {
    pub launches: Arc<AtomicUsize>,
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn launch(
        &self,
        _definition: &IntegrationDefinition,
        _matched: &Match,
        _scope: CancellationToken,
    ) -> Result<ChildStreams> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (_stdout_tx, stdout_rx) = mpsc::channel(1);
        let (_stderr_tx, stderr_rx) = mpsc::channel(1);
        let (_errors_tx, errors_rx) = mpsc::channel(1);
        Ok(ChildStreams {
            stdout: stdout_rx,
            stderr: stderr_rx,
            errors: errors_rx,
            pid: None,
        })
    }
}
