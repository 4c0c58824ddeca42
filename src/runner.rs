//! Schedules and supervises one integration instance over repeated
//! intervals (§4.5) — the largest single component in the core.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::child_cache::ChildDefinitionCache;
use crate::config::Verbosity;
use crate::definition::{ExecSpec, IntegrationDefinition, WhenCondition};
use crate::feature_gate;
use crate::heartbeat::{self, HeartbeatActuator};
use crate::logline;
use crate::protocol::{self, JsonConfigRequestBuilder, StdoutLine};
use crate::requests::{ConfigEntryRequest, RequestQueues, SpawnRequest, TerminateRequest};
use crate::stderr_ring::StderrRing;
use crate::traits::{
    ChildStreams, DiscoverySource, Emitter, Executor, IdLookup, InstancesLookup, Match, Obfuscator,
};

/// Well-known match key the host entity name is injected under before
/// launch (§4.5 step 4, "inject the host ID into the scope as a well-known
/// value" — there is no scope-local storage in this port, so it travels on
/// the substitution map the Executor already receives).
pub const HOST_ID_MATCH_KEY: &str = "__agent_host_id__";

const LOG_TARGET: &str = "integration_supervisor::runner";

/// A shared, single-use exit-code sink: across a pass with multiple
/// discovery matches, only the first terminal error observed is forwarded,
/// since the runner's `exitCodeChannel` contract is a one-shot surface
/// (§6.5).
type ExitSink = Arc<StdMutex<Option<oneshot::Sender<i32>>>>;

pub struct Runner {
    definition: Arc<IntegrationDefinition>,
    discovery: Option<Arc<dyn DiscoverySource>>,
    executor: Arc<dyn Executor>,
    instances_lookup: Arc<dyn InstancesLookup>,
    emitter: Arc<dyn Emitter>,
    id_lookup: Arc<dyn IdLookup>,
    obfuscator: Arc<dyn Obfuscator>,
    queues: RequestQueues,
    verbosity: Verbosity,
    config_builder: Arc<JsonConfigRequestBuilder>,
    child_cache: Arc<ChildDefinitionCache>,
    stderr_ring: Arc<StderrRing>,
    health_check: Arc<AtomicBool>,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definition: IntegrationDefinition,
        discovery: Option<Arc<dyn DiscoverySource>>,
        executor: Arc<dyn Executor>,
        instances_lookup: Arc<dyn InstancesLookup>,
        emitter: Arc<dyn Emitter>,
        id_lookup: Arc<dyn IdLookup>,
        obfuscator: Arc<dyn Obfuscator>,
        queues: RequestQueues,
        verbosity: Verbosity,
    ) -> Self {
        let capacity = definition.stderr_queue_size.to_ring_capacity();
        Self {
            definition: Arc::new(definition),
            discovery,
            executor,
            instances_lookup,
            emitter,
            id_lookup,
            obfuscator,
            queues,
            verbosity,
            config_builder: Arc::new(JsonConfigRequestBuilder),
            child_cache: Arc::new(ChildDefinitionCache::new()),
            stderr_ring: Arc::new(StderrRing::new(capacity)),
            health_check: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Blocks until `parent` is cancelled or the definition is single-run and
    /// has completed one pass (§4.5).
    pub async fn run(
        &self,
        parent: CancellationToken,
        pid_tx: Option<mpsc::Sender<u32>>,
        exit_tx: Option<oneshot::Sender<i32>>,
    ) {
        let exit_sink: ExitSink = Arc::new(StdMutex::new(exit_tx));

        loop {
            let matches = match self.discover().await {
                Ok(matches) => matches,
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        integration = %self.definition.name,
                        error = %self.obfuscator.redact(&err.to_string()),
                        "discovery fetch failed, skipping pass",
                    );
                    if self.sleep_or_exit(&parent).await {
                        break;
                    }
                    continue;
                }
            };

            if !self.when_conditions_hold() {
                if self.sleep_or_exit(&parent).await {
                    break;
                }
                continue;
            }

            let handles = Arc::new(self.clone_handles());
            let mut pass = JoinSet::new();
            for matched in matches {
                let scope = parent.child_token();
                let pid_tx = pid_tx.clone();
                let exit_sink = exit_sink.clone();
                let this = handles.clone();
                pass.spawn(async move { this.execute_match(scope, matched, pid_tx, exit_sink).await });
            }

            tokio::select! {
                _ = async { while pass.join_next().await.is_some() {} } => {}
                _ = parent.cancelled() => {}
            }

            if self.definition.is_single_run() {
                break;
            }
            if self.sleep_or_exit(&parent).await {
                break;
            }
        }

        self.kill_children().await;
    }

    /// A cheap clone of just the fields a spawned per-match task needs,
    /// avoiding `Runner: Clone` (the JoinSet/health-check state is shared,
    /// not duplicated).
    fn clone_handles(&self) -> PassHandles {
        PassHandles {
            definition: self.definition.clone(),
            executor: self.executor.clone(),
            instances_lookup: self.instances_lookup.clone(),
            emitter: self.emitter.clone(),
            id_lookup: self.id_lookup.clone(),
            obfuscator: self.obfuscator.clone(),
            queues: self.queues.clone(),
            config_builder: self.config_builder.clone(),
            child_cache: self.child_cache.clone(),
            stderr_ring: self.stderr_ring.clone(),
            health_check: self.health_check.clone(),
            debug: self.verbosity.is_debug(),
        }
    }

    async fn discover(&self) -> crate::errors::Result<Vec<Match>> {
        match &self.discovery {
            None => Ok(vec![Match::new()]),
            Some(source) => source.fetch().await,
        }
    }

    fn when_conditions_hold(&self) -> bool {
        self.definition.when.iter().all(|cond| match cond {
            WhenCondition::FeatureFlag(name) => {
                let agent_features = crate::config::AgentFeatures::new();
                feature_gate::decide(Some(name), &agent_features, None)
            }
            WhenCondition::FileExists(path) => path.exists(),
            WhenCondition::EnvEquals { key, value } => {
                std::env::var(key).map(|v| &v == value).unwrap_or(false)
            }
        })
    }

    /// Sleeps for the configured interval unless the definition is
    /// single-run (no wait after the final pass). Returns `true` if the
    /// parent scope cancelled while sleeping.
    async fn sleep_or_exit(&self, parent: &CancellationToken) -> bool {
        if self.definition.is_single_run() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.definition.interval) => false,
            _ = parent.cancelled() => true,
        }
    }

    /// On exit, forwards every child-definition hash this runner has ever
    /// registered to the Manager's terminate queue (§4.5 final step).
    async fn kill_children(&self) {
        for cfg_name in self.child_cache.list_config_names() {
            for hash in self.child_cache.get_hashes(&cfg_name) {
                let _ = self.queues.terminate_tx.send(TerminateRequest { hash });
            }
        }
    }
}

/// Per-match execution context, cheaply cloned into each discovery match's task.
struct PassHandles {
    definition: Arc<IntegrationDefinition>,
    executor: Arc<dyn Executor>,
    instances_lookup: Arc<dyn InstancesLookup>,
    emitter: Arc<dyn Emitter>,
    id_lookup: Arc<dyn IdLookup>,
    obfuscator: Arc<dyn Obfuscator>,
    queues: RequestQueues,
    config_builder: Arc<JsonConfigRequestBuilder>,
    child_cache: Arc<ChildDefinitionCache>,
    stderr_ring: Arc<StderrRing>,
    health_check: Arc<AtomicBool>,
    debug: bool,
}

impl PassHandles {
    /// Resolves `ExecSpec::Named` through the instances lookup into a
    /// literal argv; a literal `ExecSpec::Argv` or a lookup miss is returned
    /// unchanged, leaving the bare name for the Executor to resolve itself.
    async fn resolve_exec(&self) -> Arc<IntegrationDefinition> {
        let ExecSpec::Named { name, args } = &self.definition.exec else {
            return self.definition.clone();
        };
        match self.instances_lookup.resolve(name).await {
            Ok(candidates) if !candidates.is_empty() => {
                let mut resolved = (*self.definition).clone();
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(candidates[0].clone());
                argv.extend(args.clone());
                resolved.exec = ExecSpec::Argv(argv);
                Arc::new(resolved)
            }
            _ => self.definition.clone(),
        }
    }

    async fn execute_match(
        self: Arc<Self>,
        scope: CancellationToken,
        matched: Match,
        pid_tx: Option<mpsc::Sender<u32>>,
        exit_sink: ExitSink,
    ) {
        let (exec_scope, actuator) = match self.definition.timeout {
            Some(timeout) => {
                let (scope, actuator) = heartbeat::with_heartbeat(&scope, timeout, LOG_TARGET);
                (scope, Some(actuator))
            }
            None => (scope, None),
        };

        let mut matched = matched;
        if let Ok(host_id) = self.id_lookup.agent_short_entity_name().await {
            matched.insert(HOST_ID_MATCH_KEY.to_string(), host_id);
        }

        let resolved_definition = self.resolve_exec().await;
        let streams = match self
            .executor
            .launch(&resolved_definition, &matched, exec_scope.clone())
            .await
        {
            Ok(streams) => streams,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    integration = %self.definition.name,
                    error = %self.obfuscator.redact(&err.to_string()),
                    "launch failed, pass abandoned",
                );
                if let Some(actuator) = actuator {
                    actuator.stop();
                }
                return;
            }
        };

        if let (Some(pid), Some(tx)) = (streams.pid, pid_tx.as_ref()) {
            let _ = tx.send(pid).await;
        }

        let ChildStreams {
            stdout,
            stderr,
            errors,
            ..
        } = streams;

        let mut consumers = JoinSet::new();
        {
            let this = self.clone();
            let entity_rewrites = matched.clone();
            let heartbeat = actuator.clone();
            consumers.spawn(async move { this.stdout_task(stdout, entity_rewrites, heartbeat).await });
        }
        {
            let this = self.clone();
            consumers.spawn(async move { this.stderr_task(stderr).await });
        }
        {
            let this = self.clone();
            consumers.spawn(async move { this.error_task(errors, exit_sink).await });
        }

        while consumers.join_next().await.is_some() {}

        if let Some(actuator) = actuator {
            actuator.stop();
        }
    }

    async fn stdout_task(
        self: Arc<Self>,
        mut stdout: mpsc::Receiver<bytes::Bytes>,
        entity_rewrites: BTreeMap<String, String>,
        heartbeat: Option<HeartbeatActuator>,
    ) {
        let labels = self.definition.labels.clone();
        while let Some(line) = stdout.recv().await {
            match protocol::classify(&line, self.config_builder.as_ref()) {
                StdoutLine::Heartbeat => {
                    if let Some(hb) = &heartbeat {
                        hb.heart_beat();
                    }
                }
                StdoutLine::CommandRequest { raw, .. } => match protocol::build_definitions(&raw) {
                    Ok(definitions) => {
                        for definition in definitions {
                            let _ = self.queues.spawn_tx.send(SpawnRequest {
                                definition,
                                pid_tx: None,
                                exit_tx: None,
                            });
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target: LOG_TARGET, error = %err, "malformed command-request, line dropped");
                    }
                },
                StdoutLine::ConfigRequest(entry) => {
                    let previous_hashes: HashSet<String> = self
                        .child_cache
                        .get_hashes(&entry.config_name)
                        .into_iter()
                        .collect();
                    let removed = self
                        .child_cache
                        .replace_config(&entry.config_name, entry.definitions.clone());
                    for hash in removed {
                        let _ = self.queues.terminate_tx.send(TerminateRequest { hash });
                    }
                    for definition in entry.definitions {
                        if previous_hashes.contains(&definition.content_hash()) {
                            continue;
                        }
                        let _ = self.queues.config_entry_tx.send(ConfigEntryRequest {
                            definition,
                            discovery: None,
                        });
                    }
                }
                StdoutLine::Payload(payload) => {
                    let result = self
                        .emitter
                        .emit(&self.definition, &labels, &entity_rewrites, &payload)
                        .await;
                    let first_emit = !self.health_check.swap(true, Ordering::SeqCst);
                    match result {
                        Ok(()) => {
                            if let Some(hb) = &heartbeat {
                                hb.heart_beat();
                            }
                            if first_emit {
                                tracing::info!(target: LOG_TARGET, integration = %self.definition.name, "first telemetry emit succeeded");
                            }
                        }
                        Err(err) => {
                            if first_emit {
                                tracing::warn!(target: LOG_TARGET, integration = %self.definition.name, error = %err, "first telemetry emit failed");
                            }
                        }
                    }
                }
            }
        }
    }

    async fn stderr_task(self: Arc<Self>, mut stderr: mpsc::Receiver<bytes::Bytes>) {
        while let Some(line) = stderr.recv().await {
            let text = String::from_utf8_lossy(&line).into_owned();
            let redacted = self.obfuscator.redact(&text);
            self.stderr_ring.add(redacted.clone().into_bytes()).await;

            if !self.debug {
                let fields = logline::parse(line.as_ref());
                if matches!(fields.get("level").map(String::as_str), Some("error") | Some("fatal"))
                {
                    tracing::info!(target: LOG_TARGET, integration = %self.definition.name, ?fields, "elevated stderr line");
                }
            }
        }
    }

    async fn error_task(
        self: Arc<Self>,
        mut errors: mpsc::Receiver<crate::traits::SupervisorChildError>,
        exit_sink: ExitSink,
    ) {
        if let Some(err) = errors.recv().await {
            let tail = self.stderr_ring.flush().await;
            let redacted_tail = self.obfuscator.redact(&tail);
            tracing::warn!(
                target: LOG_TARGET,
                integration = %self.definition.name,
                error = %err.message,
                stderr_tail = %redacted_tail,
                "child terminal error",
            );
            if let Some(code) = err.exit_code {
                if let Ok(mut guard) = exit_sink.lock() {
                    if let Some(tx) = guard.take() {
                        let _ = tx.send(code);
                    }
                }
            }
        }
    }
}
