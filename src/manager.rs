//! Directory watcher, hot-reload, request-queue pump, feature-flag
//! enable/disable (§4.9) — second only to the Runner in size.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{RemoteFlag, SupervisorConfig};
use crate::errors::{Result, SupervisorError};
use crate::feature_gate;
use crate::group::{FeaturesCache, Group};
use crate::requests::{ConfigEntryRequest, RequestQueues, SpawnRequest, TerminateRequest};
use crate::tracker::Tracker;
use crate::traits::{Emitter, Executor, IdLookup, InstancesLookup, Loader, Obfuscator};

const LOG_TARGET: &str = "integration_supervisor::manager";

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Owns every Group, the cross-file features index, and the Tracker; the
/// single coordination point for hot reload, in-band requests, and
/// feature-flag toggles (§3, §4.9).
pub struct Manager {
    config: SupervisorConfig,
    loader: Arc<dyn Loader>,
    executor: Arc<dyn Executor>,
    instances_lookup: Arc<dyn InstancesLookup>,
    emitter: Arc<dyn Emitter>,
    id_lookup: Arc<dyn IdLookup>,
    obfuscator: Arc<dyn Obfuscator>,
    tracker: Arc<Tracker>,
    groups: RwLock<HashMap<PathBuf, Group>>,
    features: RwLock<FeaturesCache>,
    queues: RequestQueues,
    spawn_rx: AsyncMutex<mpsc::UnboundedReceiver<SpawnRequest>>,
    config_entry_rx: AsyncMutex<mpsc::UnboundedReceiver<ConfigEntryRequest>>,
    terminate_rx: AsyncMutex<mpsc::UnboundedReceiver<TerminateRequest>>,
    /// Per-path event version, bumped on every watcher event; a debounced
    /// handler only acts if its captured version is still current once
    /// `config.watcher_debounce` has elapsed (§4.9.1).
    debounce_versions: AsyncMutex<HashMap<PathBuf, u64>>,
}

impl Manager {
    /// Loads every file under `config.config_paths`/`config.definition_paths`
    /// via the Loader collaborator, building one Group per valid file;
    /// invalid files are skipped with a warning (§4.9 construction).
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: SupervisorConfig,
        loader: Arc<dyn Loader>,
        executor: Arc<dyn Executor>,
        instances_lookup: Arc<dyn InstancesLookup>,
        emitter: Arc<dyn Emitter>,
        id_lookup: Arc<dyn IdLookup>,
        obfuscator: Arc<dyn Obfuscator>,
    ) -> Result<Self> {
        let (spawn_tx, spawn_rx) = mpsc::unbounded_channel();
        let (config_entry_tx, config_entry_rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let queues = RequestQueues {
            spawn_tx,
            config_entry_tx,
            terminate_tx,
        };

        let mut groups = HashMap::new();
        let mut features = FeaturesCache::new();

        for path in config
            .config_paths
            .iter()
            .chain(config.definition_paths.iter())
        {
            match loader.load(path).await {
                Ok((handles, file_features)) => {
                    features.extend(file_features);
                    groups.insert(path.clone(), Group::new(path.clone(), handles));
                }
                Err(err) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        path = %path.display(),
                        error = %err,
                        "failed to load config, file skipped",
                    );
                }
            }
        }

        Ok(Self {
            config,
            loader,
            executor,
            instances_lookup,
            emitter,
            id_lookup,
            obfuscator,
            tracker: Arc::new(Tracker::new()),
            groups: RwLock::new(groups),
            features: RwLock::new(features),
            queues,
            spawn_rx: AsyncMutex::new(spawn_rx),
            config_entry_rx: AsyncMutex::new(config_entry_rx),
            terminate_rx: AsyncMutex::new(terminate_rx),
            debounce_versions: AsyncMutex::new(HashMap::new()),
        })
    }

    fn start_group(&self, group: &mut Group, parent: &CancellationToken, remote: Option<&RemoteFlag>) {
        group.start(
            parent,
            self.config.verbosity,
            &self.config.agent_features,
            remote,
            self.executor.clone(),
            self.instances_lookup.clone(),
            self.emitter.clone(),
            self.id_lookup.clone(),
            self.obfuscator.clone(),
            self.queues.clone(),
        );
    }

    /// Starts every pre-loaded Group, then the request pump and (if any
    /// config paths are watched) the filesystem watcher (§4.9 `start`).
    /// Requires `self` already wrapped in an `Arc` since the pump and
    /// watcher outlive this call.
    pub async fn start(self: &Arc<Self>, parent: CancellationToken) {
        {
            let mut groups = self.groups.write().await;
            for group in groups.values_mut() {
                self.start_group(group, &parent, None);
            }
        }

        let pump = self.clone();
        let pump_parent = parent.clone();
        tokio::spawn(async move { pump.run_request_pump(pump_parent).await });

        if !self.config.config_paths.is_empty() {
            let watcher = self.clone();
            let watcher_parent = parent.clone();
            tokio::spawn(async move { watcher.run_watcher(watcher_parent).await });
        }
    }

    async fn run_request_pump(self: Arc<Self>, parent: CancellationToken) {
        let mut spawn_rx = self.spawn_rx.lock().await;
        let mut config_entry_rx = self.config_entry_rx.lock().await;
        let mut terminate_rx = self.terminate_rx.lock().await;

        loop {
            tokio::select! {
                _ = parent.cancelled() => return,
                Some(request) = spawn_rx.recv() => self.handle_spawn(request, &parent).await,
                Some(request) = config_entry_rx.recv() => self.handle_config_entry(request, &parent).await,
                Some(request) = terminate_rx.recv() => self.tracker.kill(&request.hash),
            }
        }
    }

    /// §4.9 step (a): a command-channel hash gets a tracked scope; without
    /// one, the definition launches directly under the parent scope. A
    /// tracked launch gets a fresh exit-code channel so the first terminal
    /// error reaches `Tracker::notify_exit` before the hash is untracked.
    async fn handle_spawn(&self, request: SpawnRequest, parent: &CancellationToken) {
        let hash = request
            .definition
            .parent
            .as_ref()
            .and_then(|p| p.command_channel_hash.clone());

        let scope = match &hash {
            Some(hash) => self.tracker.track(parent, hash).0,
            None => parent.clone(),
        };

        let runner = crate::runner::Runner::new(
            request.definition,
            None,
            self.executor.clone(),
            self.instances_lookup.clone(),
            self.emitter.clone(),
            self.id_lookup.clone(),
            self.obfuscator.clone(),
            self.queues.clone(),
            self.config.verbosity,
        );

        let tracker = self.tracker.clone();
        let pid_tx = request.pid_tx;
        let external_exit_tx = request.exit_tx;
        tokio::spawn(async move {
            match hash {
                Some(hash) => {
                    let (exit_tx, exit_rx) = oneshot::channel();
                    let notify_tracker = tracker.clone();
                    let notify_hash = hash.clone();
                    let notify_task = tokio::spawn(async move {
                        if let Ok(code) = exit_rx.await {
                            notify_tracker.notify_exit(&notify_hash, code);
                            if let Some(tx) = external_exit_tx {
                                let _ = tx.send(code);
                            }
                        }
                    });
                    runner.run(scope, pid_tx, Some(exit_tx)).await;
                    // Wait for the exit code to land in the tracker before
                    // untracking, so a terminal error is never lost to the
                    // race between this task finishing and the notify task
                    // being polled.
                    let _ = notify_task.await;
                    tracker.untrack(&hash);
                }
                None => {
                    runner.run(scope, pid_tx, external_exit_tx).await;
                }
            }
        });
    }

    /// §4.9 step (b): every config-entry is tracked by its own content hash.
    async fn handle_config_entry(&self, request: ConfigEntryRequest, parent: &CancellationToken) {
        let hash = request.definition.content_hash();
        let (scope, _pid_rx) = self.tracker.track(parent, &hash);

        let runner = crate::runner::Runner::new(
            request.definition,
            request.discovery,
            self.executor.clone(),
            self.instances_lookup.clone(),
            self.emitter.clone(),
            self.id_lookup.clone(),
            self.obfuscator.clone(),
            self.queues.clone(),
            self.config.verbosity,
        );

        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            runner.run(scope, None, None).await;
            tracker.untrack(&hash);
        });
    }

    /// Watches each configured directory for create/write/remove events,
    /// hot-reloading the affected config file (§4.9.1). The `notify`
    /// callback runs on its own watcher thread and must not block, so it
    /// only forwards events over an unbounded channel.
    async fn run_watcher(self: Arc<Self>, parent: CancellationToken) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        ) {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to start filesystem watcher");
                return;
            }
        };

        for path in &self.config.config_paths {
            if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
                tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %err, "failed to watch path");
            }
        }

        loop {
            tokio::select! {
                _ = parent.cancelled() => return,
                Some(event) = event_rx.recv() => match event {
                    Ok(event) => self.debounce_fs_event(event, &parent).await,
                    Err(err) => tracing::warn!(target: LOG_TARGET, error = %err, "filesystem watch error"),
                },
            }
        }
    }

    /// Remove and rename are treated as delete; create and write are
    /// treated as write. Non-YAML files are ignored. Rather than acting on
    /// the event immediately, bumps the path's version and defers to a
    /// timer task so the burst of create/write events one `mv`/`cp` tends to
    /// produce collapses into a single reload (§4.9.1).
    async fn debounce_fs_event(self: &Arc<Self>, event: Event, parent: &CancellationToken) {
        let is_delete = matches!(event.kind, EventKind::Remove(_));
        let is_write = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
        if !is_delete && !is_write {
            return;
        }

        for path in event.paths {
            if !is_yaml(&path) {
                continue;
            }

            let version = {
                let mut versions = self.debounce_versions.lock().await;
                let slot = versions.entry(path.clone()).or_insert(0);
                *slot += 1;
                *slot
            };

            let this = self.clone();
            let parent = parent.clone();
            let debounce = self.config.watcher_debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                let current = this.debounce_versions.lock().await.get(&path).copied();
                if current != Some(version) {
                    return;
                }
                this.apply_fs_change(&path, is_delete, &parent).await;
            });
        }
    }

    /// Applies the settled write or delete for a single path once its
    /// debounce window has elapsed without a newer event superseding it.
    async fn apply_fs_change(&self, path: &Path, is_delete: bool, parent: &CancellationToken) {
        let existed = {
            let mut groups = self.groups.write().await;
            if let Some(mut group) = groups.remove(path) {
                group.stop();
                true
            } else {
                false
            }
        };

        if is_delete {
            return;
        }

        if !existed {
            tracing::debug!(target: LOG_TARGET, path = %path.display(), "watching newly written path");
        }

        match self.loader.load(path).await {
            Ok((handles, file_features)) => {
                let mut group = Group::new(path.to_path_buf(), handles);
                self.start_group(&mut group, parent, None);
                self.groups.write().await.insert(path.to_path_buf(), group);
                self.features.write().await.extend(file_features);
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %err, "failed to reload config on write");
            }
        }
    }

    /// Resolves `flag_name` to its owning config file; a no-op if already
    /// running, otherwise reloads with the feature forced enabled and
    /// starts it (§4.9.2).
    pub async fn enable_feature(&self, parent: &CancellationToken, flag_name: &str) -> Result<()> {
        let path = self.resolve_feature_path(flag_name).await?;

        let already_running = self
            .groups
            .read()
            .await
            .get(&path)
            .map(Group::is_running)
            .unwrap_or(false);
        if already_running {
            return Ok(());
        }

        let (handles, file_features) = self.loader.load(&path).await?;
        let mut group = Group::new(path.clone(), handles);
        let remote = RemoteFlag {
            name: flag_name.to_string(),
            enabled: true,
        };
        self.start_group(&mut group, parent, Some(&remote));
        self.groups.write().await.insert(path.clone(), group);
        self.features.write().await.extend(file_features);
        Ok(())
    }

    /// Resolves `flag_name` to its owning config file and stops the Group
    /// (§4.9.2).
    pub async fn disable_feature(&self, flag_name: &str) -> Result<()> {
        let path = self.resolve_feature_path(flag_name).await?;
        if let Some(group) = self.groups.write().await.get_mut(&path) {
            group.stop();
        }
        Ok(())
    }

    async fn resolve_feature_path(&self, flag_name: &str) -> Result<PathBuf> {
        self.features
            .read()
            .await
            .get(flag_name)
            .cloned()
            .ok_or_else(|| SupervisorError::FeatureNotFound(flag_name.to_string()))
    }

    /// Runs every pre-loaded Group's single-run definitions to completion
    /// and returns, without starting the request pump or watcher (§4.9.3).
    /// Recurring definitions in the same file are not started in this mode.
    pub async fn run_once(&self, parent: CancellationToken) {
        let groups = self.groups.read().await;
        let mut joins = JoinSet::new();
        for group in groups.values() {
            for definition in group.definitions() {
                if !definition.is_single_run() {
                    continue;
                }
                if !feature_gate::decide(definition.feature.as_deref(), &self.config.agent_features, None) {
                    continue;
                }
                let runner = crate::runner::Runner::new(
                    definition.clone(),
                    None,
                    self.executor.clone(),
                    self.instances_lookup.clone(),
                    self.emitter.clone(),
                    self.id_lookup.clone(),
                    self.obfuscator.clone(),
                    self.queues.clone(),
                    self.config.verbosity,
                );
                let scope = parent.child_token();
                joins.spawn(async move { runner.run(scope, None, None).await });
            }
        }
        while joins.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_yaml_accepts_both_extensions() {
        assert!(is_yaml(Path::new("nri-docker.yml")));
        assert!(is_yaml(Path::new("nri-docker.yaml")));
        assert!(!is_yaml(Path::new("nri-docker.json")));
        assert!(!is_yaml(Path::new("README")));
    }
}
