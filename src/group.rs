//! Holds the runners produced from one config file (§3 Group, §4.6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentFeatures, RemoteFlag, Verbosity};
use crate::definition::IntegrationDefinition;
use crate::feature_gate;
use crate::requests::RequestQueues;
use crate::traits::{DiscoverySource, Emitter, Executor, IdLookup, InstancesLookup, Obfuscator};

/// Feature-flag name → owning config-file path (§3 FeaturesCache).
pub type FeaturesCache = HashMap<String, PathBuf>;

/// What a `Loader` hands back for one config file: the definitions it
/// declares, plus a discovery source shared by all of them, if any (§4.6).
pub struct GroupHandles {
    pub definitions: Vec<IntegrationDefinition>,
    pub discovery: Option<Arc<dyn DiscoverySource>>,
}

/// One config-file's runner collection (§3, §4.6). Not-running until
/// `start`; a Group transitions not-running → running exactly once per
/// underlying scope, matching the Manager's invariant that `start` is never
/// called on an already-running Group.
pub struct Group {
    path: PathBuf,
    handles: GroupHandles,
    scope: Option<CancellationToken>,
    runners: JoinSet<()>,
}

impl Group {
    pub fn new(path: PathBuf, handles: GroupHandles) -> Self {
        Self {
            path,
            handles,
            scope: None,
            runners: JoinSet::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn definitions(&self) -> &[IntegrationDefinition] {
        &self.handles.definitions
    }

    pub fn is_running(&self) -> bool {
        self.scope.is_some()
    }

    /// Spawns one Runner per definition under a fresh child scope of `parent`,
    /// skipping any definition the feature gate (§4.2) currently rejects
    /// given `agent_features` and an optional `remote` override.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        parent: &CancellationToken,
        verbosity: Verbosity,
        agent_features: &AgentFeatures,
        remote: Option<&RemoteFlag>,
        executor: Arc<dyn Executor>,
        instances_lookup: Arc<dyn InstancesLookup>,
        emitter: Arc<dyn Emitter>,
        id_lookup: Arc<dyn IdLookup>,
        obfuscator: Arc<dyn Obfuscator>,
        queues: RequestQueues,
    ) {
        assert!(
            !self.is_running(),
            "Group::start called on an already-running group at {:?}",
            self.path
        );
        let scope = parent.child_token();

        for definition in &self.handles.definitions {
            if !feature_gate::decide(definition.feature.as_deref(), agent_features, remote) {
                continue;
            }
            let runner = crate::runner::Runner::new(
                definition.clone(),
                self.handles.discovery.clone(),
                executor.clone(),
                instances_lookup.clone(),
                emitter.clone(),
                id_lookup.clone(),
                obfuscator.clone(),
                queues.clone(),
                verbosity,
            );
            let child_scope = scope.child_token();
            self.runners.spawn(async move {
                runner.run(child_scope, None, None).await;
            });
        }

        self.scope = Some(scope);
    }

    /// Cancels the scope; idempotent on an already-stopped Group. Runner
    /// tasks observe the cancellation cooperatively and exit on their own;
    /// their JoinHandles are left in `runners` and simply never polled again.
    pub fn stop(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_group_is_not_running() {
        let group = Group::new(
            PathBuf::from("/tmp/nonexistent.yml"),
            GroupHandles {
                definitions: Vec::new(),
                discovery: None,
            },
        );
        assert!(!group.is_running());
    }

    #[test]
    fn stop_on_not_running_group_is_idempotent() {
        let mut group = Group::new(
            PathBuf::from("/tmp/nonexistent.yml"),
            GroupHandles {
                definitions: Vec::new(),
                discovery: None,
            },
        );
        group.stop();
        group.stop();
        assert!(!group.is_running());
    }
}
