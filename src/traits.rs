//! External collaborator interfaces (§6.1). The core only depends on these
//! traits; their concrete implementations (YAML parsing, subprocess launch,
//! the telemetry transport, host-identity lookup, ...) are narrow boundaries
//! intentionally left unspecified here, mirroring the
//! `RepositoryAccess`/`AuthenticationService` split in `src/protocol/core.rs`.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::definition::IntegrationDefinition;
use crate::errors::Result;
use crate::group::{FeaturesCache, GroupHandles};

/// One substitution map produced by a discovery pass (§3, "Match").
pub type Match = BTreeMap<String, String>;

/// Loads a config file into a partially-built Group plus the feature names
/// it owns. YAML parsing, env-var expansion, and legacy-format filtering all
/// live behind this boundary (§1 non-goals, §6.1).
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, cfg_path: &std::path::Path) -> Result<(GroupHandles, FeaturesCache)>;
}

/// Resolves a bare integration name to a launchable executable (§6.2,
/// "name-resolved via the instances lookup").
#[async_trait]
pub trait InstancesLookup: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Vec<String>>;
}

/// The three output channels produced by one child-process launch (§6.1).
pub struct ChildStreams {
    pub stdout: mpsc::Receiver<Bytes>,
    pub stderr: mpsc::Receiver<Bytes>,
    pub errors: mpsc::Receiver<SupervisorChildError>,
    pub pid: Option<u32>,
}

/// A terminal error surfaced by the executor for one running child.
#[derive(Debug, Clone)]
pub struct SupervisorChildError {
    pub message: String,
    pub exit_code: Option<i32>,
}

/// Launches subprocesses. Process construction (argv/env assembly,
/// sandboxing, resource limits) is entirely the executor's concern; the core
/// only consumes the three resulting streams (§6.1, §9 "channel-shaped
/// integration output").
#[async_trait]
pub trait Executor: Send + Sync {
    async fn launch(
        &self,
        definition: &IntegrationDefinition,
        matched: &Match,
        scope: tokio_util::sync::CancellationToken,
    ) -> Result<ChildStreams>;
}

/// Delivers one telemetry payload to the external sink (§6.1).
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(
        &self,
        definition: &IntegrationDefinition,
        labels: &BTreeMap<String, String>,
        entity_rewrites: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> Result<()>;
}

/// Produces zero or more substitution-map matches for one discovery source (§3, §6.1).
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Match>>;
}

/// Resolves the host's short entity name, injected into the execution scope (§4.5 step 4).
#[async_trait]
pub trait IdLookup: Send + Sync {
    async fn agent_short_entity_name(&self) -> Result<String>;
}

/// Pure sensitive-substring redaction applied at the boundaries named in §4.5.2.
pub trait Obfuscator: Send + Sync {
    fn redact(&self, input: &str) -> String;
}

/// An `Obfuscator` that performs no redaction; used by tests and as the
/// default when the embedder has no sensitive-data policy.
pub struct NoopObfuscator;

impl Obfuscator for NoopObfuscator {
    fn redact(&self, input: &str) -> String {
        input.to_string()
    }
}
