//! The immutable execution blueprint for one integration instance (§3).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{Result, SupervisorError};

/// How the child process's executable is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecSpec {
    /// A literal argv; `args[0]` is the program.
    Argv(Vec<String>),
    /// A name the `Executor`'s instances lookup resolves to a binary, plus CLI args.
    Named { name: String, args: Vec<String> },
}

/// One "when" condition gating whether a definition's pass is evaluated (§4.5 step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhenCondition {
    FeatureFlag(String),
    FileExists(PathBuf),
    EnvEquals { key: String, value: String },
}

/// Parent-spawn metadata present only on dynamically-created definitions (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSpawn {
    pub parent_integration_name: String,
    pub config_name: String,
    /// Content hash used as the stop-by-hash key on the command channel, if any.
    pub command_channel_hash: Option<String>,
}

/// Bounded stderr-queue size policy (§3): negative disables, zero is the
/// ring's own default, positive is a caller-chosen capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StderrQueueSize(pub i32);

impl StderrQueueSize {
    pub const DEFAULT: StderrQueueSize = StderrQueueSize(0);

    pub fn to_ring_capacity(self) -> i64 {
        match self.0 {
            n if n < 0 => -1,
            0 => 10,
            n => n as i64,
        }
    }
}

impl Default for StderrQueueSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The immutable execution blueprint for one integration instance (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationDefinition {
    pub name: String,
    pub instance_name: Option<String>,
    pub exec: ExecSpec,
    pub env: BTreeMap<String, String>,
    pub embedded_config: Option<Vec<u8>>,
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub when: Vec<WhenCondition>,
    pub labels: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub inventory_source: Option<String>,
    pub stderr_queue_size: StderrQueueSize,
    pub parent: Option<ParentSpawn>,
    pub feature: Option<String>,
}

impl IntegrationDefinition {
    /// `interval == 0` is the "single-run" marker (§3, §4.5 step 7).
    pub fn is_single_run(&self) -> bool {
        self.interval.is_zero()
    }

    /// Validates the exec/name conflict per the Open Question resolution in
    /// `DESIGN.md`: when both an argv and a name-resolved spec would apply,
    /// the literal `exec` silently wins. This function only rejects
    /// definitions that are otherwise structurally invalid (empty name).
    pub fn sanitize(self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(SupervisorError::InvalidDefinition(
                self.name.clone(),
                "name must not be empty".into(),
            ));
        }
        Ok(self)
    }

    /// Content hash (§3): stable identity derived from everything **except**
    /// labels, tags, and parent-spawn metadata. Used by the tracker and the
    /// child-definition cache.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        if let Some(instance) = &self.instance_name {
            hasher.update(instance.as_bytes());
        }
        hasher.update([0u8]);
        match &self.exec {
            ExecSpec::Argv(argv) => {
                hasher.update(b"argv");
                for part in argv {
                    hasher.update(part.as_bytes());
                    hasher.update([0u8]);
                }
            }
            ExecSpec::Named { name, args } => {
                hasher.update(b"named");
                hasher.update(name.as_bytes());
                for arg in args {
                    hasher.update(arg.as_bytes());
                    hasher.update([0u8]);
                }
            }
        }
        for (k, v) in &self.env {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(cfg) = &self.embedded_config {
            hasher.update(cfg);
        }
        hasher.update(self.interval.as_nanos().to_le_bytes());
        if let Some(timeout) = self.timeout {
            hasher.update(timeout.as_nanos().to_le_bytes());
        }
        for cond in &self.when {
            hasher.update(format!("{cond:?}").as_bytes());
        }
        if let Some(inv) = &self.inventory_source {
            hasher.update(inv.as_bytes());
        }
        hasher.update(self.stderr_queue_size.0.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IntegrationDefinition {
        IntegrationDefinition {
            name: "nri-docker".into(),
            instance_name: None,
            exec: ExecSpec::Argv(vec!["nri-docker".into()]),
            env: BTreeMap::new(),
            embedded_config: None,
            interval: Duration::from_secs(30),
            timeout: None,
            when: Vec::new(),
            labels: BTreeMap::new(),
            tags: BTreeMap::new(),
            inventory_source: None,
            stderr_queue_size: StderrQueueSize::DEFAULT,
            parent: None,
            feature: None,
        }
    }

    #[test]
    fn content_hash_ignores_labels_and_tags() {
        let mut a = base();
        let mut b = base();
        a.labels.insert("team".into(), "infra".into());
        b.tags.insert("env".into(), "prod".into());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_changes_with_exec() {
        let a = base();
        let mut b = base();
        b.exec = ExecSpec::Argv(vec!["nri-docker".into(), "--flag".into()]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_ignores_parent_metadata() {
        let mut a = base();
        let mut b = base();
        b.parent = Some(ParentSpawn {
            parent_integration_name: "parent".into(),
            config_name: "cfg".into(),
            command_channel_hash: Some("abc".into()),
        });
        assert_eq!(a.content_hash(), b.content_hash());
        a.parent = b.parent.clone();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn zero_interval_is_single_run() {
        let mut d = base();
        d.interval = Duration::ZERO;
        assert!(d.is_single_run());
    }

    #[test]
    fn sanitize_rejects_empty_name() {
        let mut d = base();
        d.name = "   ".into();
        assert!(d.sanitize().is_err());
    }

    #[test]
    fn stderr_queue_size_policy() {
        assert_eq!(StderrQueueSize(-1).to_ring_capacity(), -1);
        assert_eq!(StderrQueueSize(0).to_ring_capacity(), 10);
        assert_eq!(StderrQueueSize(25).to_ring_capacity(), 25);
    }
}
