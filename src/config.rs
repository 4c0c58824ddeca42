//! Ambient configuration consumed by the [`crate::manager::Manager`] constructor.
//!
//! This is the supervisor's *own* bootstrap configuration — verbosity, the
//! environment passthrough whitelist, and the agent-side feature map used by
//! the feature gate (§4.2). It is distinct from, and does not parse, the
//! per-integration YAML files the `Loader` collaborator is responsible for.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Agent-wide feature flags, as seen by the feature gate (§4.2 rule (b)).
pub type AgentFeatures = HashMap<String, bool>;

/// A single remote feature-flag override delivered out-of-band (§4.2 rules (c)/(d)).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteFlag {
    pub name: String,
    pub enabled: bool,
}

/// Verbosity level injected into child environments as `VERBOSE` when > 0 (§6.4).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(pub u8);

impl Verbosity {
    pub fn is_debug(self) -> bool {
        self.0 > 0
    }
}

/// Directories/files the Manager scans and watches, plus the runtime knobs
/// that do not belong to any single integration definition.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SupervisorConfig {
    pub config_paths: Vec<PathBuf>,
    pub definition_paths: Vec<PathBuf>,
    pub passthrough_env: Vec<String>,
    pub verbosity: Verbosity,
    /// Agent-wide feature map consulted by the feature gate (§4.2 rule (b))
    /// before a Group spawns the Runner for a gated definition.
    pub agent_features: AgentFeatures,
    /// Minimum quiet period after a filesystem event before the watcher acts
    /// on it; coalesces the burst of create/write events a single `mv`/`cp`
    /// onto a watched directory tends to produce (§4.9.1).
    #[serde(deserialize_with = "duration_from_millis_or_humantime")]
    pub watcher_debounce: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            config_paths: Vec::new(),
            definition_paths: Vec::new(),
            passthrough_env: Vec::new(),
            verbosity: Verbosity(0),
            agent_features: AgentFeatures::new(),
            watcher_debounce: Duration::from_millis(250),
        }
    }
}

/// Accepts either a bare integer (milliseconds) or a humantime-style string
/// (`"250ms"`, `"2s"`) for duration fields, the same tolerance
/// `string_or_usize` applies to size fields.
fn duration_from_millis_or_humantime<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MillisOrString {
        Millis(u64),
        Text(String),
    }

    match MillisOrString::deserialize(deserializer)? {
        MillisOrString::Millis(ms) => Ok(Duration::from_millis(ms)),
        MillisOrString::Text(text) => parse_duration_suffix(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}"))),
    }
}

fn parse_duration_suffix(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = text.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs_f64);
    }
    text.parse::<u64>().ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffix_parses_ms_and_s() {
        assert_eq!(parse_duration_suffix("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration_suffix("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration_suffix("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration_suffix("nope"), None);
    }

    #[test]
    fn verbosity_debug_flag() {
        assert!(!Verbosity(0).is_debug());
        assert!(Verbosity(1).is_debug());
    }
}
