//! Decides whether an integration is enabled given agent config and an
//! optional remote flag override (§4.2).

use crate::config::{AgentFeatures, RemoteFlag};

/// Evaluates the four feature-gate rules in order. `required` is the
/// definition's configured feature name, if any.
pub fn decide(
    required: Option<&str>,
    agent_features: &AgentFeatures,
    remote: Option<&RemoteFlag>,
) -> bool {
    let Some(required) = required else {
        return true;
    };

    if let Some(&enabled) = agent_features.get(required) {
        return enabled;
    }

    match remote {
        Some(flag) if flag.name == required => flag.enabled,
        _ => false,
    }
}
