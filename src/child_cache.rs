//! Per-config-name set of currently-active child integration definitions,
//! keyed by content hash (§3, §4.7).

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::definition::IntegrationDefinition;

type Hasher = ahash::RandomState;

/// Two-level map: *config-name* → set of definition-hashes, plus *hash* →
/// definition. Readers get snapshots valid at call time; no external
/// mutation guarantees beyond that. Keyed with `ahash` rather than the
/// default SipHash since these maps sit on the hot per-stdout-line path.
#[derive(Default)]
pub struct ChildDefinitionCache {
    hashes_by_config: DashMap<String, DashSet<String, Hasher>, Hasher>,
    definitions_by_hash: DashMap<String, Arc<IntegrationDefinition>, Hasher>,
}

impl ChildDefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` on first insert for this hash under `cfg_name`, `false`
    /// if it was already present (§8 idempotence property).
    pub fn add_definition(&self, cfg_name: &str, def: IntegrationDefinition) -> bool {
        let hash = def.content_hash();
        let hashes = self
            .hashes_by_config
            .entry(cfg_name.to_string())
            .or_default();
        let inserted = hashes.insert(hash.clone());
        if inserted {
            self.definitions_by_hash.insert(hash, Arc::new(def));
        }
        inserted
    }

    /// Replaces the entire hash set for `cfg_name`, returning the hashes
    /// that were removed (so callers can terminate their owning runners).
    pub fn replace_config(
        &self,
        cfg_name: &str,
        defs: Vec<IntegrationDefinition>,
    ) -> Vec<String> {
        let new_hashes: Vec<String> = defs.iter().map(|d| d.content_hash()).collect();
        let previous = self
            .hashes_by_config
            .get(cfg_name)
            .map(|set| set.iter().map(|h| h.clone()).collect::<Vec<_>>())
            .unwrap_or_default();

        let removed: Vec<String> = previous
            .into_iter()
            .filter(|h| !new_hashes.contains(h))
            .collect();

        let fresh: DashSet<String, Hasher> = DashSet::default();
        for (hash, def) in new_hashes.into_iter().zip(defs.into_iter()) {
            fresh.insert(hash.clone());
            self.definitions_by_hash.insert(hash, Arc::new(def));
        }
        self.hashes_by_config.insert(cfg_name.to_string(), fresh);

        for hash in &removed {
            self.definitions_by_hash.remove(hash);
        }
        removed
    }

    /// Removes every hash under `cfg_name`, returning the removed hashes.
    pub fn remove_config(&self, cfg_name: &str) -> Vec<String> {
        self.replace_config(cfg_name, Vec::new())
    }

    pub fn get_hashes(&self, cfg_name: &str) -> Vec<String> {
        self.hashes_by_config
            .get(cfg_name)
            .map(|set| set.iter().map(|h| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get_definitions(&self, cfg_name: &str) -> Vec<Arc<IntegrationDefinition>> {
        self.get_hashes(cfg_name)
            .into_iter()
            .filter_map(|hash| self.definitions_by_hash.get(&hash).map(|r| r.clone()))
            .collect()
    }

    pub fn list_config_names(&self) -> Vec<String> {
        self.hashes_by_config
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn def(name: &str) -> IntegrationDefinition {
        IntegrationDefinition {
            name: name.to_string(),
            instance_name: None,
            exec: crate::definition::ExecSpec::Argv(vec![name.to_string()]),
            env: BTreeMap::new(),
            embedded_config: None,
            interval: Duration::from_secs(30),
            timeout: None,
            when: Vec::new(),
            labels: BTreeMap::new(),
            tags: BTreeMap::new(),
            inventory_source: None,
            stderr_queue_size: Default::default(),
            parent: None,
            feature: None,
        }
    }

    #[test]
    fn add_definition_idempotence() {
        let cache = ChildDefinitionCache::new();
        assert!(cache.add_definition("docker", def("a")));
        assert!(!cache.add_definition("docker", def("a")));
    }

    #[test]
    fn replace_config_reports_removed_hashes() {
        let cache = ChildDefinitionCache::new();
        cache.add_definition("docker", def("a"));
        cache.add_definition("docker", def("b"));

        let removed = cache.replace_config("docker", vec![def("b"), def("c")]);
        assert_eq!(removed, vec![def("a").content_hash()]);
        assert_eq!(cache.get_hashes("docker").len(), 2);
    }

    #[test]
    fn list_config_names_reflects_inserts() {
        let cache = ChildDefinitionCache::new();
        cache.add_definition("docker", def("a"));
        cache.add_definition("kubernetes", def("b"));
        let mut names = cache.list_config_names();
        names.sort();
        assert_eq!(names, vec!["docker".to_string(), "kubernetes".to_string()]);
    }
}
