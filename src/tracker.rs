//! Maps stable hash → cancellation handle for dynamically-spawned runners (§4.8).

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct TrackedEntry {
    scope: CancellationToken,
    pid_tx: Option<mpsc::Sender<u32>>,
    last_exit_code: Option<i32>,
}

/// Concurrent-safe hash → cancellation-handle map. Stop-by-hash is a no-op
/// on an absent hash; an empty hash disables tracking entirely. Keyed with
/// `ahash` rather than the default SipHash, matching `ChildDefinitionCache`.
#[derive(Default)]
pub struct Tracker {
    entries: DashMap<String, TrackedEntry, ahash::RandomState>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hash` under `parent`, returning the child scope and a
    /// fresh PID-write channel. An empty hash disables tracking: the parent
    /// scope is returned unchanged and nothing is recorded.
    pub fn track(
        &self,
        parent: &CancellationToken,
        hash: &str,
    ) -> (CancellationToken, mpsc::Receiver<u32>) {
        let (pid_tx, pid_rx) = mpsc::channel(1);
        if hash.is_empty() {
            return (parent.clone(), pid_rx);
        }
        let scope = parent.child_token();
        self.entries.insert(
            hash.to_string(),
            TrackedEntry {
                scope: scope.clone(),
                pid_tx: Some(pid_tx),
                last_exit_code: None,
            },
        );
        (scope, pid_rx)
    }

    pub fn untrack(&self, hash: &str) {
        self.entries.remove(hash);
    }

    /// Stores the last known exit code for a tracked hash; a no-op if not tracked.
    pub fn notify_exit(&self, hash: &str, code: i32) {
        if let Some(mut entry) = self.entries.get_mut(hash) {
            entry.last_exit_code = Some(code);
        }
    }

    pub fn exit_code(&self, hash: &str) -> Option<i32> {
        self.entries.get(hash).and_then(|e| e.last_exit_code)
    }

    /// Cancels the scope for `hash` if tracked; a no-op otherwise.
    pub fn kill(&self, hash: &str) {
        if let Some(entry) = self.entries.get(hash) {
            entry.scope.cancel();
        }
    }

    pub fn is_tracked(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn track_then_kill_cancels_scope() {
        let tracker = Tracker::new();
        let parent = CancellationToken::new();
        let (scope, _pid_rx) = tracker.track(&parent, "abc123");
        assert!(!scope.is_cancelled());
        tracker.kill("abc123");
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn kill_on_absent_hash_is_noop() {
        let tracker = Tracker::new();
        tracker.kill("does-not-exist");
    }

    #[tokio::test]
    async fn empty_hash_disables_tracking() {
        let tracker = Tracker::new();
        let parent = CancellationToken::new();
        let (scope, _pid_rx) = tracker.track(&parent, "");
        assert!(!tracker.is_tracked(""));
        parent.cancel();
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn notify_exit_then_untrack() {
        let tracker = Tracker::new();
        let parent = CancellationToken::new();
        let (_scope, _pid_rx) = tracker.track(&parent, "h1");
        tracker.notify_exit("h1", 137);
        assert_eq!(tracker.exit_code("h1"), Some(137));
        tracker.untrack("h1");
        assert_eq!(tracker.exit_code("h1"), None);
    }
}
