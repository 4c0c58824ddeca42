//! A cancellation scope that auto-cancels unless periodically "kicked" (§4.3).
//!
//! Modeled as the atomic state machine `{Armed, Fired, Stopped}` called for
//! by the design note in §9: once the timer fires, the scope is an immutable
//! terminal state and further heartbeats/stops are no-ops.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Fired,
    Stopped,
}

/// The actuator half of a heartbeat scope: lets callers kick the timeout or
/// stop the scope outright.
#[derive(Clone)]
pub struct HeartbeatActuator {
    state: std::sync::Arc<Mutex<State>>,
    kick: watch::Sender<Instant>,
    scope: CancellationToken,
}

impl HeartbeatActuator {
    /// Resets the timeout if it had not yet fired; a no-op once fired.
    pub fn heart_beat(&self) {
        let armed = matches!(*self.state.lock().unwrap(), State::Armed);
        if armed {
            let _ = self.kick.send(Instant::now());
        }
    }

    /// Cancels the scope and halts the timer. A no-op if already fired or stopped.
    pub fn stop(&self) {
        let mut guard = self.state.lock().unwrap();
        if *guard == State::Armed {
            *guard = State::Stopped;
            drop(guard);
            self.scope.cancel();
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Fired)
    }
}

/// Creates a child scope of `parent` that is cancelled when the parent is
/// cancelled, when the returned actuator's `stop()` is called, or when
/// `timeout` elapses without an intervening `heart_beat()` call.
pub fn with_heartbeat(
    parent: &CancellationToken,
    timeout: Duration,
    log_target: &'static str,
) -> (CancellationToken, HeartbeatActuator) {
    let scope = parent.child_token();
    let state = std::sync::Arc::new(Mutex::new(State::Armed));
    let (kick_tx, mut kick_rx) = watch::channel(Instant::now());

    let actuator = HeartbeatActuator {
        state: state.clone(),
        kick: kick_tx,
        scope: scope.clone(),
    };

    let timer_scope = scope.clone();
    let timer_parent = parent.clone();
    tokio::spawn(async move {
        let mut deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = timer_parent.cancelled() => {
                    let mut guard = state.lock().unwrap();
                    if *guard == State::Armed {
                        *guard = State::Stopped;
                    }
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let mut guard = state.lock().unwrap();
                    if *guard == State::Armed {
                        *guard = State::Fired;
                        drop(guard);
                        tracing::warn!(target: log_target, timeout_ms = timeout.as_millis() as u64, "heartbeat timeout expired, cancelling scope");
                        timer_scope.cancel();
                    }
                    return;
                }
                Ok(()) = kick_rx.changed() => {
                    if *state.lock().unwrap() != State::Armed {
                        return;
                    }
                    deadline = Instant::now() + timeout;
                }
            }
        }
    });

    (scope, actuator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_before_timeout_prevents_cancellation() {
        let parent = CancellationToken::new();
        let (scope, actuator) = with_heartbeat(&parent, StdDuration::from_millis(100), "test");

        tokio::time::advance(StdDuration::from_millis(60)).await;
        actuator.heart_beat();
        tokio::time::advance(StdDuration::from_millis(60)).await;
        actuator.heart_beat();
        tokio::time::advance(StdDuration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert!(!scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn gap_past_timeout_cancels_exactly_once() {
        let parent = CancellationToken::new();
        let (scope, actuator) = with_heartbeat(&parent, StdDuration::from_millis(50), "test");

        tokio::time::advance(StdDuration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert!(scope.is_cancelled());
        assert!(actuator.is_fired());

        // Further kicks/stops after firing are no-ops.
        actuator.heart_beat();
        actuator.stop();
        assert!(actuator.is_fired());
    }

    #[tokio::test]
    async fn explicit_stop_cancels_scope() {
        let parent = CancellationToken::new();
        let (scope, actuator) = with_heartbeat(&parent, StdDuration::from_secs(60), "test");
        actuator.stop();
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (scope, _actuator) = with_heartbeat(&parent, StdDuration::from_secs(60), "test");
        parent.cancel();
        scope.cancelled().await;
        assert!(scope.is_cancelled());
    }
}
