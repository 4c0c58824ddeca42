//! Bounded FIFO of the last N stderr lines for postmortem context (§4.1).

use tokio::sync::Mutex;

const DISABLED_PLACEHOLDER: &str = "(stderr capture disabled)";
const EMPTY_PLACEHOLDER: &str = "(no standard error output)";

struct Inner {
    lines: std::collections::VecDeque<Vec<u8>>,
    capacity: usize,
    disabled: bool,
    total_added: u64,
    wrapped: bool,
}

/// A fixed-capacity ring buffer of stderr lines, serialized behind a mutex
/// so `add` and `flush` can race freely from independent consumer tasks.
pub struct StderrRing {
    inner: Mutex<Inner>,
}

impl StderrRing {
    /// `capacity < 0` disables capture entirely; `0` means the default of 10;
    /// any positive value is used as-is (§4.1).
    pub fn new(capacity: i64) -> Self {
        let disabled = capacity < 0;
        let capacity = if capacity <= 0 { 10 } else { capacity as usize };
        Self {
            inner: Mutex::new(Inner {
                lines: std::collections::VecDeque::with_capacity(capacity),
                capacity,
                disabled,
                total_added: 0,
                wrapped: false,
            }),
        }
    }

    pub async fn add(&self, line: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock().await;
        if inner.disabled {
            return;
        }
        inner.total_added += 1;
        if inner.lines.len() == inner.capacity {
            inner.lines.pop_front();
            inner.wrapped = true;
        }
        inner.lines.push_back(line.into());
    }

    /// Drains the ring and returns a human-readable concatenation, with a
    /// truncation header when the buffer wrapped before this flush.
    pub async fn flush(&self) -> String {
        let mut inner = self.inner.lock().await;
        if inner.disabled {
            return DISABLED_PLACEHOLDER.to_string();
        }
        if inner.lines.is_empty() {
            return EMPTY_PLACEHOLDER.to_string();
        }

        let joined = inner
            .lines
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        let result = if inner.wrapped {
            format!(
                "(last {} lines out of {}): {}",
                inner.lines.len(),
                inner.total_added,
                joined
            )
        } else {
            joined
        };

        inner.lines.clear();
        inner.total_added = 0;
        inner.wrapped = false;
        result
    }
}
