use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    opened_at: Instant,
    suppressed: u64,
}

/// Rate-limits repeated log lines. Each owner keeps its own windows, so two
/// gates in one process never swallow each other's lines.
#[derive(Default)]
pub struct LogThrottle {
    windows: Mutex<HashMap<&'static str, Window>>,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first call for `key` in a window returns `Some(n)` where `n` is
    /// how many calls the previous window swallowed. Later calls in the same
    /// window return `None`.
    pub fn should_emit(&self, key: &'static str, interval: Duration) -> Option<u64> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        let Some(window) = windows.get_mut(key) else {
            windows.insert(
                key,
                Window {
                    opened_at: now,
                    suppressed: 0,
                },
            );
            return Some(0);
        };

        if now.duration_since(window.opened_at) < interval {
            window.suppressed += 1;
            return None;
        }
        window.opened_at = now;
        Some(std::mem::take(&mut window.suppressed))
    }
}
