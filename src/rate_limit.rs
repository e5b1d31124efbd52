//! Generic sliding-window rate limiter shared by the inbound request layer.
//!
//! Each client key keeps a time-ordered sequence of request timestamps.
//! Minute and hour ceilings are enforced independently; pruning is lazy and
//! throttled per key, and a periodic sweep drops keys idle for longer than
//! the hour window so total memory stays bounded across many clients.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// How often the full inactive-key sweep runs, in calls.
const SWEEP_EVERY: u64 = 256;

/// Minimum gap between per-key prunes.
const PRUNE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct ClientWindow {
    timestamps: VecDeque<Instant>,
    last_pruned: Instant,
}

#[derive(Debug)]
struct LimiterState {
    windows: HashMap<String, ClientWindow>,
    calls_since_sweep: u64,
}

/// Thread-safe per-key sliding-window limiter with independent per-minute
/// and per-hour ceilings.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    state: Mutex<LimiterState>,
    max_per_minute: usize,
    max_per_hour: usize,
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new(max_per_minute: usize, max_per_hour: usize) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                calls_since_sweep: 0,
            }),
            max_per_minute,
            max_per_hour,
        }
    }

    /// Check whether `client_id` may proceed; on acceptance the current
    /// timestamp is recorded. `Err` carries the human-readable reason naming
    /// the exceeded ceiling.
    pub fn is_allowed(&self, client_id: &str) -> Result<(), String> {
        self.is_allowed_at(client_id, Instant::now())
    }

    fn is_allowed_at(&self, client_id: &str, now: Instant) -> Result<(), String> {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");

        state.calls_since_sweep += 1;
        if state.calls_since_sweep >= SWEEP_EVERY {
            state.calls_since_sweep = 0;
            sweep_inactive(&mut state.windows, now);
        }

        let window = state
            .windows
            .entry(client_id.to_owned())
            .or_insert_with(|| ClientWindow {
                timestamps: VecDeque::new(),
                // Backdate so a fresh key prunes on its first call.
                last_pruned: now.checked_sub(PRUNE_INTERVAL).unwrap_or(now),
            });

        // Throttled lazy prune of entries older than the hour window.
        if now.duration_since(window.last_pruned) >= PRUNE_INTERVAL {
            while let Some(oldest) = window.timestamps.front() {
                if now.duration_since(*oldest) > HOUR {
                    window.timestamps.pop_front();
                } else {
                    break;
                }
            }
            window.last_pruned = now;
        }

        let minute_count = window
            .timestamps
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= MINUTE)
            .count();
        let hour_count = window
            .timestamps
            .iter()
            .filter(|t| now.duration_since(**t) <= HOUR)
            .count();

        if minute_count >= self.max_per_minute {
            return Err(format!(
                "rate limit exceeded: {} requests per minute",
                self.max_per_minute
            ));
        }
        if hour_count >= self.max_per_hour {
            return Err(format!(
                "rate limit exceeded: {} requests per hour",
                self.max_per_hour
            ));
        }

        window.timestamps.push_back(now);
        Ok(())
    }

    /// Reset counters for one client, or for all clients when `None`.
    pub fn reset(&self, client_id: Option<&str>) {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        match client_id {
            Some(id) => {
                state.windows.remove(id);
            }
            None => state.windows.clear(),
        }
    }

    /// Number of tracked client keys (sweep observability).
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.state
            .lock()
            .expect("rate limiter lock poisoned")
            .windows
            .len()
    }
}

fn sweep_inactive(windows: &mut HashMap<String, ClientWindow>, now: Instant) {
    windows.retain(|_, window| {
        window
            .timestamps
            .back()
            .is_some_and(|latest| now.duration_since(*latest) <= HOUR)
    });
}
