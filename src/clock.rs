//! Monotonic tick counter: 1 tick = 10 ms, shared by the timing wheel and
//! anything that needs "how long has this node been up".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const TICK_MS: u64 = 10;

pub struct Clock {
    started_at: Instant,
    started_unix_secs: u32,
    ticks: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        let started_unix_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Clock {
            started_at: Instant::now(),
            started_unix_secs,
            ticks: AtomicU64::new(0),
        }
    }

    /// Ticks elapsed since the node started, per the wall clock (not the
    /// internal counter) — used by the timer thread to compute how many
    /// steps to advance the wheel by.
    pub fn wall_ticks(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64 / TICK_MS
    }

    /// The timing wheel's own advancing counter.
    pub fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn start_seconds(&self) -> u32 {
        self.started_unix_secs
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
