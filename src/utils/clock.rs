// src/utils/clock.rs
//! Wall-clock abstraction
//!
//! Session staleness is measured in epoch milliseconds because the last event
//! timestamp is persisted and compared across page loads. Timers themselves
//! run on `tokio::time`; this trait only answers "what time is it now".

use std::sync::atomic::{AtomicI64, Ordering};
use tokio::time::Instant;

/// Source of epoch-millisecond timestamps
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock anchored once, then advanced by the tokio clock.
///
/// Follows `tokio::time::pause`/`advance`, so staleness checks and timers
/// agree under a paused test runtime.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl MonotonicClock {
    /// Anchor at the current system time
    pub fn new() -> Self {
        Self::anchored_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor at an explicit epoch timestamp
    pub fn anchored_at(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as i64
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
