//! Windowed failure rate over per-second buckets.
//!
//! A fixed ring of epoch-tagged slots, one per wall-clock second. Recording
//! is a couple of atomic operations; a slot is lazily reset the first time a
//! new second touches it. Reads copy the live slots into a
//! [`WindowSnapshot`] so rate queries over any window up to [`MAX_WINDOW_S`]
//! work on an immutable view.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ring size; bounds the largest supported window.
const SLOTS: usize = 64;

/// Largest usable failure-rate window, in seconds.
pub const MAX_WINDOW_S: u64 = (SLOTS - 2) as u64;

#[derive(Default)]
struct Slot {
    /// Second number + 1; 0 marks a slot that has never been written.
    tag: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

pub struct FailureWindow {
    slots: Vec<Slot>,
}

impl FailureWindow {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOTS).map(|_| Slot::default()).collect(),
        }
    }

    /// Record one outcome in the bucket for `now_s`.
    pub fn record(&self, now_s: u64, success: bool) {
        let slot = &self.slots[(now_s as usize) % SLOTS];
        let tag = now_s + 1;
        loop {
            let cur = slot.tag.load(Ordering::Acquire);
            if cur == tag {
                break;
            }
            // First writer of this second resets the stale counts. A reader
            // racing the reset may see a partially-zeroed slot, which the
            // snapshot contract allows.
            if slot
                .tag
                .compare_exchange(cur, tag, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.success.store(0, Ordering::Relaxed);
                slot.failure.store(0, Ordering::Relaxed);
                break;
            }
        }
        if success {
            slot.success.fetch_add(1, Ordering::Relaxed);
        } else {
            slot.failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, now_s: u64) -> WindowSnapshot {
        let entries = self
            .slots
            .iter()
            .filter_map(|slot| {
                let tag = slot.tag.load(Ordering::Acquire);
                if tag == 0 {
                    return None;
                }
                Some(WindowEntry {
                    second: tag - 1,
                    success: slot.success.load(Ordering::Relaxed),
                    failure: slot.failure.load(Ordering::Relaxed),
                })
            })
            .collect();
        WindowSnapshot { now_s, entries }
    }
}

impl Default for FailureWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub second: u64,
    pub success: u64,
    pub failure: u64,
}

/// Immutable copy of the live window buckets at snapshot time.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    now_s: u64,
    entries: Vec<WindowEntry>,
}

impl WindowSnapshot {
    /// Build a snapshot directly; used by decision-policy tests.
    pub fn from_entries(now_s: u64, entries: Vec<WindowEntry>) -> Self {
        Self { now_s, entries }
    }

    pub fn empty(now_s: u64) -> Self {
        Self {
            now_s,
            entries: Vec::new(),
        }
    }

    /// Failure rate over the last `window_s` seconds (inclusive of the
    /// current second). `0.0` when no sample exists in the window.
    pub fn failure_rate(&self, window_s: u64) -> f64 {
        let window_s = window_s.clamp(1, MAX_WINDOW_S);
        let oldest = self.now_s.saturating_sub(window_s - 1);
        let (mut success, mut failure) = (0u64, 0u64);
        for e in &self.entries {
            if e.second >= oldest && e.second <= self.now_s {
                success += e.success;
                failure += e.failure;
            }
        }
        let total = success + failure;
        if total == 0 {
            0.0
        } else {
            failure as f64 / total as f64
        }
    }
}
