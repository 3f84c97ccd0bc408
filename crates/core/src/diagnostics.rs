//! Advisory counters shared between the emulation and I/O cores.
//!
//! Every field has a single writer. The emulation core publishes its
//! counters after each batch; the I/O core owns the pause and stall
//! counters. Readers take a [`DiagnosticsSnapshot`] and must not rely on
//! the fields being mutually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Diagnostics {
    pub cycles: AtomicU64,
    pub interrupts: AtomicU64,
    pub sci_overruns: AtomicU64,
    pub ring_drops: AtomicU64,
    pub overflow_drops: AtomicU64,
    pub ring_high_water: AtomicU64,
    pub overflow_high_water: AtomicU64,
    pub pause_timeouts: AtomicU64,
    pub stalls: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub cycles: u64,
    pub interrupts: u64,
    pub sci_overruns: u64,
    pub ring_drops: u64,
    pub overflow_drops: u64,
    pub ring_high_water: u64,
    pub overflow_high_water: u64,
    pub pause_timeouts: u64,
    pub stalls: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            cycles: get(&self.cycles),
            interrupts: get(&self.interrupts),
            sci_overruns: get(&self.sci_overruns),
            ring_drops: get(&self.ring_drops),
            overflow_drops: get(&self.overflow_drops),
            ring_high_water: get(&self.ring_high_water),
            overflow_high_water: get(&self.overflow_high_water),
            pause_timeouts: get(&self.pause_timeouts),
            stalls: get(&self.stalls),
        }
    }

    pub(crate) fn store(counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Rate limit for data-loss warnings: the first event and every 256th.
pub fn should_log(count: u64) -> bool {
    count == 1 || (count != 0 && count % 256 == 0)
}
