//! Per-store color counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::Color;

/// Lock-free tally of marking outcomes.
#[derive(Debug, Default)]
pub struct MeterStats {
    green: AtomicU64,
    yellow: AtomicU64,
    red: AtomicU64,
}

/// Point-in-time copy of [`MeterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterStatsSnapshot {
    /// Packets marked GREEN.
    pub green: u64,
    /// Packets marked YELLOW.
    pub yellow: u64,
    /// Packets marked RED.
    pub red: u64,
}

impl MeterStats {
    /// Counts one marking outcome.
    pub fn record(&self, color: Color) {
        let counter = match color {
            Color::Green => &self.green,
            Color::Yellow => &self.yellow,
            Color::Red => &self.red,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counts.
    pub fn snapshot(&self) -> MeterStatsSnapshot {
        MeterStatsSnapshot {
            green: self.green.load(Ordering::Relaxed),
            yellow: self.yellow.load(Ordering::Relaxed),
            red: self.red.load(Ordering::Relaxed),
        }
    }

    /// Overwrites the counts, e.g. with a tally saved by a previous run.
    pub fn load(&self, snapshot: &MeterStatsSnapshot) {
        self.green.store(snapshot.green, Ordering::Relaxed);
        self.yellow.store(snapshot.yellow, Ordering::Relaxed);
        self.red.store(snapshot.red, Ordering::Relaxed);
    }
}

impl MeterStatsSnapshot {
    /// Total packets marked.
    pub fn total(&self) -> u64 {
        self.green + self.yellow + self.red
    }
}
