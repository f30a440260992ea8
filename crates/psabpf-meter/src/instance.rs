//! A meter record paired with its lock.

use parking_lot::Mutex;

use crate::config::EncodedParams;
use crate::engine;
use crate::record::TokenBucketPair;
use crate::types::Color;

/// One meter instance shared between packet-processing threads.
///
/// Every access, including diagnostic reads, goes through the lock, so no
/// caller ever observes a record with some fields from before an update and
/// some from after. The guard is scoped to each method and released on
/// every exit path, unwinding included.
#[derive(Debug, Default)]
pub struct MeterInstance {
    state: Mutex<TokenBucketPair>,
}

impl MeterInstance {
    /// Creates an instance holding `record`.
    pub fn new(record: TokenBucketPair) -> Self {
        Self {
            state: Mutex::new(record),
        }
    }

    /// Colors a packet of `size_units` at `now` (color-blind).
    pub fn mark(&self, size_units: u64, now: u64) -> Color {
        let mut state = self.state.lock();
        engine::mark(&mut state, size_units, now)
    }

    /// Colors a pre-colored packet of `size_units` at `now`.
    pub fn mark_color_aware(&self, size_units: u64, now: u64, pre_color: Color) -> Color {
        let mut state = self.state.lock();
        engine::mark_color_aware(&mut state, size_units, now, pre_color)
    }

    /// Returns a consistent copy of the record.
    pub fn snapshot(&self) -> TokenBucketPair {
        *self.state.lock()
    }

    /// Overwrites the whole record.
    pub fn store(&self, record: TokenBucketPair) {
        *self.state.lock() = record;
    }

    /// Applies new rates and bursts, refilling both buckets and resetting
    /// both refill timestamps to zero.
    pub fn configure(&self, params: &EncodedParams) {
        self.store(params.to_record());
    }

    /// Returns the instance to the unconfigured all-zero state.
    pub fn reset(&self) {
        self.store(TokenBucketPair::default());
    }
}

impl Clone for MeterInstance {
    fn clone(&self) -> Self {
        Self::new(self.snapshot())
    }
}
