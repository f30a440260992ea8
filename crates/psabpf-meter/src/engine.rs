//! Two-rate three-color marker over a [`TokenBucketPair`].
//!
//! Buckets are refilled lazily: each call credits the whole ticks elapsed
//! since the bucket's last refill, capped at capacity, and advances the
//! refill timestamp by exactly those ticks so the sub-tick remainder carries
//! over to the next call.
//!
//! These functions operate on an already-locked record and never sample the
//! clock. [`crate::MeterInstance`] wraps them with the per-instance lock.

use crate::record::TokenBucketPair;
use crate::types::Color;

/// Credits whole elapsed ticks to one bucket. The level is clamped to
/// `capacity` even when nothing is credited.
fn refill(left: &mut u64, capacity: u64, time: &mut u64, period: u64, unit_per_period: u64, now: u64) {
    *left = (*left).min(capacity);
    if period == 0 {
        return;
    }
    let ticks = now.saturating_sub(*time) / period;
    if ticks == 0 {
        return;
    }
    // ticks * period <= now - time, so the timestamp cannot overflow.
    *time += ticks * period;
    if unit_per_period == 0 {
        return;
    }
    let credit = ticks.saturating_mul(unit_per_period);
    *left = left.saturating_add(credit).min(capacity);
}

/// Refills both buckets up to `now`.
pub fn refill_buckets(bucket: &mut TokenBucketPair, now: u64) {
    refill(
        &mut bucket.pbs_left,
        bucket.pbs,
        &mut bucket.time_p,
        bucket.pir_period,
        bucket.pir_unit_per_period,
        now,
    );
    refill(
        &mut bucket.cbs_left,
        bucket.cbs,
        &mut bucket.time_c,
        bucket.cir_period,
        bucket.cir_unit_per_period,
        now,
    );
}

/// Colors a packet of `size_units` at time `now` (color-blind mode).
///
/// RED debits nothing, YELLOW debits the peak bucket, GREEN debits both.
pub fn mark(bucket: &mut TokenBucketPair, size_units: u64, now: u64) -> Color {
    mark_color_aware(bucket, size_units, now, Color::Green)
}

/// Colors a packet that already carries `pre_color` (color-aware mode).
///
/// A pre-colored RED packet stays RED and a pre-colored YELLOW packet never
/// takes committed tokens. With `Color::Green` this is [`mark`].
pub fn mark_color_aware(
    bucket: &mut TokenBucketPair,
    size_units: u64,
    now: u64,
    pre_color: Color,
) -> Color {
    refill_buckets(bucket, now);

    if pre_color == Color::Red || bucket.pbs_left < size_units {
        return Color::Red;
    }
    if pre_color == Color::Yellow || bucket.cbs_left < size_units {
        bucket.pbs_left -= size_units;
        return Color::Yellow;
    }
    bucket.pbs_left -= size_units;
    bucket.cbs_left -= size_units;
    Color::Green
}
