//! Control-plane configuration port.
//!
//! The control plane speaks in rates (units per second) and bursts (units).
//! The packet path speaks in refill ticks: a period in nanoseconds and the
//! units credited per period. [`RateEncoder`] converts between the two,
//! preferring one unit per period (finest granularity) and only crediting
//! more per tick when the period would drop below the timer resolution or
//! truncating it would distort the rate.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeterError, MeterResult};
use crate::record::TokenBucketPair;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Resolution of the kernel monotonic clock the dataplane samples.
pub const DEFAULT_TIMER_RESOLUTION_NS: u64 = 1;

/// Encoded rates stay within 1/`RATE_PRECISION` of the requested rate.
pub const RATE_PRECISION: u64 = 1000;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Rates and bursts as requested by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterParams {
    /// Peak information rate, units per second.
    pub pir: u64,
    /// Peak burst size, units.
    pub pbs: u64,
    /// Committed information rate, units per second.
    pub cir: u64,
    /// Committed burst size, units.
    pub cbs: u64,
}

impl MeterParams {
    /// Creates parameters from the `pir:pbs cir:cbs` quadruple.
    pub fn new(pir: u64, pbs: u64, cir: u64, cbs: u64) -> Self {
        Self { pir, pbs, cir, cbs }
    }
}

/// One rate in refill-tick form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RateEncoding {
    /// Nanoseconds per tick; zero disables refill.
    pub period: u64,
    /// Units credited per tick.
    pub unit_per_period: u64,
}

impl RateEncoding {
    /// A rate that never refills.
    pub const DISABLED: RateEncoding = RateEncoding {
        period: 0,
        unit_per_period: 0,
    };

    /// Returns the rate in units per second this encoding approximates.
    pub fn rate(&self) -> u64 {
        if self.period == 0 {
            return 0;
        }
        let rate = u128::from(self.unit_per_period) * u128::from(NANOS_PER_SEC)
            / u128::from(self.period);
        u64::try_from(rate).unwrap_or(u64::MAX)
    }
}

/// Fully encoded parameters, ready to be written to a meter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodedParams {
    /// Peak rate encoding.
    pub pir: RateEncoding,
    /// Committed rate encoding.
    pub cir: RateEncoding,
    /// Peak burst size.
    pub pbs: u64,
    /// Committed burst size.
    pub cbs: u64,
}

impl EncodedParams {
    /// Builds the record a freshly configured meter starts from: both
    /// buckets full and both refill timestamps at zero.
    pub fn to_record(&self) -> TokenBucketPair {
        TokenBucketPair {
            pir_period: self.pir.period,
            pir_unit_per_period: self.pir.unit_per_period,
            cir_period: self.cir.period,
            cir_unit_per_period: self.cir.unit_per_period,
            pbs: self.pbs,
            cbs: self.cbs,
            pbs_left: self.pbs,
            cbs_left: self.cbs,
            time_p: 0,
            time_c: 0,
        }
    }
}

/// Converts human rates into refill ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEncoder {
    timer_resolution_ns: u64,
}

impl RateEncoder {
    /// Creates an encoder whose periods never drop below
    /// `timer_resolution_ns` (clamped to at least 1 ns).
    pub fn new(timer_resolution_ns: u64) -> Self {
        Self {
            timer_resolution_ns: timer_resolution_ns.max(1),
        }
    }

    /// Returns the timer resolution in nanoseconds.
    pub fn timer_resolution_ns(&self) -> u64 {
        self.timer_resolution_ns
    }

    /// Encodes one rate. A zero rate disables refill.
    ///
    /// One unit per period is used when `1e9 / rate` divides evenly or is
    /// long enough that truncating it costs less than 1/[`RATE_PRECISION`].
    /// Otherwise the shortest period of at least the timer resolution that
    /// credits a whole number of units is used, unless that period is longer
    /// than one crediting [`RATE_PRECISION`] units, in which case the latter
    /// is used with the units rounded to nearest.
    pub fn encode_rate(&self, field: &'static str, rate: u64) -> MeterResult<RateEncoding> {
        if rate == 0 {
            return Ok(RateEncoding::DISABLED);
        }

        let resolution = self.timer_resolution_ns;
        let period = NANOS_PER_SEC / rate;
        if period >= resolution && (NANOS_PER_SEC % rate == 0 || period >= RATE_PRECISION) {
            return Ok(RateEncoding {
                period,
                unit_per_period: 1,
            });
        }

        let rate_wide = u128::from(rate);
        let nanos = u128::from(NANOS_PER_SEC);
        let resolution_wide = u128::from(resolution);

        // Shortest period >= resolution with rate * period a multiple of 1e9.
        let exact_step = nanos / u128::from(gcd(rate, NANOS_PER_SEC));
        let exact = resolution_wide.div_ceil(exact_step) * exact_step;
        // Period crediting about RATE_PRECISION units per tick.
        let precise = (u128::from(RATE_PRECISION) * nanos)
            .div_ceil(rate_wide)
            .max(resolution_wide);

        let period = exact.min(precise);
        let units = (rate_wide * period + nanos / 2) / nanos;
        let overflow = || MeterError::ConfigOverflow {
            field,
            value: rate,
            resolution_ns: resolution,
        };
        Ok(RateEncoding {
            period: u64::try_from(period).map_err(|_| overflow())?,
            unit_per_period: u64::try_from(units).map_err(|_| overflow())?,
        })
    }

    /// Encodes both rates. Nothing is written anywhere, so a failure here
    /// leaves the previous configuration of the target meter untouched.
    pub fn encode(&self, params: &MeterParams) -> MeterResult<EncodedParams> {
        let encoded = EncodedParams {
            pir: self.encode_rate("pir", params.pir)?,
            cir: self.encode_rate("cir", params.cir)?,
            pbs: params.pbs,
            cbs: params.cbs,
        };
        debug!(
            pir = params.pir,
            pir_period = encoded.pir.period,
            pir_unit_per_period = encoded.pir.unit_per_period,
            cir = params.cir,
            cir_period = encoded.cir.period,
            cir_unit_per_period = encoded.cir.unit_per_period,
            "Encoded meter rates"
        );
        Ok(encoded)
    }
}

impl Default for RateEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TIMER_RESOLUTION_NS)
    }
}

/// Rates recovered from a stored record, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterRates {
    /// Peak information rate, units per second.
    pub pir: u64,
    /// Peak burst size.
    pub pbs: u64,
    /// Committed information rate, units per second.
    pub cir: u64,
    /// Committed burst size.
    pub cbs: u64,
}

impl MeterRates {
    /// Decodes the rates a record was configured with.
    pub fn from_record(record: &TokenBucketPair) -> Self {
        let pir = RateEncoding {
            period: record.pir_period,
            unit_per_period: record.pir_unit_per_period,
        };
        let cir = RateEncoding {
            period: record.cir_period,
            unit_per_period: record.cir_unit_per_period,
        };
        Self {
            pir: pir.rate(),
            pbs: record.pbs,
            cir: cir.rate(),
            cbs: record.cbs,
        }
    }
}

impl std::fmt::Display for MeterRates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} {}:{}", self.pir, self.pbs, self.cir, self.cbs)
    }
}

/// Boundary through which the control plane configures and inspects meters.
///
/// Implemented by each kind of meter store; `Ref` names one instance in it.
pub trait ConfigPort {
    /// How an instance is addressed in this store.
    type Ref: ?Sized;

    /// Creates or updates the instance's rates. Buckets are refilled and
    /// refill timestamps reset to zero.
    fn set_rates(&self, meter: &Self::Ref, params: &MeterParams) -> MeterResult<()>;

    /// Returns a consistent snapshot of the instance.
    fn read(&self, meter: &Self::Ref) -> MeterResult<TokenBucketPair>;

    /// Returns the instance to the unconfigured state.
    fn reset(&self, meter: &Self::Ref) -> MeterResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(period: u64) -> RateEncoding {
        RateEncoding {
            period,
            unit_per_period: 1,
        }
    }

    #[test]
    fn test_encode_bytes_rate() {
        let encoder = RateEncoder::default();
        assert_eq!(encoder.encode_rate("pir", 250_000).unwrap(), unit(4000));
        assert_eq!(encoder.encode_rate("pir", 1_250_000).unwrap(), unit(800));
    }

    #[test]
    fn test_encode_packets_rate() {
        let encoder = RateEncoder::default();
        assert_eq!(encoder.encode_rate("cir", 100).unwrap(), unit(10_000_000));
    }

    #[test]
    fn test_encode_above_timer_resolution() {
        let encoder = RateEncoder::default();
        assert_eq!(
            encoder.encode_rate("pir", 5_000_000_000).unwrap(),
            RateEncoding {
                period: 1,
                unit_per_period: 5,
            }
        );

        let coarse = RateEncoder::new(1000);
        // 10 MB/s would need a 100 ns period; credit 10 bytes per 1 us instead.
        assert_eq!(
            coarse.encode_rate("pir", 10_000_000).unwrap(),
            RateEncoding {
                period: 1000,
                unit_per_period: 10,
            }
        );
    }

    fn assert_close(encoder: &RateEncoder, rate: u64) {
        let encoding = encoder.encode_rate("pir", rate).unwrap();
        assert!(encoding.period >= encoder.timer_resolution_ns());
        let effective = encoding.rate();
        assert!(
            effective.abs_diff(rate) * RATE_PRECISION <= rate,
            "rate {} encoded as {:?} ({} units/s)",
            rate,
            encoding,
            effective
        );
    }

    #[test]
    fn test_encode_sub_nanosecond_rates_exactly() {
        let encoder = RateEncoder::default();
        // 0.6 and 0.75 G units/s: 3 units per 5 ns and 3 per 4 ns.
        assert_eq!(
            encoder.encode_rate("pir", 600_000_000).unwrap(),
            RateEncoding {
                period: 5,
                unit_per_period: 3,
            }
        );
        let encoding = encoder.encode_rate("pir", 750_000_000).unwrap();
        assert_eq!(encoding.rate(), 750_000_000);
        // 10 Gb/s in bytes.
        let encoding = encoder.encode_rate("pir", 1_250_000_000).unwrap();
        assert_eq!((encoding.period, encoding.unit_per_period), (4, 5));
        assert_eq!(encoding.rate(), 1_250_000_000);
    }

    #[test]
    fn test_encoded_rates_stay_close() {
        let encoder = RateEncoder::default();
        for rate in [
            1,
            3,
            999_999,
            3_000_000,
            7_000_001,
            600_000_000,
            750_000_000,
            999_999_999,
            1_000_000_000,
            1_250_000_000,
            1_999_000_000,
            1_999_999_999,
            40_000_000_000,
        ] {
            assert_close(&encoder, rate);
        }
        let coarse = RateEncoder::new(1000);
        for rate in [999_999, 3_000_000, 1_250_000_000, 1_999_999_999] {
            assert_close(&coarse, rate);
        }
    }

    #[test]
    fn test_encode_zero_rate_disables_refill() {
        let encoder = RateEncoder::default();
        assert_eq!(encoder.encode_rate("cir", 0).unwrap(), RateEncoding::DISABLED);
    }

    #[test]
    fn test_encode_overflow() {
        let encoder = RateEncoder::new(u64::MAX);
        let err = encoder
            .encode(&MeterParams::new(u64::MAX, 1, 100, 1))
            .unwrap_err();
        assert_eq!(
            err,
            MeterError::ConfigOverflow {
                field: "pir",
                value: u64::MAX,
                resolution_ns: u64::MAX,
            }
        );
    }

    #[test]
    fn test_zero_resolution_clamped() {
        assert_eq!(RateEncoder::new(0).timer_resolution_ns(), 1);
    }

    #[test]
    fn test_to_record_fills_buckets() {
        let encoded = RateEncoder::default()
            .encode(&MeterParams::new(250_000, 2500, 125_000, 1250))
            .unwrap();
        let record = encoded.to_record();
        assert_eq!(record.pir_period, 4000);
        assert_eq!(record.cir_period, 8000);
        assert_eq!((record.pbs_left, record.cbs_left), (2500, 1250));
        assert_eq!((record.time_p, record.time_c), (0, 0));
    }

    #[test]
    fn test_rates_round_trip_through_record() {
        let params = MeterParams::new(1_250_000, 6250, 250_000, 2500);
        let record = RateEncoder::default().encode(&params).unwrap().to_record();
        let rates = MeterRates::from_record(&record);
        assert_eq!(rates.to_string(), "1250000:6250 250000:2500");
    }

    #[test]
    fn test_rate_of_direct_entry_encoding() {
        // 1 ms period, 1250 B per period: 10 Mb/s.
        let encoding = RateEncoding {
            period: 1_000_000,
            unit_per_period: 1250,
        };
        assert_eq!(encoding.rate(), 1_250_000);
    }
}
