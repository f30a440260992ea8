//! Meter record and its canonical wire layout.
//!
//! ```text
//!  0  pir_period           8  pir_unit_per_period
//! 16  cir_period          24  cir_unit_per_period
//! 32  pbs                 40  cbs
//! 48  pbs_left            56  cbs_left
//! 64  time_p              72  time_c
//! 80  lock
//! ```
//!
//! Every field is a little-endian u64. The lock word is written as zero and
//! ignored on decode: the lock itself lives next to the record, not in it.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{MeterError, MeterResult};

/// Number of u64 fields in an encoded record, lock word included.
pub const METER_RECORD_FIELDS: usize = 11;

/// Size in bytes of an encoded record.
pub const METER_RECORD_LEN: usize = METER_RECORD_FIELDS * 8;

/// State of one two-rate meter instance: a peak and a committed bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenBucketPair {
    /// Nanoseconds per peak refill tick.
    pub pir_period: u64,
    /// Units credited to the peak bucket per tick.
    pub pir_unit_per_period: u64,
    /// Nanoseconds per committed refill tick.
    pub cir_period: u64,
    /// Units credited to the committed bucket per tick.
    pub cir_unit_per_period: u64,
    /// Peak bucket capacity.
    pub pbs: u64,
    /// Committed bucket capacity.
    pub cbs: u64,
    /// Tokens left in the peak bucket.
    pub pbs_left: u64,
    /// Tokens left in the committed bucket.
    pub cbs_left: u64,
    /// Last peak refill, monotonic ns.
    pub time_p: u64,
    /// Last committed refill, monotonic ns.
    pub time_c: u64,
}

impl TokenBucketPair {
    /// Returns true when neither bucket can ever refill.
    pub fn is_unconfigured(&self) -> bool {
        (self.pir_period == 0 || self.pir_unit_per_period == 0)
            && (self.cir_period == 0 || self.cir_unit_per_period == 0)
    }

    /// Returns true when both token levels are within their capacities.
    pub fn within_capacity(&self) -> bool {
        self.pbs_left <= self.pbs && self.cbs_left <= self.cbs
    }

    /// Rejects token levels above their bucket capacity.
    pub fn validate(&self) -> MeterResult<()> {
        for (field, left, capacity) in [
            ("pbs_left", self.pbs_left, self.pbs),
            ("cbs_left", self.cbs_left, self.cbs),
        ] {
            if left > capacity {
                return Err(MeterError::invalid_config(
                    field,
                    format!("{} tokens exceed bucket capacity {}", left, capacity),
                ));
            }
        }
        Ok(())
    }

    /// Encodes the record into the canonical 88-byte layout.
    pub fn to_bytes(&self) -> [u8; METER_RECORD_LEN] {
        let mut buf = [0u8; METER_RECORD_LEN];
        self.write_to(&mut buf);
        buf
    }

    /// Writes the canonical layout into the first 88 bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`METER_RECORD_LEN`]; callers slice
    /// the buffer from a layout that already accounts for the record size.
    pub fn write_to(&self, buf: &mut [u8]) {
        let fields = [
            self.pir_period,
            self.pir_unit_per_period,
            self.cir_period,
            self.cir_unit_per_period,
            self.pbs,
            self.cbs,
            self.pbs_left,
            self.cbs_left,
            self.time_p,
            self.time_c,
            0,
        ];
        LittleEndian::write_u64_into(&fields, &mut buf[..METER_RECORD_LEN]);
    }

    /// Decodes a record from exactly 88 bytes. Token levels above capacity
    /// are rejected.
    pub fn from_bytes(buf: &[u8]) -> MeterResult<Self> {
        if buf.len() != METER_RECORD_LEN {
            return Err(MeterError::InvalidLength {
                what: "meter record",
                expected: METER_RECORD_LEN,
                actual: buf.len(),
            });
        }
        let mut f = [0u64; METER_RECORD_FIELDS];
        LittleEndian::read_u64_into(buf, &mut f);
        let record = Self {
            pir_period: f[0],
            pir_unit_per_period: f[1],
            cir_period: f[2],
            cir_unit_per_period: f[3],
            pbs: f[4],
            cbs: f[5],
            pbs_left: f[6],
            cbs_left: f[7],
            time_p: f[8],
            time_c: f[9],
        };
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hexdump;
    use pretty_assertions::assert_eq;

    fn scenario_a_after_one_packet() -> TokenBucketPair {
        TokenBucketPair {
            pir_period: 4000,
            pir_unit_per_period: 1,
            cir_period: 4000,
            cir_unit_per_period: 1,
            pbs: 2500,
            cbs: 2500,
            pbs_left: 2400,
            cbs_left: 2400,
            time_p: 0,
            time_c: 0,
        }
    }

    #[test]
    fn test_encoding_matches_map_dump() {
        let expected = hexdump::parse(
            "A0 0F 00 00 00 00 00 00 01 00 00 00 00 00 00 00 \
             A0 0F 00 00 00 00 00 00 01 00 00 00 00 00 00 00 \
             C4 09 00 00 00 00 00 00 C4 09 00 00 00 00 00 00 \
             60 09 00 00 00 00 00 00 60 09 00 00 00 00 00 00 \
             00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
             00 00 00 00 00 00 00 00",
        )
        .unwrap();
        assert_eq!(scenario_a_after_one_packet().to_bytes().to_vec(), expected);
    }

    #[test]
    fn test_decode_ignores_lock_word() {
        let mut bytes = scenario_a_after_one_packet().to_bytes();
        bytes[80] = 1;
        let decoded = TokenBucketPair::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, scenario_a_after_one_packet());
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = TokenBucketPair::from_bytes(&[0u8; 80]).unwrap_err();
        assert_eq!(
            err,
            MeterError::InvalidLength {
                what: "meter record",
                expected: 88,
                actual: 80,
            }
        );
    }

    #[test]
    fn test_decode_rejects_overfull_buckets() {
        let mut record = scenario_a_after_one_packet();
        record.pbs_left = 2501;
        let err = TokenBucketPair::from_bytes(&record.to_bytes()).unwrap_err();
        assert_eq!(
            err,
            MeterError::invalid_config("pbs_left", "2501 tokens exceed bucket capacity 2500")
        );

        let mut record = scenario_a_after_one_packet();
        record.cbs = 0;
        assert!(matches!(
            TokenBucketPair::from_bytes(&record.to_bytes()),
            Err(MeterError::InvalidConfig { field, .. }) if field == "cbs_left"
        ));
    }

    #[test]
    fn test_unconfigured() {
        assert!(TokenBucketPair::default().is_unconfigured());
        assert!(!scenario_a_after_one_packet().is_unconfigured());
    }
}
