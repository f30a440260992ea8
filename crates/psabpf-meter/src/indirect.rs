//! Indirect meters: a fixed-capacity array of instances addressed by index.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigPort, MeterParams, RateEncoder};
use crate::error::{MeterError, MeterResult};
use crate::instance::MeterInstance;
use crate::record::{TokenBucketPair, METER_RECORD_LEN};
use crate::stats::{MeterStats, MeterStatsSnapshot};
use crate::types::{Color, MeterUnit};

/// Size in bytes of an indirect meter key (little-endian u32 index).
pub const INDEX_KEY_LEN: usize = 4;

/// A standalone meter array, independent of any table.
///
/// Built once with a fixed capacity and shared by reference with every
/// packet-processing context; there is no process-wide instance.
#[derive(Debug)]
pub struct IndirectMeterStore {
    name: String,
    unit: MeterUnit,
    encoder: RateEncoder,
    meters: Box<[MeterInstance]>,
    stats: MeterStats,
}

impl IndirectMeterStore {
    /// Creates a store of `capacity` unconfigured meters.
    pub fn new(name: impl Into<String>, capacity: u32, unit: MeterUnit, encoder: RateEncoder) -> Self {
        let name = name.into();
        info!(
            "Created indirect meter {} with {} {} instance(s)",
            name,
            capacity,
            unit.as_str()
        );
        let meters = (0..capacity).map(|_| MeterInstance::default()).collect();
        Self {
            name,
            unit,
            encoder,
            meters,
            stats: MeterStats::default(),
        }
    }

    /// Returns the store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unit domain.
    pub fn unit(&self) -> MeterUnit {
        self.unit
    }

    /// Returns the number of instances.
    pub fn capacity(&self) -> u32 {
        // Built from a u32 range, so the length always fits.
        self.meters.len() as u32
    }

    /// Returns the rate encoder used by [`ConfigPort::set_rates`].
    pub fn encoder(&self) -> &RateEncoder {
        &self.encoder
    }

    /// Looks up one instance.
    pub fn get(&self, index: u32) -> MeterResult<&MeterInstance> {
        self.meters.get(index as usize).ok_or_else(|| {
            warn!("Meter {}: index {} out of range", self.name, index);
            MeterError::invalid_index(&self.name, index, self.capacity())
        })
    }

    /// Meters a packet of `packet_len` bytes against instance `index`.
    pub fn execute(&self, index: u32, packet_len: u32, now: u64) -> MeterResult<Color> {
        self.execute_color_aware(index, packet_len, now, Color::Green)
    }

    /// Meters a pre-colored packet against instance `index`.
    pub fn execute_color_aware(
        &self,
        index: u32,
        packet_len: u32,
        now: u64,
        pre_color: Color,
    ) -> MeterResult<Color> {
        let meter = self.get(index)?;
        let color = meter.mark_color_aware(self.unit.size_units(packet_len), now, pre_color);
        self.stats.record(color);
        trace!(meter = %self.name, index, packet_len, now, %color, "Meter executed");
        Ok(color)
    }

    /// Returns the color tally.
    pub fn stats(&self) -> MeterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Replaces the color tally.
    pub fn load_stats(&self, snapshot: &MeterStatsSnapshot) {
        self.stats.load(snapshot);
    }

    /// Decodes a raw map key into an index.
    pub fn decode_key(key: &[u8]) -> MeterResult<u32> {
        if key.len() != INDEX_KEY_LEN {
            return Err(MeterError::InvalidLength {
                what: "meter key",
                expected: INDEX_KEY_LEN,
                actual: key.len(),
            });
        }
        Ok(LittleEndian::read_u32(key))
    }

    /// Encodes an index as a raw map key.
    pub fn encode_key(index: u32) -> [u8; INDEX_KEY_LEN] {
        let mut key = [0u8; INDEX_KEY_LEN];
        LittleEndian::write_u32(&mut key, index);
        key
    }

    /// Reads the raw 88-byte value stored under a raw key.
    pub fn read_value(&self, key: &[u8]) -> MeterResult<[u8; METER_RECORD_LEN]> {
        let index = Self::decode_key(key)?;
        Ok(self.get(index)?.snapshot().to_bytes())
    }

    /// Overwrites the record under a raw key with a raw 88-byte value.
    /// Values holding more tokens than a bucket's capacity are rejected.
    pub fn write_value(&self, key: &[u8], value: &[u8]) -> MeterResult<()> {
        let index = Self::decode_key(key)?;
        let meter = self.get(index)?;
        let record = TokenBucketPair::from_bytes(value)?;
        meter.store(record);
        debug!("Meter {}[{}]: raw value written", self.name, index);
        Ok(())
    }

    /// Returns a snapshot of every instance, each taken under its own lock.
    pub fn records(&self) -> Vec<TokenBucketPair> {
        self.meters.iter().map(MeterInstance::snapshot).collect()
    }

    /// Loads records previously returned by [`Self::records`]. Nothing is
    /// stored unless every record is valid.
    pub fn restore(&self, records: &[TokenBucketPair]) -> MeterResult<()> {
        if records.len() != self.meters.len() {
            return Err(MeterError::invalid_config(
                format!("{}.records", self.name),
                format!("expected {} records, got {}", self.meters.len(), records.len()),
            ));
        }
        records.iter().try_for_each(TokenBucketPair::validate)?;
        for (meter, record) in self.meters.iter().zip(records) {
            meter.store(*record);
        }
        Ok(())
    }
}

impl ConfigPort for IndirectMeterStore {
    type Ref = u32;

    fn set_rates(&self, index: &u32, params: &MeterParams) -> MeterResult<()> {
        let meter = self.get(*index)?;
        let encoded = self.encoder.encode(params)?;
        meter.configure(&encoded);
        debug!(
            "Meter {}[{}] configured: {}:{} {}:{}",
            self.name, index, params.pir, params.pbs, params.cir, params.cbs
        );
        Ok(())
    }

    fn read(&self, index: &u32) -> MeterResult<TokenBucketPair> {
        Ok(self.get(*index)?.snapshot())
    }

    fn reset(&self, index: &u32) -> MeterResult<()> {
        self.get(*index)?.reset();
        debug!("Meter {}[{}] reset", self.name, index);
        Ok(())
    }
}
