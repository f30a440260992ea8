//! Direct meters: meter records embedded in match-table entry values.
//!
//! An entry value is laid out as
//!
//! ```text
//! +-----------+-------------+---------+---------+-----+-----------+
//! | action id | action data | counter | meter 0 | ... | meter n-1 |
//! |   u32     | (pad to 8)  | (opt.)  |  88 B   |     |   88 B    |
//! +-----------+-------------+---------+---------+-----+-----------+
//! ```
//!
//! Each embedded meter owns a disjoint 88-byte range and its own lock, so
//! marking or configuring one never touches its neighbours. Matching is not
//! modelled here: entries are addressed by their exact key bytes.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::config::{ConfigPort, MeterParams, RateEncoder};
use crate::error::{MeterError, MeterResult};
use crate::instance::MeterInstance;
use crate::record::{TokenBucketPair, METER_RECORD_LEN};
use crate::stats::{MeterStats, MeterStatsSnapshot};
use crate::types::{Color, MeterUnit};

const ACTION_ID_LEN: usize = 4;

fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Direct counter attached to each entry, placed before the meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterKind {
    /// u32 packet count, 4 bytes padding.
    Packets,
    /// u64 byte count.
    Bytes,
    /// u64 byte count, u32 packet count, 4 bytes padding.
    PacketsAndBytes,
}

impl CounterKind {
    /// Encoded size including padding.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Packets | Self::Bytes => 8,
            Self::PacketsAndBytes => 16,
        }
    }
}

/// Shape of the entry values of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLayout {
    /// Bytes of action parameters following the action id.
    pub action_data_len: usize,
    /// Direct counter, if the table has one.
    #[serde(default)]
    pub counter: Option<CounterKind>,
    /// Number of direct meters per entry.
    pub meters: usize,
}

impl EntryLayout {
    /// Size of the action reference (id plus data), 8-byte aligned.
    pub fn action_ref_len(&self) -> usize {
        align8(ACTION_ID_LEN + self.action_data_len)
    }

    /// Byte range of the direct counter, if any.
    pub fn counter_range(&self) -> Option<Range<usize>> {
        let start = self.action_ref_len();
        self.counter.map(|kind| start..start + kind.encoded_len())
    }

    /// Byte offset of direct meter `slot`.
    pub fn meter_offset(&self, slot: usize) -> usize {
        let counter_len = self.counter.map_or(0, |kind| kind.encoded_len());
        self.action_ref_len() + counter_len + slot * METER_RECORD_LEN
    }

    /// Byte range of direct meter `slot`.
    pub fn meter_range(&self, slot: usize) -> Range<usize> {
        let start = self.meter_offset(slot);
        start..start + METER_RECORD_LEN
    }

    /// Total size of an entry value.
    pub fn value_len(&self) -> usize {
        self.meter_offset(self.meters)
    }
}

/// The action an entry resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRef {
    /// Action identifier.
    pub action_id: u32,
    /// Raw action parameters.
    pub data: Vec<u8>,
}

/// Packet and byte counts of a direct counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    /// Packets counted.
    pub packets: u32,
    /// Bytes counted.
    pub bytes: u64,
}

#[derive(Debug)]
struct DirectCounter {
    kind: CounterKind,
    packets: AtomicU32,
    bytes: AtomicU64,
}

impl DirectCounter {
    fn new(kind: CounterKind, value: CounterValue) -> Self {
        Self {
            kind,
            packets: AtomicU32::new(value.packets),
            bytes: AtomicU64::new(value.bytes),
        }
    }

    fn count(&self, packet_len: u32) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(u64::from(packet_len), Ordering::Relaxed);
    }

    fn value(&self) -> CounterValue {
        CounterValue {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    fn set(&self, value: CounterValue) {
        self.packets.store(value.packets, Ordering::Relaxed);
        self.bytes.store(value.bytes, Ordering::Relaxed);
    }

    fn decode(kind: CounterKind, buf: &[u8]) -> CounterValue {
        match kind {
            CounterKind::Packets => CounterValue {
                packets: LittleEndian::read_u32(&buf[0..4]),
                bytes: 0,
            },
            CounterKind::Bytes => CounterValue {
                packets: 0,
                bytes: LittleEndian::read_u64(&buf[0..8]),
            },
            CounterKind::PacketsAndBytes => CounterValue {
                bytes: LittleEndian::read_u64(&buf[0..8]),
                packets: LittleEndian::read_u32(&buf[8..12]),
            },
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let value = self.value();
        match self.kind {
            CounterKind::Packets => LittleEndian::write_u32(&mut buf[0..4], value.packets),
            CounterKind::Bytes => LittleEndian::write_u64(&mut buf[0..8], value.bytes),
            CounterKind::PacketsAndBytes => {
                LittleEndian::write_u64(&mut buf[0..8], value.bytes);
                LittleEndian::write_u32(&mut buf[8..12], value.packets);
            }
        }
    }
}

/// A raw entry value split into its sections.
struct DecodedValue {
    action: ActionRef,
    counter: Option<CounterValue>,
    meters: Vec<TokenBucketPair>,
}

impl DecodedValue {
    fn parse(layout: &EntryLayout, value: &[u8]) -> MeterResult<Self> {
        if value.len() != layout.value_len() {
            return Err(MeterError::InvalidLength {
                what: "entry value",
                expected: layout.value_len(),
                actual: value.len(),
            });
        }
        let action = ActionRef {
            action_id: LittleEndian::read_u32(&value[..ACTION_ID_LEN]),
            data: value[ACTION_ID_LEN..ACTION_ID_LEN + layout.action_data_len].to_vec(),
        };
        let counter = layout
            .counter
            .zip(layout.counter_range())
            .map(|(kind, range)| DirectCounter::decode(kind, &value[range]));
        let meters = (0..layout.meters)
            .map(|slot| TokenBucketPair::from_bytes(&value[layout.meter_range(slot)]))
            .collect::<MeterResult<Vec<_>>>()?;
        Ok(Self {
            action,
            counter,
            meters,
        })
    }
}

/// One table entry: forwarding decision plus its direct resources.
#[derive(Debug)]
pub struct TableEntry {
    layout: EntryLayout,
    action: RwLock<ActionRef>,
    counter: Option<DirectCounter>,
    meters: Box<[MeterInstance]>,
}

impl TableEntry {
    fn from_decoded(layout: EntryLayout, decoded: DecodedValue) -> Self {
        let counter = layout
            .counter
            .map(|kind| DirectCounter::new(kind, decoded.counter.unwrap_or_default()));
        Self {
            layout,
            action: RwLock::new(decoded.action),
            counter,
            meters: decoded.meters.into_iter().map(MeterInstance::new).collect(),
        }
    }

    /// Rewrites every section while holding the action write lock, so a
    /// concurrent [`DirectMeterTable::hit`] sees either the old or the new
    /// action together with the matching meters.
    fn apply(&self, decoded: DecodedValue) {
        let mut action = self.action.write();
        *action = decoded.action;
        if let (Some(counter), Some(value)) = (&self.counter, decoded.counter) {
            counter.set(value);
        }
        for (meter, record) in self.meters.iter().zip(decoded.meters) {
            meter.store(record);
        }
    }

    /// Returns the entry's action.
    pub fn action(&self) -> ActionRef {
        self.action.read().clone()
    }

    /// Counts one packet on the direct counter, if present.
    pub fn count(&self, packet_len: u32) {
        if let Some(counter) = &self.counter {
            counter.count(packet_len);
        }
    }

    /// Returns the direct counter value, if present.
    pub fn counter(&self) -> Option<CounterValue> {
        self.counter.as_ref().map(DirectCounter::value)
    }

    /// Returns direct meter `slot`.
    pub fn meter(&self, slot: usize) -> Option<&MeterInstance> {
        self.meters.get(slot)
    }

    /// Returns the number of direct meters.
    pub fn meter_count(&self) -> usize {
        self.meters.len()
    }

    /// Encodes the whole entry value. Each section is read under its own
    /// lock; meters never share one.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut value = vec![0u8; self.layout.value_len()];
        {
            let action = self.action.read();
            LittleEndian::write_u32(&mut value[..ACTION_ID_LEN], action.action_id);
            let data_len = action.data.len().min(self.layout.action_data_len);
            value[ACTION_ID_LEN..ACTION_ID_LEN + data_len].copy_from_slice(&action.data[..data_len]);
        }
        if let (Some(counter), Some(range)) = (&self.counter, self.layout.counter_range()) {
            counter.encode(&mut value[range]);
        }
        for (slot, meter) in self.meters.iter().enumerate() {
            meter.snapshot().write_to(&mut value[self.layout.meter_range(slot)]);
        }
        value
    }
}

/// Outcome of a packet hitting a table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHit {
    /// The matched entry's action.
    pub action: ActionRef,
    /// Color from each direct meter, by slot.
    pub colors: Vec<Color>,
}

/// Address of one direct meter: entry key and slot within the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectMeterRef {
    /// Exact entry key bytes.
    pub key: Vec<u8>,
    /// Meter slot within the entry value.
    pub slot: usize,
}

impl DirectMeterRef {
    /// Creates a reference to meter `slot` of entry `key`.
    pub fn new(key: impl Into<Vec<u8>>, slot: usize) -> Self {
        Self {
            key: key.into(),
            slot,
        }
    }
}

/// A match table whose entries carry direct meters.
#[derive(Debug)]
pub struct DirectMeterTable {
    name: String,
    layout: EntryLayout,
    unit: MeterUnit,
    encoder: RateEncoder,
    entries: DashMap<Vec<u8>, Arc<TableEntry>>,
    stats: MeterStats,
}

impl DirectMeterTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>, layout: EntryLayout, unit: MeterUnit, encoder: RateEncoder) -> Self {
        let name = name.into();
        info!(
            "Created table {} with {} direct {} meter(s) per entry ({} byte values)",
            name,
            layout.meters,
            unit.as_str(),
            layout.value_len()
        );
        Self {
            name,
            layout,
            unit,
            encoder,
            entries: DashMap::new(),
            stats: MeterStats::default(),
        }
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entry value layout.
    pub fn layout(&self) -> &EntryLayout {
        &self.layout
    }

    /// Returns the unit domain of the direct meters.
    pub fn unit(&self) -> MeterUnit {
        self.unit
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the color tally across all entries.
    pub fn stats(&self) -> MeterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Replaces the color tally.
    pub fn load_stats(&self, snapshot: &MeterStatsSnapshot) {
        self.stats.load(snapshot);
    }

    /// Inserts an entry, or rewrites an existing one in place so packets
    /// already holding it keep accounting against the same meters.
    pub fn update_entry(&self, key: &[u8], value: &[u8]) -> MeterResult<()> {
        let decoded = DecodedValue::parse(&self.layout, value)?;
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(occupied) => {
                occupied.get().apply(decoded);
                debug!("Table {}: entry updated", self.name);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(TableEntry::from_decoded(self.layout, decoded)));
                debug!("Table {}: entry added", self.name);
            }
        }
        Ok(())
    }

    /// Deletes an entry together with its direct meters.
    pub fn delete_entry(&self, key: &[u8]) -> MeterResult<()> {
        self.entries
            .remove(key)
            .map(|_| debug!("Table {}: entry deleted", self.name))
            .ok_or_else(|| MeterError::entry_not_found(&self.name, key))
    }

    /// Looks up an entry by exact key.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<TableEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, key: &[u8]) -> MeterResult<Arc<TableEntry>> {
        self.lookup(key)
            .ok_or_else(|| MeterError::entry_not_found(&self.name, key))
    }

    fn require_meter<'a>(&self, entry: &'a TableEntry, slot: usize) -> MeterResult<&'a MeterInstance> {
        entry.meter(slot).ok_or_else(|| MeterError::InvalidSlot {
            table: self.name.clone(),
            slot,
            meters: self.layout.meters,
        })
    }

    /// Returns the raw value of an entry.
    pub fn entry_value(&self, key: &[u8]) -> MeterResult<Vec<u8>> {
        Ok(self.require(key)?.to_bytes())
    }

    /// Returns every entry as raw `(key, value)` pairs.
    pub fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_bytes()))
            .collect();
        entries.sort();
        entries
    }

    /// Meters a packet against one direct meter of an entry.
    pub fn execute(&self, meter: &DirectMeterRef, packet_len: u32, now: u64) -> MeterResult<Color> {
        self.execute_color_aware(meter, packet_len, now, Color::Green)
    }

    /// Meters a pre-colored packet against one direct meter of an entry.
    pub fn execute_color_aware(
        &self,
        meter: &DirectMeterRef,
        packet_len: u32,
        now: u64,
        pre_color: Color,
    ) -> MeterResult<Color> {
        let entry = self.require(&meter.key)?;
        let instance = self.require_meter(&entry, meter.slot)?;
        let color = instance.mark_color_aware(self.unit.size_units(packet_len), now, pre_color);
        self.stats.record(color);
        trace!(table = %self.name, slot = meter.slot, packet_len, now, %color, "Direct meter executed");
        Ok(color)
    }

    /// Processes a packet that matched `key`: counts it and runs every
    /// direct meter of the entry. An in-place update of the entry cannot
    /// interleave with the hit.
    pub fn hit(&self, key: &[u8], packet_len: u32, now: u64) -> MeterResult<EntryHit> {
        let entry = self.require(key)?;
        let action = entry.action.read();
        entry.count(packet_len);
        let size = self.unit.size_units(packet_len);
        let colors = entry
            .meters
            .iter()
            .map(|meter| {
                let color = meter.mark(size, now);
                self.stats.record(color);
                color
            })
            .collect();
        Ok(EntryHit {
            action: action.clone(),
            colors,
        })
    }
}

impl ConfigPort for DirectMeterTable {
    type Ref = DirectMeterRef;

    fn set_rates(&self, meter: &DirectMeterRef, params: &MeterParams) -> MeterResult<()> {
        let entry = self.require(&meter.key)?;
        let instance = self.require_meter(&entry, meter.slot)?;
        let encoded = self.encoder.encode(params)?;
        instance.configure(&encoded);
        debug!(
            "Table {} meter {} configured: {}:{} {}:{}",
            self.name, meter.slot, params.pir, params.pbs, params.cir, params.cbs
        );
        Ok(())
    }

    fn read(&self, meter: &DirectMeterRef) -> MeterResult<TokenBucketPair> {
        let entry = self.require(&meter.key)?;
        Ok(self.require_meter(&entry, meter.slot)?.snapshot())
    }

    fn reset(&self, meter: &DirectMeterRef) -> MeterResult<()> {
        let entry = self.require(&meter.key)?;
        self.require_meter(&entry, meter.slot)?.reset();
        Ok(())
    }
}
