//! Named collection of meter stores and direct-meter tables.
//!
//! A [`Pipeline`] is built from a [`PipelineDescription`] and owned by
//! whoever drives packets through it. Its mutable state can be captured as a
//! [`PipelineState`] and loaded back, which is how the control-plane tool
//! keeps state between invocations.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{RateEncoder, DEFAULT_TIMER_RESOLUTION_NS};
use crate::direct::{DirectMeterTable, EntryLayout};
use crate::error::{MeterError, MeterResult};
use crate::hexdump;
use crate::indirect::IndirectMeterStore;
use crate::record::TokenBucketPair;
use crate::stats::MeterStatsSnapshot;
use crate::types::MeterUnit;

fn default_timer_resolution_ns() -> u64 {
    DEFAULT_TIMER_RESOLUTION_NS
}

/// An indirect meter array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectMeterDescription {
    /// Meter name.
    pub name: String,
    /// Number of instances.
    pub capacity: u32,
    /// Unit domain.
    #[serde(default)]
    pub unit: MeterUnit,
}

/// A table with direct meters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTableDescription {
    /// Table name.
    pub name: String,
    /// Entry value layout.
    #[serde(flatten)]
    pub layout: EntryLayout,
    /// Unit domain of the direct meters.
    #[serde(default)]
    pub unit: MeterUnit,
}

/// Static shape of a pipeline's metering resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescription {
    /// Minimum refill period the rate encoder may produce.
    #[serde(default = "default_timer_resolution_ns")]
    pub timer_resolution_ns: u64,
    /// Indirect meters.
    #[serde(default)]
    pub meters: Vec<IndirectMeterDescription>,
    /// Tables with direct meters.
    #[serde(default)]
    pub tables: Vec<DirectTableDescription>,
}

impl PipelineDescription {
    /// Checks names are unique and every object has at least one meter.
    pub fn validate(&self) -> MeterResult<()> {
        let mut names = HashSet::new();
        let all_names = self
            .meters
            .iter()
            .map(|m| &m.name)
            .chain(self.tables.iter().map(|t| &t.name));
        for name in all_names {
            if name.is_empty() {
                return Err(MeterError::invalid_config("name", "must not be empty"));
            }
            if !names.insert(name) {
                return Err(MeterError::invalid_config(name.clone(), "duplicate name"));
            }
        }
        if let Some(meter) = self.meters.iter().find(|m| m.capacity == 0) {
            return Err(MeterError::invalid_config(
                format!("{}.capacity", meter.name),
                "must be at least 1",
            ));
        }
        if let Some(table) = self.tables.iter().find(|t| t.layout.meters == 0) {
            return Err(MeterError::invalid_config(
                format!("{}.meters", table.name),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Raw entry of a direct-meter table, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryState {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: String,
}

/// Mutable state of every store and table in a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Records of each indirect meter, by index.
    #[serde(default)]
    pub meters: BTreeMap<String, Vec<TokenBucketPair>>,
    /// Entries of each table.
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<EntryState>>,
    /// Color tally of each meter and table.
    #[serde(default)]
    pub stats: BTreeMap<String, MeterStatsSnapshot>,
}

/// The metering resources of one loaded pipeline.
#[derive(Debug)]
pub struct Pipeline {
    meters: BTreeMap<String, IndirectMeterStore>,
    tables: BTreeMap<String, DirectMeterTable>,
}

impl Pipeline {
    /// Builds empty stores and tables from a description.
    pub fn from_description(description: &PipelineDescription) -> MeterResult<Self> {
        description.validate()?;
        let encoder = RateEncoder::new(description.timer_resolution_ns);

        let meters = description
            .meters
            .iter()
            .map(|m| {
                let store = IndirectMeterStore::new(&m.name, m.capacity, m.unit, encoder);
                (m.name.clone(), store)
            })
            .collect();
        let tables = description
            .tables
            .iter()
            .map(|t| {
                let table = DirectMeterTable::new(&t.name, t.layout, t.unit, encoder);
                (t.name.clone(), table)
            })
            .collect();

        info!(
            "Pipeline loaded: {} indirect meter(s), {} table(s), timer resolution {} ns",
            description.meters.len(),
            description.tables.len(),
            encoder.timer_resolution_ns()
        );
        Ok(Self { meters, tables })
    }

    /// Looks up an indirect meter by name.
    pub fn meter(&self, name: &str) -> MeterResult<&IndirectMeterStore> {
        self.meters
            .get(name)
            .ok_or_else(|| MeterError::UnknownObject(name.to_string()))
    }

    /// Looks up a direct-meter table by name.
    pub fn table(&self, name: &str) -> MeterResult<&DirectMeterTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MeterError::UnknownObject(name.to_string()))
    }

    /// Iterates over indirect meters in name order.
    pub fn meters(&self) -> impl Iterator<Item = &IndirectMeterStore> {
        self.meters.values()
    }

    /// Iterates over tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &DirectMeterTable> {
        self.tables.values()
    }

    /// Captures every record and entry.
    pub fn snapshot(&self) -> PipelineState {
        let meters = self
            .meters
            .iter()
            .map(|(name, store)| (name.clone(), store.records()))
            .collect();
        let tables = self
            .tables
            .iter()
            .map(|(name, table)| {
                let entries = table
                    .dump()
                    .into_iter()
                    .map(|(key, value)| EntryState {
                        key: hexdump::format(&key),
                        value: hexdump::format(&value),
                    })
                    .collect();
                (name.clone(), entries)
            })
            .collect();
        let stats = self
            .meters
            .iter()
            .map(|(name, store)| (name.clone(), store.stats()))
            .chain(
                self.tables
                    .iter()
                    .map(|(name, table)| (name.clone(), table.stats())),
            )
            .collect();
        PipelineState {
            meters,
            tables,
            stats,
        }
    }

    /// Loads state captured by [`Self::snapshot`].
    pub fn restore(&self, state: &PipelineState) -> MeterResult<()> {
        for (name, records) in &state.meters {
            self.meter(name)?.restore(records)?;
        }
        for (name, entries) in &state.tables {
            let table = self.table(name)?;
            for entry in entries {
                let key = parse_hex(name, "key", &entry.key)?;
                let value = parse_hex(name, "value", &entry.value)?;
                table.update_entry(&key, &value)?;
            }
        }
        for (name, stats) in &state.stats {
            match (self.meters.get(name), self.tables.get(name)) {
                (Some(store), _) => store.load_stats(stats),
                (None, Some(table)) => table.load_stats(stats),
                (None, None) => return Err(MeterError::UnknownObject(name.clone())),
            }
        }
        Ok(())
    }
}

fn parse_hex(object: &str, what: &str, text: &str) -> MeterResult<Vec<u8>> {
    hexdump::parse(text)
        .map_err(|e| MeterError::invalid_config(format!("{}.{}", object, what), e.to_string()))
}
