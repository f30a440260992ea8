//! Two-rate three-color meters for PSA eBPF pipelines.
//!
//! This crate holds the metering state of a compiled dataplane and the
//! algorithm that advances it:
//!
//! - [`TokenBucketPair`]: one meter's peak and committed buckets, with the
//!   canonical 88-byte little-endian record layout
//! - [`engine`]: the lazily refilled two-rate three-color marker
//! - [`MeterInstance`]: a record guarded by its own lock
//! - [`IndirectMeterStore`]: standalone meters addressed by index
//! - [`DirectMeterTable`]: meters embedded in match-table entry values
//! - [`ConfigPort`] and [`RateEncoder`]: control-plane configuration
//! - [`Pipeline`]: named stores and tables built from a description
//!
//! # Architecture
//!
//! ```text
//!  control plane                       packet path
//!       │                                   │
//!   ConfigPort::set_rates              execute / hit (packet_len, now)
//!       │  RateEncoder                      │
//!       ▼                                   ▼
//!  IndirectMeterStore ── MeterInstance ── engine::mark ──> Color
//!  DirectMeterTable   ──┘  (per-instance lock)
//! ```
//!
//! Time is always supplied by the caller in nanoseconds; nothing in this
//! crate reads a clock.
//!
//! # Example
//!
//! ```
//! use psabpf_meter::{Color, ConfigPort, IndirectMeterStore, MeterParams, MeterUnit, RateEncoder};
//!
//! let store = IndirectMeterStore::new("ingress_meter1", 1, MeterUnit::Bytes, RateEncoder::default());
//! store.set_rates(&0, &MeterParams::new(250_000, 2500, 250_000, 2500)).unwrap();
//!
//! assert_eq!(store.execute(0, 100, 0).unwrap(), Color::Green);
//! let record = store.read(&0).unwrap();
//! assert_eq!((record.pir_period, record.pbs_left), (4000, 2400));
//! ```

pub mod config;
pub mod direct;
pub mod engine;
pub mod error;
pub mod hexdump;
pub mod indirect;
pub mod instance;
pub mod pipeline;
pub mod record;
pub mod stats;
pub mod types;

pub use config::{
    ConfigPort, EncodedParams, MeterParams, MeterRates, RateEncoder, RateEncoding,
    DEFAULT_TIMER_RESOLUTION_NS, NANOS_PER_SEC, RATE_PRECISION,
};
pub use direct::{
    ActionRef, CounterKind, CounterValue, DirectMeterRef, DirectMeterTable, EntryHit, EntryLayout,
    TableEntry,
};
pub use error::{MeterError, MeterResult};
pub use indirect::{IndirectMeterStore, INDEX_KEY_LEN};
pub use instance::MeterInstance;
pub use pipeline::{
    DirectTableDescription, EntryState, IndirectMeterDescription, Pipeline, PipelineDescription,
    PipelineState,
};
pub use record::{TokenBucketPair, METER_RECORD_FIELDS, METER_RECORD_LEN};
pub use stats::{MeterStats, MeterStatsSnapshot};
pub use types::{Color, MeterUnit};
