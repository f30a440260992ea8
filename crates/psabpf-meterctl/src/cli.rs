//! Command line definition.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use psabpf_meter::{Color, MeterParams};

/// Configure and exercise PSA two-rate three-color meters
#[derive(Parser, Debug)]
#[command(name = "meterctl")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Pipeline description (YAML, or JSON with a .json extension)
    #[arg(short = 'p', long, global = true, default_value = "pipeline.yaml")]
    pub pipeline: PathBuf,

    /// State file holding meter records between invocations
    #[arg(short = 's', long, global = true, default_value = "meters.json")]
    pub state: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a state file with every meter unconfigured
    Init {
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },

    /// Set a meter's rates; its buckets start full
    Update {
        #[command(flatten)]
        target: MeterTarget,

        /// Peak rate and burst, PIR:PBS
        #[arg(long)]
        peak: RateBurst,

        /// Committed rate and burst, CIR:CBS
        #[arg(long)]
        committed: RateBurst,
    },

    /// Show a meter's record and configured rates
    Get {
        #[command(flatten)]
        target: MeterTarget,
    },

    /// Return a meter to the unconfigured state
    Reset {
        #[command(flatten)]
        target: MeterTarget,
    },

    /// Meter one packet
    ///
    /// For an indirect meter, marks the packet on that index. For a table,
    /// counts the packet on the entry and marks it on every direct meter,
    /// or only on --slot when given.
    Execute {
        #[command(flatten)]
        target: MeterTarget,

        /// Packet length in bytes
        #[arg(long)]
        len: u32,

        /// Arrival time in nanoseconds (defaults to the tool's clock)
        #[arg(long)]
        at: Option<u64>,

        /// Color assigned upstream; enables color-aware marking
        #[arg(long, value_parser = parse_color)]
        color: Option<Color>,
    },

    /// Add or replace a table entry
    EntryUpdate {
        #[command(flatten)]
        entry: EntryTarget,

        /// Raw value, hex
        #[arg(long)]
        value: String,
    },

    /// Show a table entry's raw value
    EntryGet {
        #[command(flatten)]
        entry: EntryTarget,
    },

    /// Remove a table entry
    EntryDelete {
        #[command(flatten)]
        entry: EntryTarget,
    },

    /// Show color tallies of every meter and table
    Stats,
}

impl Command {
    /// Whether the command changes pipeline state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::Get { .. } | Command::EntryGet { .. } | Command::Stats
        )
    }
}

/// One meter: an indirect index, or a direct meter of a table entry.
#[derive(clap::Args, Debug, Clone)]
pub struct MeterTarget {
    /// Indirect meter or table name
    #[arg(short = 'm', long)]
    pub meter: String,

    /// Index into an indirect meter
    #[arg(short = 'i', long, conflicts_with = "key")]
    pub index: Option<u32>,

    /// Table entry key, hex
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Direct meter slot within the entry
    #[arg(long, requires = "key")]
    pub slot: Option<usize>,
}

/// One table entry.
#[derive(clap::Args, Debug, Clone)]
pub struct EntryTarget {
    /// Table name
    #[arg(short = 't', long)]
    pub table: String,

    /// Entry key, hex
    #[arg(short = 'k', long)]
    pub key: String,
}

/// A `RATE:BURST` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBurst {
    pub rate: u64,
    pub burst: u64,
}

impl FromStr for RateBurst {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rate, burst) = s
            .split_once(':')
            .ok_or_else(|| format!("expected RATE:BURST, got '{}'", s))?;
        let rate = rate
            .trim()
            .parse()
            .map_err(|e| format!("invalid rate '{}': {}", rate, e))?;
        let burst = burst
            .trim()
            .parse()
            .map_err(|e| format!("invalid burst '{}': {}", burst, e))?;
        Ok(Self { rate, burst })
    }
}

/// Combines peak and committed pairs into meter parameters.
pub fn meter_params(peak: RateBurst, committed: RateBurst) -> MeterParams {
    MeterParams::new(peak.rate, peak.burst, committed.rate, committed.burst)
}

fn parse_color(s: &str) -> Result<Color, String> {
    Color::parse(s).ok_or_else(|| format!("expected GREEN, YELLOW or RED, got '{}'", s))
}
