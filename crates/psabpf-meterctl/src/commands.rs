//! Command execution against a loaded [`Session`].

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use psabpf_meter::{
    hexdump, Color, ConfigPort, DirectMeterRef, DirectMeterTable, IndirectMeterStore, MeterError,
    MeterParams, MeterRates, MeterStatsSnapshot, Pipeline, TokenBucketPair,
};
use serde::Serialize;
use tracing::info;

use crate::cli::{meter_params, Args, Command, EntryTarget, MeterTarget};
use crate::state::Session;

/// A [`MeterTarget`] resolved against a pipeline.
enum Target<'a> {
    Indirect(&'a IndirectMeterStore, u32),
    Direct(&'a DirectMeterTable, Vec<u8>, Option<usize>),
}

impl<'a> Target<'a> {
    fn resolve(pipeline: &'a Pipeline, target: &MeterTarget) -> Result<Self> {
        if let Ok(store) = pipeline.meter(&target.meter) {
            let Some(index) = target.index else {
                bail!("'{}' is an indirect meter, --index is required", target.meter);
            };
            return Ok(Target::Indirect(store, index));
        }
        let table = pipeline.table(&target.meter)?;
        let Some(key) = &target.key else {
            bail!("'{}' is a table, --key is required", target.meter);
        };
        Ok(Target::Direct(table, parse_hex("key", key)?, target.slot))
    }

    /// The single meter addressed; table targets default to slot 0.
    fn port(&self) -> Port<'_> {
        match self {
            Target::Indirect(store, index) => Port::Indirect(store, *index),
            Target::Direct(table, key, slot) => {
                Port::Direct(table, DirectMeterRef::new(key.clone(), slot.unwrap_or(0)))
            }
        }
    }

    fn label(&self) -> String {
        match self {
            Target::Indirect(store, index) => format!("{}[{}]", store.name(), index),
            Target::Direct(table, key, None) => {
                format!("{}[{}]", table.name(), hexdump::format(key))
            }
            Target::Direct(table, key, Some(slot)) => {
                format!("{}[{}]#{}", table.name(), hexdump::format(key), slot)
            }
        }
    }
}

/// A config port and the reference it is addressed with.
enum Port<'a> {
    Indirect(&'a IndirectMeterStore, u32),
    Direct(&'a DirectMeterTable, DirectMeterRef),
}

impl Port<'_> {
    fn set_rates(&self, params: &MeterParams) -> Result<(), MeterError> {
        match self {
            Port::Indirect(store, index) => store.set_rates(index, params),
            Port::Direct(table, meter) => table.set_rates(meter, params),
        }
    }

    fn read(&self) -> Result<TokenBucketPair, MeterError> {
        match self {
            Port::Indirect(store, index) => store.read(index),
            Port::Direct(table, meter) => table.read(meter),
        }
    }

    fn reset(&self) -> Result<(), MeterError> {
        match self {
            Port::Indirect(store, index) => store.reset(index),
            Port::Direct(table, meter) => table.reset(meter),
        }
    }
}

/// `get` output.
#[derive(Debug, Serialize)]
struct MeterView {
    meter: String,
    configured: bool,
    rates: MeterRates,
    record: TokenBucketPair,
    value: String,
}

/// `execute` output.
#[derive(Debug, Serialize)]
struct ExecuteView {
    meter: String,
    at: u64,
    colors: Vec<Color>,
}

/// Runs one command and returns what should be printed.
pub fn run(args: &Args) -> Result<String> {
    let session = match &args.command {
        Command::Init { force } => Session::create(&args.pipeline, &args.state, *force)?,
        _ => Session::open(&args.pipeline, &args.state)?,
    };
    let output = execute(&session, &args.command)?;
    if args.command.is_mutating() {
        session.save()?;
    }
    Ok(output)
}

/// Applies a command to an open session.
pub fn execute(session: &Session, command: &Command) -> Result<String> {
    let pipeline = session.pipeline();
    match command {
        Command::Init { .. } => {
            let meters = pipeline.meters().count();
            let tables = pipeline.tables().count();
            Ok(format!(
                "Initialized {} indirect meter(s) and {} table(s)",
                meters, tables
            ))
        }
        Command::Update {
            target,
            peak,
            committed,
        } => {
            let target = Target::resolve(pipeline, target)?;
            let params = meter_params(*peak, *committed);
            target
                .port()
                .set_rates(&params)
                .with_context(|| format!("Failed to update {}", target.label()))?;
            info!(
                "Updated {} to {}:{} {}:{}",
                target.label(),
                params.pir,
                params.pbs,
                params.cir,
                params.cbs
            );
            Ok(String::new())
        }
        Command::Get { target } => {
            let target = Target::resolve(pipeline, target)?;
            let record = target
                .port()
                .read()
                .with_context(|| format!("Failed to read {}", target.label()))?;
            let view = MeterView {
                meter: target.label(),
                configured: !record.is_unconfigured(),
                rates: MeterRates::from_record(&record),
                record,
                value: hexdump::format(&record.to_bytes()),
            };
            Ok(serde_json::to_string_pretty(&view)?)
        }
        Command::Reset { target } => {
            let target = Target::resolve(pipeline, target)?;
            target
                .port()
                .reset()
                .with_context(|| format!("Failed to reset {}", target.label()))?;
            info!("Reset {}", target.label());
            Ok(String::new())
        }
        Command::Execute {
            target,
            len,
            at,
            color,
        } => {
            let target = Target::resolve(pipeline, target)?;
            let now = at.unwrap_or_else(|| session.now_ns());
            session.observe(now);
            let colors = match &target {
                Target::Indirect(store, index) => {
                    let pre_color = color.unwrap_or(Color::Green);
                    vec![store.execute_color_aware(*index, *len, now, pre_color)?]
                }
                Target::Direct(table, key, None) if color.is_none() => {
                    table.hit(key, *len, now)?.colors
                }
                Target::Direct(table, key, slot) => {
                    let meter = DirectMeterRef::new(key.clone(), slot.unwrap_or(0));
                    match color {
                        Some(pre_color) => {
                            vec![table.execute_color_aware(&meter, *len, now, *pre_color)?]
                        }
                        None => vec![table.execute(&meter, *len, now)?],
                    }
                }
            };
            let view = ExecuteView {
                meter: target.label(),
                at: now,
                colors,
            };
            Ok(serde_json::to_string_pretty(&view)?)
        }
        Command::EntryUpdate { entry, value } => {
            let table = pipeline.table(&entry.table)?;
            let key = parse_hex("key", &entry.key)?;
            let value = parse_hex("value", value)?;
            table.update_entry(&key, &value)?;
            Ok(String::new())
        }
        Command::EntryGet { entry } => {
            let (table, key) = entry_target(pipeline, entry)?;
            Ok(hexdump::format(&table.entry_value(&key)?))
        }
        Command::EntryDelete { entry } => {
            let (table, key) = entry_target(pipeline, entry)?;
            table.delete_entry(&key)?;
            Ok(String::new())
        }
        Command::Stats => {
            let stats: BTreeMap<&str, MeterStatsSnapshot> = pipeline
                .meters()
                .map(|store| (store.name(), store.stats()))
                .chain(pipeline.tables().map(|table| (table.name(), table.stats())))
                .collect();
            Ok(serde_json::to_string_pretty(&stats)?)
        }
    }
}

fn entry_target<'a>(
    pipeline: &'a Pipeline,
    entry: &EntryTarget,
) -> Result<(&'a DirectMeterTable, Vec<u8>)> {
    let table = pipeline.table(&entry.table)?;
    Ok((table, parse_hex("key", &entry.key)?))
}

fn parse_hex(what: &str, text: &str) -> Result<Vec<u8>> {
    hexdump::parse(text).with_context(|| format!("Invalid hex {} '{}'", what, text))
}
