//! Operator tool for PSA two-rate three-color meters.
//!
//! `meterctl` loads a pipeline description, restores meter state from a
//! JSON state file, applies one command and writes the state back. The
//! binary is a thin wrapper over [`commands::run`].

pub mod cli;
pub mod clock;
pub mod commands;
pub mod state;

pub use cli::{Args, Command};
pub use clock::MonotonicClock;
pub use commands::run;
pub use state::{load_description, Session, StateFile};

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
