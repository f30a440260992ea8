//! meterctl - configure and exercise PSA two-rate three-color meters

use std::process::ExitCode;

use clap::Parser;
use psabpf_meterctl::{init_logging, run, Args};
use tracing::{debug, error};

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    debug!("Pipeline: {}", args.pipeline.display());
    debug!("State: {}", args.state.display());

    match run(&args) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
