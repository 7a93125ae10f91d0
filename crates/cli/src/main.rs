//! Trace-harness CLI.
//!
//! Boots a machine from a JSON config, single-steps it emitting commit
//! records, and optionally saves a snapshot on exit:
//!
//! ```text
//! rvcosim [--load snap] [--save snap] [--maxinsns N] [--memory_size MiB]
//!         [--terminate-event NAME] [--trace N] [--dasm] config.json
//! ```

use clap::Parser;
use rvcosim_core::config::{validation_event_names, CliOverrides, MachineConfig};
use rvcosim_core::sim::trace;
use rvcosim_core::soc::{machine::MachineBuilder, snapshot};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "rvcosim",
    version,
    about = "RISC-V RV64GC functional emulator / cosim golden model",
    long_about = "Boots an unmodified RV64GC software image and emits one commit record per \
                  retired instruction. The same machine backs the cosim C API."
)]
struct Cli {
    /// Machine config (JSON).
    config: PathBuf,

    /// Resume from a previously saved snapshot.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Save a snapshot upon exit.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Terminate after this many retired instructions (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    maxinsns: u64,

    /// Memory size in MiB (overrides the config).
    #[arg(long)]
    memory_size: Option<u64>,

    /// Validation event that terminates execution.
    #[arg(long = "terminate-event")]
    terminate_event: Option<String>,

    /// Suppress the first N commit records.
    #[arg(long, default_value_t = 0)]
    trace: u64,

    /// Render mnemonics inline instead of DASM() literals.
    #[arg(long)]
    dasm: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(ev) = &cli.terminate_event {
        if rvcosim_core::config::validation_event_value(ev).is_none() {
            eprintln!(
                "unknown terminate event {ev:?}; recognized: {}",
                validation_event_names().join(", ")
            );
            return ExitCode::FAILURE;
        }
    }

    let overrides = CliOverrides {
        load: cli.load.clone(),
        save: cli.save.clone(),
        maxinsns: (cli.maxinsns != 0).then_some(cli.maxinsns),
        memory_size: cli.memory_size,
        terminate_event: cli.terminate_event.clone(),
        trace: Some(cli.trace),
    };

    let mut cfg = match MachineConfig::from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    cfg.apply_overrides(&overrides);

    let mut machine = match MachineBuilder::new(cfg).require_boot_image().build() {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(snap) = &overrides.load {
        if let Err(err) = snapshot::load(&mut machine, snap) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }
    if let Some(n) = overrides.maxinsns {
        machine.maxinsns = n;
    }

    let mut out = std::io::stdout();
    let retired = trace::run(&mut machine, &mut out, cli.trace, cli.dasm);
    tracing::info!(retired, "run finished");

    if let Some(snap) = &overrides.save {
        if let Err(err) = snapshot::save(&mut machine, snap) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
