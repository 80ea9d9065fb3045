use clap::Parser;
use log::{error, info, warn};
use std::{path::PathBuf, time::Duration};

use rusty_acq::config::{load_config_or_default, ScopeConfig};
use rusty_acq::console::{initialize_logging, setup_shutdown_handler};
use rusty_acq::session::open_tcp;
use rusty_acq::utils::run_stamp;
use rusty_acq::{
    AcquisitionLoop, Journal, RunOutcome, RunSettings, Sample, StopWhen, TriggerSaveProbe,
};

/// Save every oscilloscope trigger to the scope's USB drive
#[derive(Parser, Debug)]
#[command(name = "scope-autosave")]
#[command(about = "Poll an oscilloscope for triggers and save each waveform", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Sample name used as file prefix (at most 6 characters)
    #[arg(short, long)]
    sample: Option<String>,

    /// Instrument resource, e.g. TCPIP::169.254.254.254::INSTR
    #[arg(short, long)]
    address: Option<String>,

    /// Stop after this many saved curves
    #[arg(short = 'n', long)]
    max_curves: Option<usize>,

    /// Directory for the run journal (no journal when omitted)
    #[arg(long, value_name = "DIR")]
    journal_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config_or_default(args.config.as_deref())?;

    let log_level = args.log_level.clone().unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level);

    apply_overrides(&mut config.scope, &args);
    config.scope.validate()?;
    log_scope_config(&config.scope);

    let shutdown_flag = setup_shutdown_handler()?;

    let probe = TriggerSaveProbe::new(
        config.scope.commands.clone(),
        config.scope.sample_name.clone(),
        config.scope.capture_fraction,
        Duration::from_millis(config.scope.rearm_delay_ms),
    )?;
    let session = open_tcp(&config.scope.address, &config.scope.tcp_params())?;

    let mut stop = StopWhen::new().cancelled_by(shutdown_flag);
    if let Some(n) = config.scope.max_curves {
        stop = stop.max_samples(n);
    }

    let settings = RunSettings {
        run_id: run_stamp(),
        poll_interval: Duration::from_millis(config.scope.poll_interval_ms),
    };

    if let Some(dir) = &args.journal_dir {
        std::fs::create_dir_all(dir)?;
    }
    let mut journal = args
        .journal_dir
        .as_ref()
        .map(|dir| Journal::<Sample>::new(dir.join(format!("scope_{}", settings.run_id)), 1));

    info!("Waiting for triggers, press Ctrl+C to stop");
    let mut acquisition = AcquisitionLoop::new(probe, settings);
    let result = acquisition.run(session, stop, |sample| {
        if let Some(journal) = journal.as_mut() {
            if let Err(e) = journal.add(sample.clone()) {
                warn!("Journal write failed: {e}");
            }
        }
    });

    if let Some(mut journal) = journal {
        journal.flush()?;
        info!("Journal written to {}", journal.path().display());
    }

    match result.outcome {
        RunOutcome::Completed(reason) => {
            info!("✓ Saved {} curves ({reason:?})", result.samples.len());
            Ok(())
        }
        RunOutcome::Cancelled => {
            info!("✓ Stopped by user after {} curves", result.samples.len());
            Ok(())
        }
        RunOutcome::Failed(e) => {
            error!("✗ Autosave failed after {} curves: {e}", result.samples.len());
            Err(e.into())
        }
    }
}

fn apply_overrides(scope: &mut ScopeConfig, args: &Args) {
    if let Some(sample) = &args.sample {
        scope.sample_name = sample.clone();
    }
    if let Some(address) = &args.address {
        scope.address = address.clone();
    }
    if args.max_curves.is_some() {
        scope.max_curves = args.max_curves;
    }
}

fn log_scope_config(scope: &ScopeConfig) {
    info!("=== Oscilloscope Autosave ===");
    info!("Instrument: {}", scope.address);
    info!("Sample name: {}", scope.sample_name);
    info!(
        "Capture wait: {:.0}% of the timebase range, re-arm after {} ms",
        scope.capture_fraction * 100.0,
        scope.rearm_delay_ms
    );
    match scope.max_curves {
        Some(n) => info!("Stopping after {n} curves"),
        None => info!("Running until stopped"),
    }
}
