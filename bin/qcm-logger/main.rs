use clap::Parser;
use log::{error, info, warn};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusty_acq::config::{load_config_or_default, QcmConfig};
use rusty_acq::console::{initialize_logging, ring_bell, setup_shutdown_handler};
use rusty_acq::session::open_serial;
use rusty_acq::utils::{run_stamp, sleep_unless_cancelled};
use rusty_acq::{
    plot_series, write_run_csv, AcqError, AcquisitionLoop, ColumnNames, CrystalFrequencyProbe,
    Journal, ProgressMeter, RunOutcome, RunResult, RunSettings, Sample, StopWhen,
};

/// Extra time allowed on top of the nominal duration before the run is cut off
const DURATION_MARGIN: Duration = Duration::from_secs(30);

/// Quartz crystal monitor logger
#[derive(Parser, Debug)]
#[command(name = "qcm-logger")]
#[command(about = "Record crystal frequency and derive film thickness", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Serial port of the monitor, e.g. COM7 or /dev/ttyUSB0
    #[arg(short, long)]
    port: Option<String>,

    /// Sample name used in the output file name
    #[arg(short, long)]
    sample: Option<String>,

    /// Substrate temperature label used in the output file name
    #[arg(short, long)]
    temperature: Option<String>,

    /// Measurement duration in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Heating time in seconds before the measurement starts
    #[arg(long)]
    heating: Option<u64>,

    /// Skip the terminal plots
    #[arg(long)]
    no_plot: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config_or_default(args.config.as_deref())?;

    let log_level = args.log_level.clone().unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level);

    apply_overrides(&mut config.qcm, &args);
    config.qcm.validate()?;
    let qcm = config.qcm;
    log_qcm_config(&qcm);

    let shutdown_flag = setup_shutdown_handler()?;

    if qcm.heating_time_secs > 0 {
        info!("Heating for {} s, press Ctrl+C to abort", qcm.heating_time_secs);
        match sleep_unless_cancelled(Duration::from_secs(qcm.heating_time_secs), &shutdown_flag) {
            Ok(()) => ring_bell(1),
            Err(AcqError::Cancelled) => {
                info!("Stopped during heating, nothing recorded");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let session = open_serial(&qcm.port, &qcm.serial_params())?;
    let probe = CrystalFrequencyProbe::new(qcm.commands.clone(), qcm.sample_period());

    let total = qcm.sample_count();
    let stop = StopWhen::new()
        .cancelled_by(shutdown_flag.clone())
        .max_samples(total)
        .after(Duration::from_secs(qcm.duration_secs) + DURATION_MARGIN);

    let settings = RunSettings {
        run_id: run_stamp(),
        ..Default::default()
    };
    let base_name = format!("{}_{}_{}", qcm.sample_name, qcm.temperature, settings.run_id);
    let output_dir = PathBuf::from(&qcm.output_dir);
    std::fs::create_dir_all(&output_dir)?;

    let mut journal = qcm
        .journal
        .then(|| Journal::<Sample>::new(output_dir.join(&base_name), 10));
    let mut meter = ProgressMeter::new(total);
    let mut recorded = 0;

    info!("Recording {total} samples, press Ctrl+C to stop early");
    let mut acquisition = AcquisitionLoop::new(probe, settings);
    let result = acquisition.run(session, stop, |sample| {
        recorded += 1;
        if let Some(percent) = meter.observe(recorded) {
            info!("{percent}% complete ({recorded}/{total}), f = {} Hz", sample.value);
        }
        if let Some(journal) = journal.as_mut() {
            if let Err(e) = journal.add(sample.clone()) {
                warn!("Journal write failed: {e}");
            }
        }
    });

    if let Some(mut journal) = journal {
        journal.flush()?;
    }

    // Partial runs are still worth keeping
    if let Err(e) = save_and_show(&result, &qcm, &output_dir, &base_name, args.no_plot) {
        error!("Could not save the recording: {e}");
        return Err(e.into());
    }
    ring_bell(3);

    match result.outcome {
        RunOutcome::Completed(reason) => {
            info!("✓ Recording completed ({reason:?})");
            Ok(())
        }
        RunOutcome::Cancelled => {
            info!("✓ Recording stopped by user");
            Ok(())
        }
        RunOutcome::Failed(e) => {
            error!("✗ Recording failed: {e}");
            Err(e.into())
        }
    }
}

fn save_and_show(
    result: &RunResult,
    qcm: &QcmConfig,
    output_dir: &Path,
    base_name: &str,
    no_plot: bool,
) -> Result<(), AcqError> {
    if result.samples.is_empty() {
        warn!("No samples recorded, nothing to save");
        return Ok(());
    }

    let frequencies = result.values();
    let thickness = qcm.thickness.curve(&frequencies)?;
    let path = write_run_csv(
        output_dir.join(format!("{base_name}.csv")),
        result,
        &thickness,
        &ColumnNames::new("Time", "Frequency", "Thickness"),
    )?;
    info!("Saved {} samples to {}", result.samples.len(), path.display());

    if !no_plot {
        let times = result.times();
        plot_series(&times, &frequencies, "Crystal frequency", "Hz")?;
        plot_series(&times, &thickness, "Film thickness", "m")?;
    }
    Ok(())
}

fn apply_overrides(qcm: &mut QcmConfig, args: &Args) {
    if let Some(port) = &args.port {
        qcm.port = port.clone();
    }
    if let Some(sample) = &args.sample {
        qcm.sample_name = sample.clone();
    }
    if let Some(temperature) = &args.temperature {
        qcm.temperature = temperature.clone();
    }
    if let Some(duration) = args.duration {
        qcm.duration_secs = duration;
    }
    if let Some(heating) = args.heating {
        qcm.heating_time_secs = heating;
    }
}

fn log_qcm_config(qcm: &QcmConfig) {
    info!("=== QCM Logger ===");
    info!(
        "Port: {} ({} baud, {} data bits, {:?} parity, {} stop bits)",
        qcm.port, qcm.baud_rate, qcm.data_bits, qcm.parity, qcm.stop_bits
    );
    info!("Sample: {} at {}", qcm.sample_name, qcm.temperature);
    info!(
        "Duration: {} s, one sample every {} ms",
        qcm.duration_secs, qcm.sample_period_ms
    );
    info!(
        "Thickness model: d_q = {} m, rho_q = {}, rho_film = {}",
        qcm.thickness.crystal_thickness, qcm.thickness.crystal_density, qcm.thickness.film_density
    );
}
