use clap::Parser;
use log::{error, info};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use ndarray::Array2;
use rusty_acq::config::load_config_or_default;
use rusty_acq::console::initialize_logging;
use rusty_acq::review::{load_table, ReviewParams};
use rusty_acq::{plot_histogram, plot_series, AcqError, ReviewCommand, TracePager, TraceView};

/// Page through recorded I(t) traces
#[derive(Parser, Debug)]
#[command(name = "it-review")]
#[command(about = "Review I(t) traces and conductance histograms", long_about = None)]
struct Args {
    /// Trace table: column i+1 holds the current of trace i
    #[arg(value_name = "TABLE")]
    table: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// First trace to show
    #[arg(short, long, default_value_t = 0)]
    start: usize,
}

const HELP: &str = "\
  n / Enter   next trace
  p           previous trace
  g <index>   go to trace
  s           mark current trace
  i <nA>      set the current setpoint
  b <V>       set the bias voltage
  q           quit";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config_or_default(args.config.as_deref())?;

    let log_level = args.log_level.clone().unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level);

    let table = load_table(&args.table)?;
    let mut params = config.review.params();
    let mut pager = TracePager::new(table.ncols(), config.review.trace_step)?;
    if args.start != 0 {
        pager.goto(args.start)?;
    }
    info!(
        "Traces 0..={} in steps of {}, enter h for help",
        pager.last_index(),
        config.review.trace_step
    );

    if let Err(e) = show(&table, pager.index(), &params) {
        error!("Trace {}: {e}", pager.index());
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("[{}] > ", pager.index());
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let command = match line?.parse::<ReviewCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        let index = match command {
            ReviewCommand::Next => pager.next(),
            ReviewCommand::Previous => pager.previous(),
            ReviewCommand::Goto(index) => match pager.goto(index) {
                Ok(index) => index,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            },
            ReviewCommand::Save => {
                let index = pager.save();
                info!("Marked trace {index}");
                continue;
            }
            ReviewCommand::Setpoint(na) => {
                params.setpoint_a = na * 1e-9;
                pager.index()
            }
            ReviewCommand::Bias(volts) => {
                params.bias_v = volts;
                pager.index()
            }
            ReviewCommand::Help => {
                println!("{HELP}");
                continue;
            }
            ReviewCommand::Quit => break,
        };

        if let Err(e) = show(&table, index, &params) {
            error!("Trace {index}: {e}");
        }
    }

    println!("Marked traces: {:?}", pager.saved());
    Ok(())
}

fn show(table: &Array2<f64>, index: usize, params: &ReviewParams) -> Result<(), AcqError> {
    let view = TraceView::compute(table, index, params)?;
    println!(
        "=== Trace {} | setpoint {:.3} nA | bias {} V ===",
        view.index,
        params.setpoint_a * 1e9,
        params.bias_v
    );
    plot_series(&view.times, &view.currents, "Current", "A")?;
    plot_series(&view.times, &view.smoothed, "Current (smoothed)", "A")?;
    plot_histogram(&view.current_histogram, "Current histogram", "A")?;
    plot_histogram(&view.conductance_histogram, "Conductance histogram", "G0")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_acq::review::parse_table;

    #[test]
    fn short_trace_is_reported_not_fatal() {
        // Fewer rows than the default smoothing window
        let table = parse_table("0 1e-9\n1 2e-9\n2 3e-9\n").unwrap();
        let params = ReviewParams::default();
        assert!(matches!(show(&table, 0, &params), Err(AcqError::Data(_))));
    }
}
