use env_logger::Env;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::AcqError;

/// Initialize logging with configurable level
pub fn initialize_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

/// Flag raised by Ctrl+C. Acquisition loops stop at their next check.
pub fn setup_shutdown_handler() -> Result<Arc<AtomicBool>, AcqError> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received - stopping after the current exchange...");
        shutdown_flag_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| AcqError::Config(format!("Error setting Ctrl+C handler: {e}")))?;

    Ok(shutdown_flag)
}

/// Terminal bell, rung `times` times.
pub fn ring_bell(times: usize) {
    let mut out = std::io::stdout();
    for _ in 0..times {
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}
