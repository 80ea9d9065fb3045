use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::error::AcqError;

/// Granularity of cancellable waits.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Local timestamp in the `yyMMdd_HHmmss` form used for run ids and file names.
pub fn run_stamp() -> String {
    Local::now().format("%y%m%d_%H%M%S").to_string()
}

/// Sleep for `duration`, waking early with `Err(Cancelled)` once `cancel` is set.
///
/// # Example
/// ```
/// use std::sync::atomic::AtomicBool;
/// use std::time::Duration;
/// use rusty_acq::utils::sleep_unless_cancelled;
///
/// let cancel = AtomicBool::new(false);
/// sleep_unless_cancelled(Duration::from_millis(10), &cancel).unwrap();
/// ```
pub fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) -> Result<(), AcqError> {
    let start = Instant::now();
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(AcqError::Cancelled);
        }
        let elapsed = start.elapsed();
        if elapsed >= duration {
            return Ok(());
        }
        std::thread::sleep((duration - elapsed).min(WAIT_SLICE));
    }
}

/// Fill `{name}` placeholders of a device command template.
pub fn format_command(template: &str, vars: &[(&str, &str)]) -> Result<String, AcqError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    strfmt::strfmt(template, &vars)
        .map_err(|e| AcqError::Config(format!("bad command template {template:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_has_expected_shape() {
        let stamp = run_stamp();
        assert_eq!(stamp.len(), 13);
        assert_eq!(&stamp[6..7], "_");
    }

    #[test]
    fn sleep_returns_cancelled_when_flag_set() {
        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        let result = sleep_unless_cancelled(Duration::from_secs(5), &cancel);
        assert!(matches!(result, Err(AcqError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_cancel() {
        let cancel = AtomicBool::new(false);
        assert!(sleep_unless_cancelled(Duration::from_millis(20), &cancel).is_ok());
    }

    #[test]
    fn formats_command_templates() {
        let cmd = format_command("SAVE:FILename '{name}'", &[("name", "sample_240101_120000")])
            .unwrap();
        assert_eq!(cmd, "SAVE:FILename 'sample_240101_120000'");
    }

    #[test]
    fn unknown_placeholder_is_config_error() {
        let err = format_command("SAVE:FILename '{file}'", &[("name", "x")]).unwrap_err();
        assert!(matches!(err, AcqError::Config(_)));
    }
}
