use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::instruments::{scope, QcmCommands, ScopeCommands, ThicknessModel};
use crate::review::ReviewParams;
use crate::session::{ParitySetting, SerialParams, TcpParams};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub console: ConsoleConfig,
    pub scope: ScopeConfig,
    pub qcm: QcmConfig,
    pub review: ReviewConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scope.validate()?;
        self.qcm.validate()?;
        self.review.validate()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScopeConfig {
    /// VISA-style resource, e.g. `TCPIP::169.254.254.254::INSTR`
    pub address: String,
    /// Prefix of the saved file names; at most six characters
    pub sample_name: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Hold after each save before polling the trigger again
    pub rearm_delay_ms: u64,
    /// Fraction of the timebase range to wait after a trigger
    pub capture_fraction: f64,
    /// Stop after this many saved curves (None = until Ctrl+C)
    pub max_curves: Option<usize>,
    pub commands: ScopeCommands,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            address: "TCPIP::169.254.254.254::INSTR".to_string(),
            sample_name: "sample".to_string(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 10000,
            poll_interval_ms: 50,
            rearm_delay_ms: 2000,
            capture_fraction: 0.6,
            max_curves: None,
            commands: ScopeCommands::default(),
        }
    }
}

impl ScopeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        scope::validate_sample_name(&self.sample_name)
            .map_err(|e| ConfigError::Message(format!("scope.sample_name: {e}")))?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "scope.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=10.0).contains(&self.capture_fraction) {
            return Err(ConfigError::Message(format!(
                "scope.capture_fraction must be within 0..=10, got {}",
                self.capture_fraction
            )));
        }
        Ok(())
    }

    pub fn tcp_params(&self) -> TcpParams {
        TcpParams {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct QcmConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: ParitySetting,
    pub stop_bits: u8,
    pub timeout_ms: u64,
    /// Appended to every command, also the reply delimiter
    pub terminator: String,
    pub sample_name: String,
    pub temperature: String,
    pub duration_secs: u64,
    pub sample_period_ms: u64,
    /// Wait before the measurement starts (substrate heating)
    pub heating_time_secs: u64,
    pub output_dir: String,
    /// Write every sample to a JSONL journal while recording
    pub journal: bool,
    pub thickness: ThicknessModel,
    pub commands: QcmCommands,
}

impl Default for QcmConfig {
    fn default() -> Self {
        Self {
            port: "COM7".to_string(),
            baud_rate: 4800,
            data_bits: 7,
            parity: ParitySetting::Even,
            stop_bits: 2,
            timeout_ms: 10000,
            terminator: "\r".to_string(),
            sample_name: "Sample".to_string(),
            temperature: "100C".to_string(),
            duration_secs: 300,
            sample_period_ms: 1000,
            heating_time_secs: 600,
            output_dir: ".".to_string(),
            journal: true,
            thickness: ThicknessModel::default(),
            commands: QcmCommands::default(),
        }
    }
}

impl QcmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let params = self.serial_params();
        params
            .data_bits()
            .and_then(|_| params.stop_bits())
            .map_err(|e| ConfigError::Message(format!("qcm: {e}")))?;
        if self.terminator.len() != 1 || !self.terminator.is_ascii() {
            return Err(ConfigError::Message(format!(
                "qcm.terminator must be a single ASCII character, got {:?}",
                self.terminator
            )));
        }
        if self.sample_period_ms == 0 {
            return Err(ConfigError::Message(
                "qcm.sample_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.thickness.film_density <= 0.0 {
            return Err(ConfigError::Message(format!(
                "qcm.thickness.film_density must be positive, got {}",
                self.thickness.film_density
            )));
        }
        Ok(())
    }

    pub fn serial_params(&self) -> SerialParams {
        SerialParams {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout: Duration::from_millis(self.timeout_ms),
            write_termination: self.terminator.clone(),
            read_delimiter: self.terminator.bytes().next().unwrap_or(b'\r'),
        }
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Number of samples a full run records.
    pub fn sample_count(&self) -> usize {
        (self.duration_secs * 1000 / self.sample_period_ms.max(1)) as usize
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReviewConfig {
    pub sample_spacing_us: f64,
    /// Distance between consecutive trace indices
    pub trace_step: usize,
    pub setpoint_na: f64,
    pub bias_v: f64,
    pub smoothing_window: usize,
    pub histogram_bins: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            sample_spacing_us: 2160.0,
            trace_step: 2,
            setpoint_na: 0.35,
            bias_v: 0.6,
            smoothing_window: 8,
            histogram_bins: 250,
        }
    }
}

impl ReviewConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_step == 0 {
            return Err(ConfigError::Message(
                "review.trace_step must be greater than zero".to_string(),
            ));
        }
        if self.smoothing_window < 2 {
            return Err(ConfigError::Message(format!(
                "review.smoothing_window must be at least 2, got {}",
                self.smoothing_window
            )));
        }
        if self.bias_v == 0.0 {
            return Err(ConfigError::Message("review.bias_v must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn params(&self) -> ReviewParams {
        ReviewParams {
            sample_spacing_s: self.sample_spacing_us * 1e-6,
            setpoint_a: self.setpoint_na * 1e-9,
            bias_v: self.bias_v,
            smoothing_window: self.smoothing_window,
            histogram_bins: self.histogram_bins,
        }
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults come from serde, then the config file (explicit path or one of
/// the usual names in the working directory), then `RUSTY_ACQ__*` variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        let possible_paths = ["config.toml", "rusty_acq.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    // Environment overrides, e.g. RUSTY_ACQ__QCM__PORT=COM3
    builder = builder.add_source(
        Environment::with_prefix("RUSTY_ACQ")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let app_config = config.try_deserialize::<AppConfig>()?;

    app_config.validate()?;

    Ok(app_config)
}

/// Load configuration, falling back to defaults only when no file was asked for
pub fn load_config_or_default(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            Ok(config)
        }
        Err(e) if config_path.is_some() => Err(e),
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            Ok(AppConfig::default())
        }
    }
}
