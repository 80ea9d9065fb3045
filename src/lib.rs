pub mod acquisition;
pub mod config;
pub mod console;
pub mod error;
pub mod export;
pub mod instruments;
pub mod journal;
pub mod plotting;
pub mod review;
pub mod session;
pub mod utils;

pub use acquisition::{
    AcquisitionLoop, Poll, Probe, ProgressMeter, Reading, RunOutcome, RunResult, RunSettings,
    Sample, StopCondition, StopReason, StopWhen,
};
pub use config::{load_config, load_config_or_default, AppConfig};
pub use error::AcqError;
pub use export::{write_run_csv, ColumnNames};
pub use instruments::{
    CrystalFrequencyProbe, QcmCommands, ScopeCommands, ThicknessModel, TriggerSaveProbe,
};
pub use journal::Journal;
pub use plotting::{plot_histogram, plot_series};
pub use review::{ReviewCommand, TracePager, TraceView};
pub use session::{open_serial, open_tcp, ScriptedSession, Session};
