pub mod qcm;
pub mod scope;

pub use qcm::{CrystalFrequencyProbe, QcmCommands, ThicknessModel};
pub use scope::{ScopeCommands, TriggerSaveProbe};
