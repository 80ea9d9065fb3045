//! Oscilloscope autosave: wait for a trigger, then let the scope write the
//! captured waveform to its USB stick under a timestamped name.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::acquisition::{Poll, Probe, Reading};
use crate::error::AcqError;
use crate::session::{parse_code, parse_float, Session};
use crate::utils::{format_command, run_stamp};

/// Longest sample name the scope's file system accepts with the timestamp suffix.
pub const MAX_SAMPLE_NAME_LEN: usize = 6;

/// SCPI command set used by the autosave probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeCommands {
    pub identify: String,
    /// Written once, in order, before polling starts.
    pub setup: Vec<String>,
    /// Trigger event register; non-zero means a new acquisition.
    pub trigger_query: String,
    /// Returns the full-screen time range in seconds.
    pub timebase_query: String,
    /// Template with a `{name}` placeholder.
    pub save_filename: String,
    pub save_start: String,
}

impl Default for ScopeCommands {
    fn default() -> Self {
        Self {
            identify: "*IDN?".to_string(),
            setup: vec![
                "SAVE:PWD '/usb0/'".to_string(),
                ":SAVE:WAVeform:FORMat CSV".to_string(),
                ":SAVE:WAVeform:LENGth 1000".to_string(),
                ":SAVE:WAVeform:SEGMented CURR".to_string(),
            ],
            trigger_query: ":TER?".to_string(),
            timebase_query: ":TIMebase:RANGe?".to_string(),
            save_filename: "SAVE:FILename '{name}'".to_string(),
            save_start: ":SAVE:WAVeform:STARt".to_string(),
        }
    }
}

pub struct TriggerSaveProbe {
    commands: ScopeCommands,
    sample_name: String,
    /// Fraction of the timebase range to wait before saving, so the
    /// post-trigger part of the record is complete.
    capture_fraction: f64,
    rearm: Duration,
    curves: usize,
    /// Stamp of the previous save and how many saves already used it.
    last_stamp: String,
    same_stamp: usize,
}

impl TriggerSaveProbe {
    pub fn new(
        commands: ScopeCommands,
        sample_name: impl Into<String>,
        capture_fraction: f64,
        rearm: Duration,
    ) -> Result<Self, AcqError> {
        let sample_name = sample_name.into();
        validate_sample_name(&sample_name)?;
        if !(0.0..=10.0).contains(&capture_fraction) {
            return Err(AcqError::Config(format!(
                "capture_fraction must be within 0..=10, got {capture_fraction}"
            )));
        }
        Ok(Self {
            commands,
            sample_name,
            capture_fraction,
            rearm,
            curves: 0,
            last_stamp: String::new(),
            same_stamp: 0,
        })
    }

    /// Curves saved so far.
    pub fn curves(&self) -> usize {
        self.curves
    }

    fn capture_wait(&self, session: &mut dyn Session) -> Result<Duration, AcqError> {
        let command = &self.commands.timebase_query;
        let range = parse_float(command, &session.query(command)?)?;
        Duration::try_from_secs_f64(range * self.capture_fraction)
            .map_err(|_| AcqError::malformed(command, range.to_string()))
    }

    /// `{sample}_{stamp}`, with `_{n}` appended when several saves share one
    /// second so the scope never overwrites a waveform.
    fn next_file_name(&mut self, stamp: String) -> String {
        if stamp == self.last_stamp {
            self.same_stamp += 1;
            format!("{}_{}_{}", self.sample_name, stamp, self.same_stamp)
        } else {
            let name = format!("{}_{}", self.sample_name, stamp);
            self.last_stamp = stamp;
            self.same_stamp = 0;
            name
        }
    }

    fn save(&mut self, session: &mut dyn Session) -> Result<String, AcqError> {
        let name = self.next_file_name(run_stamp());
        session.write(&format_command(
            &self.commands.save_filename,
            &[("name", name.as_str())],
        )?)?;
        session.write(&self.commands.save_start)?;
        Ok(name)
    }
}

pub fn validate_sample_name(name: &str) -> Result<(), AcqError> {
    if name.is_empty() || name.chars().count() > MAX_SAMPLE_NAME_LEN {
        return Err(AcqError::Config(format!(
            "sample name must have 1 to {MAX_SAMPLE_NAME_LEN} characters, got {name:?}"
        )));
    }
    if name.contains(['\'', '"', '/', '\\']) {
        return Err(AcqError::Config(format!(
            "sample name contains a quote or path separator: {name:?}"
        )));
    }
    Ok(())
}

impl Probe for TriggerSaveProbe {
    fn name(&self) -> &str {
        "oscilloscope autosave"
    }

    fn prepare(&mut self, session: &mut dyn Session) -> Result<(), AcqError> {
        let idn = session.query(&self.commands.identify)?;
        info!("Instrument: {idn}");
        for command in &self.commands.setup {
            session.write(command)?;
        }
        info!("Save settings applied, waiting for triggers");
        Ok(())
    }

    fn poll(&mut self, session: &mut dyn Session) -> Result<Poll, AcqError> {
        let command = &self.commands.trigger_query;
        let triggered = parse_code(command, &session.query(command)?)? != 0;
        if !triggered {
            return Ok(Poll::Pending);
        }

        info!("Oscilloscope has triggered");
        let wait = self.capture_wait(session)?;
        debug!("Waiting {wait:?} for the capture to complete");
        std::thread::sleep(wait);

        let name = self.save(session)?;
        self.curves += 1;
        info!("File {name} saved to USB");
        info!("Measured curves: {}", self.curves);
        Ok(Poll::Ready(Reading::new(self.curves as f64).with_note(name)))
    }

    fn rearm(&self) -> Duration {
        self.rearm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScriptedSession;

    fn probe() -> TriggerSaveProbe {
        TriggerSaveProbe::new(ScopeCommands::default(), "bj01", 0.6, Duration::ZERO).unwrap()
    }

    #[test]
    fn prepare_writes_setup_in_order() {
        let mut session = ScriptedSession::new("scope").reply("AGILENT,DSO-X 3034A,0,1");
        let transcript = session.transcript();
        probe().prepare(&mut session).unwrap();
        let writes = transcript.lock().writes.clone();
        assert_eq!(writes[0], "*IDN?");
        assert_eq!(&writes[1..], ScopeCommands::default().setup.as_slice());
    }

    #[test]
    fn untriggered_poll_is_pending() {
        let mut session = ScriptedSession::new("scope").reply("0");
        assert_eq!(probe().poll(&mut session).unwrap(), Poll::Pending);
    }

    #[test]
    fn trigger_saves_named_waveform() {
        let mut session = ScriptedSession::new("scope").replies(["+1", "1e-4"]);
        let transcript = session.transcript();
        let mut p = probe();

        let Poll::Ready(reading) = p.poll(&mut session).unwrap() else {
            panic!("expected a reading");
        };
        assert_eq!(reading.value, 1.0);
        let name = reading.note.unwrap();
        assert!(name.starts_with("bj01_"));

        let writes = transcript.lock().writes.clone();
        assert_eq!(
            writes,
            vec![
                ":TER?".to_string(),
                ":TIMebase:RANGe?".to_string(),
                format!("SAVE:FILename '{name}'"),
                ":SAVE:WAVeform:STARt".to_string(),
            ]
        );
        assert_eq!(p.curves(), 1);
    }

    #[test]
    fn saves_within_one_second_get_distinct_names() {
        let mut p = probe();
        let a = p.next_file_name("261019_144522".to_string());
        let b = p.next_file_name("261019_144522".to_string());
        let c = p.next_file_name("261019_144523".to_string());
        assert_eq!(a, "bj01_261019_144522");
        assert_eq!(b, "bj01_261019_144522_1");
        assert_eq!(c, "bj01_261019_144523");

        let mut session = ScriptedSession::new("scope").replies(["1", "0", "1", "0"]);
        let mut p = TriggerSaveProbe::new(ScopeCommands::default(), "bj01", 0.0, Duration::ZERO)
            .unwrap();
        let mut names = Vec::new();
        for _ in 0..2 {
            if let Poll::Ready(reading) = p.poll(&mut session).unwrap() {
                names.push(reading.note.unwrap());
            }
        }
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn negative_timebase_is_malformed() {
        let mut session = ScriptedSession::new("scope").replies(["1", "-0.5"]);
        assert!(matches!(
            probe().poll(&mut session),
            Err(AcqError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn sample_name_is_limited() {
        assert!(validate_sample_name("sample").is_ok());
        assert!(validate_sample_name("sample7").is_err());
        assert!(validate_sample_name("").is_err());
        assert!(validate_sample_name("a'b").is_err());
    }
}
