//! Quartz crystal monitor over a serial line.
//!
//! The controller answers every command with a numeric acknowledgement line
//! (0 = accepted). A frequency check additionally returns the active crystal
//! number and its frequency in Hz.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::acquisition::{Poll, Probe, Reading};
use crate::error::AcqError;
use crate::session::{expect_ack, parse_code, parse_float, Session};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcmCommands {
    /// Starts a test layer; sent once before sampling.
    pub test_layer: String,
    pub check_crystal: String,
    /// Closes the shutter after a clean stop.
    pub shutter_close: String,
    pub ok_code: i64,
}

impl Default for QcmCommands {
    fn default() -> Self {
        Self {
            test_layer: "TL".to_string(),
            check_crystal: "CX".to_string(),
            shutter_close: "SC".to_string(),
            ok_code: 0,
        }
    }
}

pub struct CrystalFrequencyProbe {
    commands: QcmCommands,
    sample_period: Duration,
}

impl CrystalFrequencyProbe {
    pub fn new(commands: QcmCommands, sample_period: Duration) -> Self {
        Self {
            commands,
            sample_period,
        }
    }

    fn command(&self, session: &mut dyn Session, command: &str) -> Result<(), AcqError> {
        let reply = session.query(command)?;
        expect_ack(command, &reply, self.commands.ok_code)
    }
}

impl Probe for CrystalFrequencyProbe {
    fn name(&self) -> &str {
        "quartz crystal monitor"
    }

    fn prepare(&mut self, session: &mut dyn Session) -> Result<(), AcqError> {
        self.command(session, &self.commands.test_layer)?;
        info!("Test layer started");
        Ok(())
    }

    fn poll(&mut self, session: &mut dyn Session) -> Result<Poll, AcqError> {
        let command = self.commands.check_crystal.as_str();
        self.command(session, command)?;
        let crystal = parse_code(command, &session.read_line(command)?)?;
        let frequency = parse_float(command, &session.read_line(command)?)?;
        debug!("Crystal {crystal}: {frequency} Hz");
        Ok(Poll::Ready(Reading::new(frequency)))
    }

    fn finish(&mut self, session: &mut dyn Session) -> Result<(), AcqError> {
        self.command(session, &self.commands.shutter_close)?;
        info!("Shutter closed");
        Ok(())
    }

    fn rearm(&self) -> Duration {
        self.sample_period
    }
}

/// Sauerbrey-style conversion from frequency drift to film thickness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThicknessModel {
    /// Crystal thickness, same unit as the result.
    pub crystal_thickness: f64,
    /// Quartz density in g/cm³.
    pub crystal_density: f64,
    /// Density of the deposited film in g/cm³.
    pub film_density: f64,
}

impl Default for ThicknessModel {
    fn default() -> Self {
        Self {
            crystal_thickness: 0.003,
            crystal_density: 2.65,
            film_density: 1.238,
        }
    }
}

impl ThicknessModel {
    /// `d_i = -(f_i - f_0) * d_q / f_0 * rho_q / rho_film`, relative to the first sample.
    pub fn curve(&self, frequencies: &[f64]) -> Result<Vec<f64>, AcqError> {
        let Some(&f0) = frequencies.first() else {
            return Ok(Vec::new());
        };
        if f0 == 0.0 || !f0.is_finite() {
            return Err(AcqError::Data(format!(
                "reference frequency must be finite and non-zero, got {f0}"
            )));
        }
        if self.film_density <= 0.0 {
            return Err(AcqError::Data(format!(
                "film density must be positive, got {}",
                self.film_density
            )));
        }
        let scale = self.crystal_thickness / f0 * self.crystal_density / self.film_density;
        Ok(frequencies.iter().map(|f| -(f - f0) * scale).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScriptedSession;

    fn probe() -> CrystalFrequencyProbe {
        CrystalFrequencyProbe::new(QcmCommands::default(), Duration::ZERO)
    }

    #[test]
    fn poll_reads_ack_crystal_and_frequency() {
        let mut session = ScriptedSession::new("COM7").replies(["0", "1", "5998765.4"]);
        let transcript = session.transcript();
        let poll = probe().poll(&mut session).unwrap();
        assert_eq!(poll, Poll::Ready(Reading::new(5998765.4)));
        assert_eq!(transcript.lock().writes, vec!["CX"]);
        assert_eq!(transcript.lock().reads, 3);
    }

    #[test]
    fn rejected_check_fails() {
        let mut session = ScriptedSession::new("COM7").reply("2");
        assert!(matches!(
            probe().poll(&mut session),
            Err(AcqError::Rejected { code: 2, .. })
        ));
    }

    #[test]
    fn prepare_and_finish_check_acks() {
        let mut session = ScriptedSession::new("COM7").replies(["0", "0"]);
        let transcript = session.transcript();
        let mut p = probe();
        p.prepare(&mut session).unwrap();
        p.finish(&mut session).unwrap();
        assert_eq!(transcript.lock().writes, vec!["TL", "SC"]);

        let mut session = ScriptedSession::new("COM7").reply("x");
        assert!(matches!(
            p.prepare(&mut session),
            Err(AcqError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn thickness_grows_as_frequency_drops() {
        let model = ThicknessModel {
            crystal_thickness: 0.003,
            crystal_density: 2.65,
            film_density: 2.65,
        };
        let d = model.curve(&[6.0e6, 6.0e6 - 60.0, 6.0e6 - 120.0]).unwrap();
        assert_eq!(d[0], 0.0);
        assert!((d[1] - 3.0e-8).abs() < 1e-15);
        assert!((d[2] - 6.0e-8).abs() < 1e-15);
    }

    #[test]
    fn thickness_edge_cases() {
        let model = ThicknessModel::default();
        assert!(model.curve(&[]).unwrap().is_empty());
        assert!(matches!(model.curve(&[0.0, 1.0]), Err(AcqError::Data(_))));
    }
}
