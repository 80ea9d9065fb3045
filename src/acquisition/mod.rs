//! The instrument polling loop.
//!
//! A run walks `IDLE -> POLLING -> (SAMPLING -> POLLING)* -> STOPPED`:
//! the stop condition is checked at every iteration boundary, then one status
//! exchange is made through the [`Probe`]. A ready measurement is appended as a
//! [`Sample`]; otherwise the loop sleeps for the poll interval. Any device or
//! parse error stops the run immediately, keeping the samples collected so far.

pub mod progress;
pub mod stop;

pub use progress::ProgressMeter;
pub use stop::{Progress, StopCondition, StopReason, StopWhen};

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::AcqError;
use crate::session::Session;

/// One measurement, timestamped relative to the run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the run started. Strictly increasing within a run.
    pub elapsed_s: f64,
    pub timestamp: DateTime<Local>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A value produced by a probe when the device has a measurement ready.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub note: Option<String>,
}

impl Reading {
    pub fn new(value: f64) -> Self {
        Self { value, note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of one status exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// Nothing new; sleep and ask again.
    Pending,
    Ready(Reading),
    /// The device reports it is done.
    Finished,
}

/// Device-specific half of the loop: what a status exchange means.
pub trait Probe {
    fn name(&self) -> &str;

    /// One-time setup before polling starts.
    fn prepare(&mut self, _session: &mut dyn Session) -> Result<(), AcqError> {
        Ok(())
    }

    /// Exactly one status exchange, plus the fetch when a value is ready.
    fn poll(&mut self, session: &mut dyn Session) -> Result<Poll, AcqError>;

    /// Called after a clean stop (completed or cancelled), before close.
    fn finish(&mut self, _session: &mut dyn Session) -> Result<(), AcqError> {
        Ok(())
    }

    /// Hold time after a sample before the next poll.
    fn rearm(&self) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(StopReason),
    Cancelled,
    Failed(AcqError),
}

/// Immutable output of one run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub samples: Vec<Sample>,
    pub outcome: RunOutcome,
    /// Device exchanges performed by the polling phase.
    pub iterations: usize,
}

impl RunResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, RunOutcome::Cancelled)
    }

    pub fn error(&self) -> Option<&AcqError> {
        match &self.outcome {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.elapsed_s).collect()
    }
}

/// Append-only sample sequence with strictly increasing timestamps.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<Sample>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, elapsed: Duration, reading: Reading) -> &Sample {
        let mut elapsed_s = elapsed.as_secs_f64();
        if let Some(last) = self.samples.last() {
            // Clock granularity can make two reads identical
            if elapsed_s <= last.elapsed_s {
                elapsed_s = last.elapsed_s + 1e-9;
            }
        }
        self.samples.push(Sample {
            elapsed_s,
            timestamp: Local::now(),
            value: reading.value,
            note: reading.note,
        });
        &self.samples[self.samples.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run_id: String,
    /// Sleep between status checks when nothing is ready.
    pub poll_interval: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_id: crate::utils::run_stamp(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

pub struct AcquisitionLoop<P: Probe> {
    probe: P,
    settings: RunSettings,
}

impl<P: Probe> AcquisitionLoop<P> {
    pub fn new(probe: P, settings: RunSettings) -> Self {
        Self { probe, settings }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn into_probe(self) -> P {
        self.probe
    }

    /// Run to completion. The session is closed on every exit path.
    pub fn run<S, C, F>(&mut self, mut session: S, mut stop: C, mut on_sample: F) -> RunResult
    where
        S: Session,
        C: StopCondition,
        F: FnMut(&Sample),
    {
        let started_at = Local::now();
        let clock = Instant::now();
        let mut log = SampleLog::new();
        let mut iterations = 0;

        info!(
            "Run {} started: {} on {} (poll every {:?})",
            self.settings.run_id,
            self.probe.name(),
            session.address(),
            self.settings.poll_interval
        );

        let mut outcome = match self.probe.prepare(&mut session) {
            Ok(()) => self.poll_until_stopped(
                &mut session,
                &mut stop,
                &mut on_sample,
                &mut log,
                &mut iterations,
                clock,
            ),
            Err(e) => {
                error!("Preparing {} failed: {e}", self.probe.name());
                RunOutcome::Failed(e)
            }
        };

        if !matches!(outcome, RunOutcome::Failed(_)) {
            if let Err(e) = self.probe.finish(&mut session) {
                error!("Finishing {} failed: {e}", self.probe.name());
                outcome = RunOutcome::Failed(e);
            }
        }

        if let Err(e) = session.close() {
            warn!("Closing {} failed: {e}", session.address());
        }

        match &outcome {
            RunOutcome::Completed(reason) => info!(
                "Run {} completed ({reason:?}) with {} samples",
                self.settings.run_id,
                log.len()
            ),
            RunOutcome::Cancelled => info!(
                "Run {} cancelled, keeping {} samples",
                self.settings.run_id,
                log.len()
            ),
            RunOutcome::Failed(e) => error!(
                "Run {} failed after {} samples: {e}",
                self.settings.run_id,
                log.len()
            ),
        }

        RunResult {
            run_id: self.settings.run_id.clone(),
            started_at,
            samples: log.into_samples(),
            outcome,
            iterations,
        }
    }

    fn poll_until_stopped<C, F>(
        &mut self,
        session: &mut dyn Session,
        stop: &mut C,
        on_sample: &mut F,
        log: &mut SampleLog,
        iterations: &mut usize,
        clock: Instant,
    ) -> RunOutcome
    where
        C: StopCondition,
        F: FnMut(&Sample),
    {
        loop {
            let progress = Progress {
                iteration: *iterations,
                samples: log.len(),
                elapsed: clock.elapsed(),
            };
            match stop.check(&progress) {
                Some(StopReason::Cancelled) => return RunOutcome::Cancelled,
                Some(reason) => return RunOutcome::Completed(reason),
                None => {}
            }

            *iterations += 1;
            match self.probe.poll(session) {
                Ok(Poll::Pending) => std::thread::sleep(self.settings.poll_interval),
                Ok(Poll::Ready(reading)) => {
                    let sample = log.push(clock.elapsed(), reading);
                    debug!(
                        "Sample {}: {} @ {:.3}s",
                        log_index(sample, *iterations),
                        sample.value,
                        sample.elapsed_s
                    );
                    on_sample(sample);
                    let hold = self.probe.rearm();
                    if !hold.is_zero() {
                        std::thread::sleep(hold);
                    }
                }
                Ok(Poll::Finished) => return RunOutcome::Completed(StopReason::DeviceFinished),
                Err(e) => return RunOutcome::Failed(e),
            }
        }
    }
}

fn log_index(sample: &Sample, iteration: usize) -> String {
    match &sample.note {
        Some(note) => format!("#{iteration} ({note})"),
        None => format!("#{iteration}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{parse_code, ScriptedSession};

    /// Reports a sample whenever the device answers a non-zero code.
    struct FlagProbe;

    impl Probe for FlagProbe {
        fn name(&self) -> &str {
            "flag"
        }

        fn poll(&mut self, session: &mut dyn Session) -> Result<Poll, AcqError> {
            let reply = session.query("FLAG?")?;
            match parse_code("FLAG?", &reply)? {
                0 => Ok(Poll::Pending),
                -1 => Ok(Poll::Finished),
                v => Ok(Poll::Ready(Reading::new(v as f64))),
            }
        }
    }

    fn fast() -> RunSettings {
        RunSettings {
            run_id: "test".to_string(),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn sample_log_forces_strictly_increasing_times() {
        let mut log = SampleLog::new();
        log.push(Duration::from_millis(5), Reading::new(1.0));
        log.push(Duration::from_millis(5), Reading::new(2.0));
        log.push(Duration::from_millis(1), Reading::new(3.0));
        let samples = log.into_samples();
        assert!(samples.windows(2).all(|w| w[0].elapsed_s < w[1].elapsed_s));
    }

    #[test]
    fn device_finished_stops_run() {
        let session = ScriptedSession::new("stub").replies(["2", "-1", "7"]);
        let mut acq = AcquisitionLoop::new(FlagProbe, fast());
        let result = acq.run(session, StopWhen::new(), |_| {});
        assert!(matches!(
            result.outcome,
            RunOutcome::Completed(StopReason::DeviceFinished)
        ));
        assert_eq!(result.values(), vec![2.0]);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn session_closed_on_failure() {
        let session = ScriptedSession::new("stub").reply("garbage");
        let transcript = session.transcript();
        let mut acq = AcquisitionLoop::new(FlagProbe, fast());
        let result = acq.run(session, StopWhen::new(), |_| {});
        assert!(result.is_failed());
        assert!(transcript.lock().closed);
    }

    #[test]
    fn on_sample_sees_every_sample() {
        let session = ScriptedSession::new("stub").replies(["1", "0", "2", "3"]);
        let mut seen = Vec::new();
        let mut acq = AcquisitionLoop::new(FlagProbe, fast());
        let result = acq.run(session, StopWhen::new().max_samples(3), |s| {
            seen.push(s.value)
        });
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);
        assert_eq!(result.values(), seen);
    }
}
