use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of a run, handed to the stop condition once per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Completed device exchanges so far.
    pub iteration: usize,
    pub samples: usize,
    pub elapsed: Duration,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    DurationElapsed,
    SampleLimit,
    IterationLimit,
    /// The probe reported a terminal device status.
    DeviceFinished,
    Cancelled,
}

/// Predicate evaluated at every iteration boundary.
pub trait StopCondition {
    fn check(&mut self, progress: &Progress) -> Option<StopReason>;
}

impl<F> StopCondition for F
where
    F: FnMut(&Progress) -> Option<StopReason>,
{
    fn check(&mut self, progress: &Progress) -> Option<StopReason> {
        self(progress)
    }
}

/// Composite stop condition: the first criterion that trips wins.
///
/// Cancellation is checked first so an operator stop is never reported as
/// a duration or sample limit.
#[derive(Debug, Clone, Default)]
pub struct StopWhen {
    cancel: Option<Arc<AtomicBool>>,
    duration: Option<Duration>,
    max_samples: Option<usize>,
    max_iterations: Option<usize>,
}

impl StopWhen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelled_by(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn after(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn max_samples(mut self, n: usize) -> Self {
        self.max_samples = Some(n);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }
}

impl StopCondition for StopWhen {
    fn check(&mut self, progress: &Progress) -> Option<StopReason> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Some(StopReason::Cancelled);
        }
        if self.max_samples.is_some_and(|n| progress.samples >= n) {
            return Some(StopReason::SampleLimit);
        }
        if self.max_iterations.is_some_and(|n| progress.iteration >= n) {
            return Some(StopReason::IterationLimit);
        }
        if self.duration.is_some_and(|d| progress.elapsed >= d) {
            return Some(StopReason::DurationElapsed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(iteration: usize, samples: usize, secs: u64) -> Progress {
        Progress {
            iteration,
            samples,
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn empty_condition_never_stops() {
        let mut stop = StopWhen::new();
        assert_eq!(stop.check(&progress(1_000, 1_000, 1_000)), None);
    }

    #[test]
    fn cancellation_wins_over_limits() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut stop = StopWhen::new().cancelled_by(flag).max_samples(0);
        assert_eq!(stop.check(&progress(0, 0, 0)), Some(StopReason::Cancelled));
    }

    #[test]
    fn limits_trip_in_order() {
        let mut stop = StopWhen::new()
            .after(Duration::from_secs(10))
            .max_samples(3)
            .max_iterations(5);
        assert_eq!(stop.check(&progress(2, 2, 1)), None);
        assert_eq!(stop.check(&progress(3, 3, 1)), Some(StopReason::SampleLimit));
        assert_eq!(stop.check(&progress(5, 0, 1)), Some(StopReason::IterationLimit));
        assert_eq!(
            stop.check(&progress(1, 0, 10)),
            Some(StopReason::DurationElapsed)
        );
    }

    #[test]
    fn closures_are_stop_conditions() {
        let mut stop = |p: &Progress| (p.iteration >= 2).then_some(StopReason::IterationLimit);
        assert_eq!(stop.check(&progress(1, 0, 0)), None);
        assert_eq!(stop.check(&progress(2, 0, 0)), Some(StopReason::IterationLimit));
    }
}
