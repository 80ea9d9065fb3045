/// Reports completion in 10% steps for runs with a known sample count.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    total: usize,
    reported: usize,
}

impl ProgressMeter {
    pub fn new(total: usize) -> Self {
        Self { total, reported: 0 }
    }

    /// Returns the newest percentage step crossed by `done`, if any.
    pub fn observe(&mut self, done: usize) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let decile = (done.min(self.total) * 10) / self.total;
        if decile > self.reported {
            self.reported = decile;
            Some(decile * 10)
        } else {
            None
        }
    }
}
