//! Coarse-grained progress reporting for the slower loading phases.

/// Receives a percentage in `0..=100`. Called synchronously from the loading code, so
/// implementations should be quick.
pub trait ProgressSink {
    fn report(&mut self, percent: u32);
}

impl<F: FnMut(u32)> ProgressSink for F {
    fn report(&mut self, percent: u32) {
        self(percent);
    }
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u32) {}
}

/// Maps the progress of individual steps onto one overall percentage and only forwards changes.
pub(crate) struct PercentTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    last_reported: Option<u32>,
    step_start: u32,
    step_end: u32,
}

impl<'a> PercentTracker<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        let mut tracker = Self {
            sink,
            last_reported: None,
            step_start: 0,
            step_end: 100,
        };
        tracker.set(0);
        tracker
    }

    /// Subsequent calls to `update` report within `start..=end` of the overall range.
    pub(crate) fn begin_step(&mut self, start: u32, end: u32) {
        debug_assert!(start <= end && end <= 100);
        self.step_start = start;
        self.step_end = end;
        self.set(start);
    }

    pub(crate) fn update(&mut self, done: usize, total: usize) {
        let fraction = if total == 0 {
            1.0
        } else {
            done.min(total) as f64 / total as f64
        };
        let span = f64::from(self.step_end - self.step_start);
        self.set(self.step_start + (span * fraction) as u32);
    }

    pub(crate) fn finish(&mut self) {
        self.set(100);
    }

    fn set(&mut self, percent: u32) {
        let percent = percent.min(100);
        if self.last_reported != Some(percent) {
            self.last_reported = Some(percent);
            self.sink.report(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_changes_are_reported() {
        let mut seen = Vec::new();
        let mut sink = |percent: u32| seen.push(percent);
        {
            let mut tracker = PercentTracker::new(&mut sink);
            tracker.begin_step(0, 50);
            tracker.update(0, 4);
            tracker.update(2, 4);
            tracker.update(2, 4);
            tracker.update(4, 4);
            tracker.begin_step(50, 100);
            tracker.update(0, 0);
            tracker.finish();
        }
        assert_eq!(seen, vec![0, 25, 50, 100]);
    }
}
