//! Progress events of the batch drivers.
//!
//! The drivers never print; callers that want a progress bar or a log line
//! pass a [`ProgressReporter`] wrapping a callback.

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Report a task of `total_steps` units, run `f`, and close the task.
    pub fn task<T>(&self, total_steps: u64, f: impl FnOnce() -> T) -> T {
        self.report(Progress::TaskStart { total_steps });
        let out = f();
        self.report(Progress::TaskFinish);
        out
    }
}

impl std::fmt::Debug for ProgressReporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_events_reach_callback() {
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| {
            events.lock().unwrap().push(e);
        }));
        reporter.report(Progress::PhaseStart { name: "Grid search" });
        let value = reporter.task(2, || {
            reporter.report(Progress::TaskIncrement);
            reporter.report(Progress::TaskIncrement);
            7
        });
        reporter.report(Progress::PhaseFinish);
        drop(reporter);

        assert_eq!(value, 7);
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(events[1], Progress::TaskStart { total_steps: 2 });
        assert_eq!(events[4], Progress::TaskFinish);
    }

    #[test]
    fn test_silent_reporter() {
        ProgressReporter::new().report(Progress::Message("ignored".to_string()));
    }
}
