//! Progress reporting for long running passes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait CanReportProgress {
    /// Fraction of the work done, in `[0, 1]`.
    fn progress(&self) -> f64;
    fn is_finished(&self) -> bool;
}

pub trait CanReportProgressAndStage: CanReportProgress {
    fn stage(&self) -> String;
}

/// Shared count of processed items out of a known total.
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    done: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    total: u64,
}

impl ProgressCounter {
    pub fn new(total: u64) -> Self {
        ProgressCounter {
            done: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
            total,
        }
    }

    pub fn inc(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl CanReportProgress for ProgressCounter {
    fn progress(&self) -> f64 {
        if self.is_finished() {
            1.0
        } else if self.total == 0 {
            0.0
        } else {
            (self.done() as f64 / self.total as f64).min(1.0)
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

struct StageState {
    stage: String,
    progress: f64,
    finished: bool,
    delegate: Option<Box<dyn CanReportProgress + Send>>,
}

/// Named stage with a progress value, either set directly or taken from a delegate.
/// Clones share the same state.
#[derive(Clone)]
pub struct ProgressAndStage {
    state: Arc<Mutex<StageState>>,
}

impl ProgressAndStage {
    pub fn new(stage: &str) -> Self {
        ProgressAndStage {
            state: Arc::new(Mutex::new(StageState {
                stage: stage.to_string(),
                progress: 0.0,
                finished: false,
                delegate: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_stage(&self, stage: &str) {
        let mut state = self.lock();
        state.stage = stage.to_string();
        state.progress = 0.0;
    }

    pub fn set_progress(&self, progress: f64) {
        self.lock().progress = progress;
    }

    /// Report the progress of `delegate` under `stage` until the next delegation.
    pub fn delegate(&self, stage: &str, delegate: impl CanReportProgress + Send + 'static) {
        let mut state = self.lock();
        state.stage = stage.to_string();
        state.delegate = Some(Box::new(delegate));
    }

    pub fn finish(&self) {
        let mut state = self.lock();
        state.delegate = None;
        state.progress = 1.0;
        state.finished = true;
    }
}

impl CanReportProgress for ProgressAndStage {
    fn progress(&self) -> f64 {
        let state = self.lock();
        match &state.delegate {
            Some(delegate) => delegate.progress(),
            None => state.progress,
        }
    }

    fn is_finished(&self) -> bool {
        self.lock().finished
    }
}

impl CanReportProgressAndStage for ProgressAndStage {
    fn stage(&self) -> String {
        self.lock().stage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = ProgressCounter::new(4);
        assert_eq!(counter.progress(), 0.0);
        counter.inc();
        assert_eq!(counter.clone().progress(), 0.25);
        counter.finish();
        assert!(counter.is_finished());
        assert_eq!(counter.progress(), 1.0);
    }

    #[test]
    fn test_delegation() {
        let ps = ProgressAndStage::new("Initialization");
        let counter = ProgressCounter::new(2);
        ps.delegate("Reading", counter.clone());
        counter.inc();
        assert_eq!(ps.stage(), "Reading");
        assert_eq!(ps.progress(), 0.5);

        let inner = ProgressAndStage::new("Sorting");
        ps.delegate("Writing", inner.clone());
        inner.set_progress(0.75);
        assert_eq!(ps.progress(), 0.75);

        ps.finish();
        assert!(ps.is_finished());
        assert_eq!(ps.progress(), 1.0);
    }
}
