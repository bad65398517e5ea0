use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tracing::debug;

/// Cooperative stop signal shared between a caller and a running
/// computation. Checked at the start of every partition.
#[derive(Clone, Debug, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Terminated)` once `terminate` was called.
    pub fn assert_running(&self) -> crate::Result<()> {
        if self.is_terminated() {
            Err(crate::Error::Terminated)
        } else {
            Ok(())
        }
    }
}

/// Progress of a task with known volume, logged in 10% steps.
#[derive(Debug)]
pub struct ProgressTracker {
    task: &'static str,
    volume: u64,
    progress: AtomicU64,
    logged_step: AtomicU64,
}

impl ProgressTracker {
    pub fn new(task: &'static str, volume: u64) -> Self {
        Self {
            task,
            volume,
            progress: AtomicU64::new(0),
            logged_step: AtomicU64::new(0),
        }
    }

    pub fn log_progress(&self, amount: u64) {
        let progress = self.progress.fetch_add(amount, Ordering::Relaxed) + amount;
        metrics::counter!(format!("simknn.{}.progress", self.task)).increment(amount);
        if self.volume == 0 {
            return;
        }
        let step = (progress.min(self.volume) * 10) / self.volume;
        let logged = self.logged_step.fetch_max(step, Ordering::Relaxed);
        if step > logged {
            debug!("{} {}%", self.task, step * 10);
        }
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }
}
