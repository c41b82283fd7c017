//! Observer trait for pipeline lifecycle events.
//!
//! Pass an [`Arc<dyn PipelineObserver>`] to
//! [`crate::coordinator::PipelineManager::start`] to be told when the
//! pipeline becomes busy or idle and when jobs and merges finish.
//!
//! Every method is called from the control task, one event at a time, in
//! the order the events happen. Keep implementations quick; a slow observer
//! delays every job's bookkeeping.
//!
//! # Example
//!
//! ```rust
//! use docbundle::{JobId, PipelineObserver, StageError};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct FailureCounter(AtomicUsize);
//!
//! impl PipelineObserver for FailureCounter {
//!     fn on_job_failed(&self, job: JobId, error: &StageError) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{job}: {error}");
//!     }
//! }
//! ```

use crate::artifact::{ArtifactRecord, Bundle};
use crate::error::StageError;
use crate::job::{JobId, JobState};
use std::sync::Arc;

/// Receives pipeline events. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// The in-flight count left zero (`true`) or returned to it (`false`).
    fn on_busy_changed(&self, busy: bool) {
        let _ = busy;
    }

    /// A job was created (`Idle`) or moved to a new state.
    fn on_job_state_changed(&self, job: JobId, file_name: &str, state: JobState) {
        let _ = (job, file_name, state);
    }

    /// A job published its artifact.
    fn on_job_complete(&self, artifact: &ArtifactRecord) {
        let _ = artifact;
    }

    /// A job failed. Called exactly once per failed job.
    fn on_job_failed(&self, job: JobId, error: &StageError) {
        let _ = (job, error);
    }

    fn on_merge_complete(&self, bundle: &Bundle) {
        let _ = bundle;
    }

    fn on_merge_failed(&self, error: &StageError) {
        let _ = error;
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// The observer type the manager stores.
pub type SharedObserver = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        busy_flips: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_busy_changed(&self, _busy: bool) {
            self.busy_flips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_failed(&self, _job: JobId, _error: &StageError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_accepts_everything() {
        let o: SharedObserver = Arc::new(NoopObserver);
        o.on_busy_changed(true);
        o.on_job_state_changed(JobId(1), "a.pdf", JobState::Reading);
        o.on_job_failed(JobId(1), &StageError::decode("a.pdf", "bad"));
        o.on_merge_failed(&StageError::merge("a.pdf", "bad"));
    }

    #[test]
    fn overridden_methods_are_called() {
        let o = Counting::default();
        o.on_busy_changed(true);
        o.on_busy_changed(false);
        o.on_job_failed(JobId(2), &StageError::decode("b.tif", "bad"));
        o.on_job_state_changed(JobId(2), "b.tif", JobState::Failed);
        assert_eq!(o.busy_flips.load(Ordering::SeqCst), 2);
        assert_eq!(o.failures.load(Ordering::SeqCst), 1);
    }
}
