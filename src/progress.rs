//! Progress-callback trait for job state transitions.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::JobConfigBuilder::progress_callback`] to observe an
//! invocation as it moves through [`JobState`]s. The pipeline also logs every
//! transition through `tracing`; the callback exists for callers that need
//! the events programmatically (a terminal spinner, a status table, tests
//! asserting on ordering).
//!
//! # Example
//!
//! ```rust
//! use pdf2tiff::{JobConfig, JobProgressCallback, JobState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl JobProgressCallback for PageCounter {
//!     fn on_page_published(&self, _source: &str, _index: usize, _object: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = JobConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::JobError;
use crate::job::JobState;
use crate::output::JobReport;
use std::sync::Arc;

/// Called by the orchestrator as an invocation progresses.
///
/// Invocations for different sources run concurrently, so implementations
/// must be `Send + Sync` and protect shared state themselves. Within one
/// invocation, calls arrive strictly in order. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// Called on every state transition, including `Failed` and `Done`.
    fn on_state_change(&self, source: &str, state: &JobState) {
        let _ = (source, state);
    }

    /// Called after page `index` (1-based) is stored as `object`.
    fn on_page_published(&self, source: &str, index: usize, object: &str) {
        let _ = (source, index, object);
    }

    /// Called once after a successful invocation, after cleanup.
    fn on_job_complete(&self, report: &JobReport) {
        let _ = report;
    }

    /// Called once after a failed invocation, after cleanup.
    fn on_job_failed(&self, source: &str, error: &JobError) {
        let _ = (source, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::JobConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<JobState>>,
    }

    impl JobProgressCallback for Recorder {
        fn on_state_change(&self, _source: &str, state: &JobState) {
            self.states.lock().unwrap().push(*state);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_state_change("a.pdf", &JobState::Staged);
        cb.on_page_published("a.pdf", 1, "a_page_1.tiff");
        cb.on_job_failed("a.pdf", &JobError::Timeout { secs: 1 });
    }

    #[test]
    fn arc_dyn_callback_records_states() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_state_change("a.pdf", &JobState::Staged);
        cb.on_state_change("a.pdf", &JobState::Publishing(1));
        assert_eq!(
            *rec.states.lock().unwrap(),
            vec![JobState::Staged, JobState::Publishing(1)]
        );
    }
}
