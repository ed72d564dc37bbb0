//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to observe a run
//! as it happens. The CLI uses this to drive its progress bar.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2md::{BatchConfig, BatchProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, key: &str, _output: Option<&Path>) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}: {key}");
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::BatchSummary;
use crate::plan::{Plan, SkipReason};
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each file.
///
/// With `concurrency > 1` the per-file methods are called from several
/// blocking threads at once; implementations synchronise their own state.
/// Every method defaults to a no-op.
pub trait BatchProgressCallback: Send + Sync {
    /// Once, after discovery.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Work is about to start on `key`.
    fn on_file_start(&self, key: &str, plan: Plan) {
        let _ = (key, plan);
    }

    /// `key` needed no work.
    fn on_file_skipped(&self, key: &str, reason: SkipReason) {
        let _ = (key, reason);
    }

    /// `key` converted; `output` is the Markdown written.
    fn on_file_complete(&self, key: &str, output: Option<&Path>) {
        let _ = (key, output);
    }

    /// `key` failed or faulted. The batch continues.
    fn on_file_error(&self, key: &str, error: &str) {
        let _ = (key, error);
    }

    /// Once, after cleanup.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Shared callback handle stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ConvertReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        started: AtomicUsize,
        skipped: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }

    impl BatchProgressCallback for Tracking {
        fn on_batch_start(&self, total_files: usize) {
            self.total.store(total_files, Ordering::SeqCst);
        }
        fn on_file_start(&self, _key: &str, _plan: Plan) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_file_skipped(&self, _key: &str, _reason: SkipReason) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
        fn on_file_complete(&self, _key: &str, _output: Option<&Path>) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_file_error(&self, _key: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(2);
        cb.on_file_start("a.pdf", Plan::Convert(ConvertReason::New));
        cb.on_file_skipped("b.pdf", SkipReason::UpToDate);
        cb.on_file_complete("a.pdf", Some(Path::new("md/a.md")));
        cb.on_file_error("c.pdf", "boom");
        cb.on_batch_complete(&BatchSummary::default());
    }

    #[test]
    fn tracking_callback_counts_events() {
        let t = Tracking::default();
        t.on_batch_start(3);
        t.on_file_start("a.pdf", Plan::Convert(ConvertReason::New));
        t.on_file_complete("a.pdf", None);
        t.on_file_skipped("b.pdf", SkipReason::UpToDate);
        t.on_file_start("c.docx", Plan::ParseOnly);
        t.on_file_error("c.docx", "parser fault");

        assert_eq!(t.total.load(Ordering::SeqCst), 3);
        assert_eq!(t.started.load(Ordering::SeqCst), 2);
        assert_eq!(t.completed.load(Ordering::SeqCst), 1);
        assert_eq!(t.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
    }
}
