//! Bounded-concurrency pool over MRF URLs.
//!
//! One scoped thread per URL, gated by a counting semaphore so at most
//! `workers` pipelines run at once. Each thread owns its slot in the result
//! vector, so fan-in needs no locking and the output order always matches
//! the input order.

use rateline_core::cancel::CancelToken;
use rateline_core::progress::{ProgressSink, Tracker as _};
use rateline_core::semaphore::Semaphore;

use crate::config::SearchConfig;
use crate::pipeline::{file_name_from_url, run_pipeline, PipelineError, PipelineResult};
use crate::types::NpiSet;

/// Concurrent processor for a list of MRF URLs.
pub struct Pool<'a> {
    pub target: &'a NpiSet,
    pub config: &'a SearchConfig,
    pub progress: &'a dyn ProgressSink,
}

impl Pool<'_> {
    /// Process all URLs and return one result per URL, in input order.
    ///
    /// A cancelled run still returns a full-length vector: pipelines that
    /// never started carry a `Cancelled` error.
    pub fn run(&self, urls: &[String], cancel: &CancelToken) -> Vec<PipelineResult> {
        let sem = Semaphore::new(self.config.workers.max(1));
        let total = urls.len();
        let mut results: Vec<PipelineResult> =
            urls.iter().map(|u| PipelineResult::pending(u)).collect();

        std::thread::scope(|s| {
            for (index, (slot, url)) in results.iter_mut().zip(urls).enumerate() {
                let sem = &sem;
                let progress = self.progress;
                let target = self.target;
                let config = self.config;
                s.spawn(move || {
                    // Block for a permit; bail out if cancellation wins.
                    let Some(_permit) = sem.acquire_or_cancel(cancel) else {
                        slot.err = Some(PipelineError::Cancelled);
                        return;
                    };

                    let tracker = progress.tracker(index, total, file_name_from_url(url));
                    *slot = run_pipeline(url, target, config, tracker.clone(), cancel);
                    tracker.done();
                });
            }
        });

        results
    }
}
