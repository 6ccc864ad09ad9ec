//! Job execution.
//!
//! Every graph root registers as a named job.  `run_jobs` gives each root its
//! own worker thread; handlers in a chain execute synchronously on their
//! root's thread (push model).  The first failing job cancels the shared
//! token and the sync-point queue, the remaining roots wind down at their
//! next payload boundary, and the first error is returned after every thread
//! has been joined.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::OriginHandler;
use vessel_media::sync_point_queue::SyncPointQueue;

/// A named root handler registered with the job manager.
#[derive(Clone)]
pub struct Job {
    pub name: String,
    pub root: Arc<dyn OriginHandler>,
}

pub struct JobManager {
    jobs: Mutex<Vec<Job>>,
    cancel: CancellationToken,
    sync_points: Option<Arc<SyncPointQueue>>,
}

impl JobManager {
    pub fn new(sync_points: Option<Arc<SyncPointQueue>>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            sync_points,
        }
    }

    /// The shared cue source, if ad cues are configured.
    pub fn sync_points(&self) -> Option<Arc<SyncPointQueue>> {
        self.sync_points.clone()
    }

    pub fn add(&self, name: &str, root: Arc<dyn OriginHandler>) {
        debug!(job = name, "Registered job");
        self.jobs.lock().unwrap().push(Job {
            name: name.to_string(),
            root,
        });
    }

    /// Registered job names, in registration order.
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|j| j.name.clone()).collect()
    }

    /// Initialize every root (and transitively its graph), leaves reached
    /// depth-first.  No data flows yet.
    pub fn initialize_jobs(&self) -> Result<()> {
        let jobs = self.jobs.lock().unwrap().clone();
        for job in &jobs {
            job.root.initialize()?;
        }
        Ok(())
    }

    /// Run all jobs to completion.  Blocks; returns the first job error, or
    /// `Cancelled` when the run was cancelled from outside.
    pub fn run_jobs(&self) -> Result<()> {
        let jobs = self.jobs.lock().unwrap().clone();
        if jobs.is_empty() {
            debug!("No jobs registered; nothing to run");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .build()
            .map_err(|e| PackagerError::Internal(format!("Failed to build job runtime: {e}")))?;

        runtime.block_on(async {
            let mut tasks = JoinSet::new();
            for job in jobs {
                let cancel = self.cancel.clone();
                tasks.spawn_blocking(move || {
                    let result = job.root.run(&cancel);
                    (job.name, result)
                });
            }

            // ── Collect results: shutdown barrier ──
            let mut first_error: Option<PackagerError> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => {
                        debug!(job = %name, "Job finished");
                    }
                    Ok((name, Err(e))) => {
                        if e.is_cancellation() {
                            info!(job = %name, "Job cancelled");
                        } else {
                            error!(job = %name, %e, "Job failed");
                        }
                        self.signal_cancel();
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(join_err) => {
                        error!(%join_err, "Job panicked");
                        self.signal_cancel();
                        if first_error.is_none() {
                            first_error = Some(PackagerError::Internal(format!(
                                "Job panicked: {join_err}"
                            )));
                        }
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    /// Asynchronously signal all running roots to stop.  Partially written
    /// output is not rolled back.
    pub fn cancel_jobs(&self) {
        info!("Cancelling all jobs");
        self.signal_cancel();
    }

    fn signal_cancel(&self) {
        self.cancel.cancel();
        if let Some(queue) = &self.sync_points {
            queue.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vessel_core::handler::{MediaHandler, StreamData};

    struct FakeRoot {
        fail: bool,
        ran: AtomicBool,
        saw_cancel: AtomicBool,
    }

    impl FakeRoot {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                ran: AtomicBool::new(false),
                saw_cancel: AtomicBool::new(false),
            })
        }
    }

    impl MediaHandler for FakeRoot {
        fn name(&self) -> &'static str {
            "fake_root"
        }
        fn connect(&self, _d: Arc<dyn MediaHandler>) -> Result<()> {
            unreachable!()
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn handle(&self, _data: StreamData) -> Result<()> {
            unreachable!()
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    impl OriginHandler for FakeRoot {
        fn run(&self, cancel: &CancellationToken) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(PackagerError::ParserFailure("boom".into()));
            }
            // Wait a moment so a failing sibling can cancel us.
            for _ in 0..100 {
                if cancel.is_cancelled() {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    return Err(PackagerError::Cancelled);
                }
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Ok(())
        }
    }

    #[test]
    fn all_jobs_run_and_success_is_ok() {
        let manager = JobManager::new(None);
        let a = FakeRoot::new(false);
        manager.add("job a", a.clone());
        manager.initialize_jobs().unwrap();
        manager.run_jobs().expect("run ok");
        assert!(a.ran.load(Ordering::SeqCst));
        assert_eq!(manager.job_names(), vec!["job a"]);
    }

    #[test]
    fn first_error_cancels_the_other_jobs() {
        let manager = JobManager::new(None);
        let failing = FakeRoot::new(true);
        let healthy = FakeRoot::new(false);
        manager.add("failing", failing);
        manager.add("healthy", healthy.clone());

        let err = manager.run_jobs().expect_err("must fail");
        assert!(matches!(err, PackagerError::ParserFailure(_)));
        assert!(healthy.saw_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_before_run_surfaces_as_cancelled() {
        let manager = JobManager::new(None);
        manager.add("job", FakeRoot::new(false));
        manager.cancel_jobs();
        let err = manager.run_jobs().expect_err("cancelled");
        assert!(err.is_cancellation());
    }

    #[test]
    fn empty_job_set_runs_to_completion() {
        let manager = JobManager::new(None);
        manager.run_jobs().expect("nothing to do");
    }
}
