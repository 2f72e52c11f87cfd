//! Worker pools draining a shared job conduit.

use std::{error::Error, fmt, io, sync::Arc};

use crate::{CompletionCounter, Consumer, TaskGroup};

impl TaskGroup {
    /// Spawns `workers` threads that all process jobs from `jobs` and enqueue one result per job.
    ///
    /// Every job enqueued before `jobs` is closed is processed by exactly one worker. The returned
    /// results conduit is closed once every worker has exited. Results are produced in completion
    /// order, not in job order.
    ///
    /// `handler` has to implement [`Fn`] (not just [`FnMut`]), because it is shared across all
    /// workers, and may execute several times at once.
    ///
    /// If `handler` panics, the worker running it exits and its job produces no result; the other
    /// workers keep draining `jobs`, the results conduit is still closed, and the panic is
    /// propagated when the [`TaskGroup`] is joined or dropped. Use [`TaskGroup::try_worker_pool`]
    /// to report failed jobs through the results conduit instead.
    ///
    /// # Panics
    ///
    /// This method will panic if `workers` is 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use sluiceway::{conduit, TaskGroup};
    ///
    /// let mut group = TaskGroup::new();
    /// let (jobs, queue) = conduit::unbounded();
    /// let results = group.worker_pool(queue, 3, |job: u32| job * 2).unwrap();
    ///
    /// for job in 1..=9 {
    ///     jobs.send(job).unwrap();
    /// }
    /// drop(jobs);
    ///
    /// let mut results = results.into_iter().collect::<Vec<_>>();
    /// results.sort();
    /// assert_eq!(results, [2, 4, 6, 8, 10, 12, 14, 16, 18]);
    /// group.join();
    /// ```
    pub fn worker_pool<J, R, F>(
        &mut self,
        jobs: Consumer<J>,
        workers: usize,
        handler: F,
    ) -> io::Result<Consumer<R>>
    where
        J: Send + 'static,
        R: Send + 'static,
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        assert_ne!(workers, 0, "worker count must be at least 1");

        let label = self.next_label("pool");
        let (mut results, output) = self.conduit();
        let handler = Arc::new(handler);
        let counter = CompletionCounter::new();
        for i in 0..workers {
            // Registered before the thread exists, so the closer cannot observe zero early.
            let done = counter.enter();
            let jobs = jobs.clone();
            let results = results.share();
            let handler = handler.clone();
            let cancel = self.cancellation().clone();
            self.spawn_labeled(format!("{label}-{i}"), move || {
                // Dropped in reverse order: the results handle goes before the counter is
                // decremented.
                let _done = done;
                let results = results;
                while let Ok(job) = jobs.recv_or_cancelled(&cancel) {
                    let result = handler(job);
                    if results.send_or_cancelled(result, &cancel).is_err() {
                        break;
                    }
                }
            })?;
        }

        self.spawn_labeled(format!("{label}-close"), move || {
            counter.wait();
            results.close();
            log::debug!("worker pool '{label}' finished, results closed");
        })?;

        Ok(output)
    }

    /// Like [`TaskGroup::worker_pool`], but failed jobs are reported instead of dropped.
    ///
    /// `handler` gets each job by reference. A job whose handler returns `Err` is enqueued as
    /// `Err(JobFailed { job, error })`, so every job produces exactly one entry in the results
    /// conduit.
    ///
    /// # Panics
    ///
    /// This method will panic if `workers` is 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use sluiceway::{conduit, TaskGroup};
    ///
    /// let mut group = TaskGroup::new();
    /// let (jobs, queue) = conduit::unbounded();
    /// let results = group
    ///     .try_worker_pool(queue, 2, |job: &&str| job.parse::<u8>())
    ///     .unwrap();
    ///
    /// jobs.send("7").unwrap();
    /// jobs.send("seven").unwrap();
    /// drop(jobs);
    ///
    /// let (ok, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    /// assert_eq!(ok.len(), 1);
    /// assert_eq!(failed[0].as_ref().unwrap_err().job, "seven");
    /// ```
    pub fn try_worker_pool<J, R, E, F>(
        &mut self,
        jobs: Consumer<J>,
        workers: usize,
        handler: F,
    ) -> io::Result<Consumer<Result<R, JobFailed<J, E>>>>
    where
        J: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(&J) -> Result<R, E> + Send + Sync + 'static,
    {
        self.worker_pool(jobs, workers, move |job| {
            handler(&job).map_err(|error| JobFailed { job, error })
        })
    }
}

/// A job whose handler returned an error, together with that error.
///
/// Produced by [`TaskGroup::try_worker_pool`].
#[derive(Clone, PartialEq, Eq)]
pub struct JobFailed<J, E> {
    pub job: J,
    pub error: E,
}

impl<J, E> JobFailed<J, E> {
    /// Returns the job, so that it can be retried.
    pub fn into_job(self) -> J {
        self.job
    }
}

impl<J, E: fmt::Debug> fmt::Debug for JobFailed<J, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFailed")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<J, E: fmt::Display> fmt::Display for JobFailed<J, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job failed: {}", self.error)
    }
}

impl<J, E: Error + 'static> Error for JobFailed<J, E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::{Duration, Instant},
    };

    use crate::conduit;

    use super::*;

    fn silent_panic(payload: String) {
        resume_unwind(Box::new(payload));
    }

    #[test]
    fn every_job_processed_once() {
        const JOBS: u64 = 50;
        for workers in [1, 2, 7, JOBS as usize] {
            let mut group = TaskGroup::builder().name("pool").build();
            let (mut jobs, queue) = conduit::unbounded();
            let results = group
                .worker_pool(queue, workers, |job: u64| (job, job * 10))
                .unwrap();
            for job in 0..JOBS {
                jobs.send(job).unwrap();
            }
            jobs.close();

            let results = results.into_iter().collect::<Vec<_>>();
            assert_eq!(results.len(), JOBS as usize);
            let seen = results
                .iter()
                .map(|&(job, result)| {
                    assert_eq!(result, job * 10);
                    job
                })
                .collect::<HashSet<_>>();
            assert_eq!(seen, (0..JOBS).collect::<HashSet<_>>());
            group.join();
        }
    }

    #[test]
    fn results_close_after_empty_input() {
        let mut group = TaskGroup::new();
        let (jobs, queue) = conduit::unbounded::<u8>();
        let results = group.worker_pool(queue, 4, |job| job).unwrap();
        drop(jobs);
        assert_eq!(results.recv(), Err(conduit::Closed));
        group.join();
    }

    #[test]
    fn workers_run_concurrently() {
        const WORKERS: usize = 4;
        let mut group = TaskGroup::new();
        let (jobs, queue) = conduit::unbounded();
        let started = Arc::new(AtomicUsize::new(0));
        // Each job waits until all of them have started, which only happens if they overlap.
        let results = group
            .worker_pool(queue, WORKERS, move |_: u32| {
                started.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while started.load(Ordering::SeqCst) < WORKERS {
                    if Instant::now() > deadline {
                        return false;
                    }
                    thread::yield_now();
                }
                true
            })
            .unwrap();
        for job in 0..WORKERS as u32 {
            jobs.send(job).unwrap();
        }
        drop(jobs);
        assert!(results.iter().all(|overlapped| overlapped));
        group.join();
    }

    #[test]
    fn panicking_job_is_missing_and_propagated() {
        let mut group = TaskGroup::new();
        let (jobs, queue) = conduit::unbounded();
        let results = group
            .worker_pool(queue, 3, |job: u32| {
                if job == 3 {
                    silent_panic("bad job".into());
                }
                job
            })
            .unwrap();
        for job in 0..10 {
            jobs.send(job).unwrap();
        }
        drop(jobs);

        // The results conduit still closes: the dead worker decremented the counter.
        let mut results = results.into_iter().collect::<Vec<_>>();
        results.sort();
        assert_eq!(results, [0, 1, 2, 4, 5, 6, 7, 8, 9]);
        catch_unwind(AssertUnwindSafe(|| group.join())).unwrap_err();
    }

    #[test]
    fn try_worker_pool_reports_failures() {
        let mut group = TaskGroup::new();
        let (jobs, queue) = conduit::unbounded();
        let results = group
            .try_worker_pool(queue, 2, |job: &i32| {
                if job % 2 == 0 {
                    Ok(job / 2)
                } else {
                    Err(format!("{job} is odd"))
                }
            })
            .unwrap();
        for job in 0..6 {
            jobs.send(job).unwrap();
        }
        drop(jobs);

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(half) => ok.push(half),
                Err(err) => {
                    assert_eq!(err.to_string(), format!("job failed: {} is odd", err.job));
                    failed.push(err.into_job());
                }
            }
        }
        ok.sort();
        failed.sort();
        assert_eq!(ok, [0, 1, 2]);
        assert_eq!(failed, [1, 3, 5]);
        group.join();
    }

    #[test]
    fn drop_stops_workers_with_open_input() {
        let mut group = TaskGroup::builder().capacity(1).build();
        let (jobs, queue) = conduit::unbounded();
        let results = group.worker_pool(queue, 2, |job: u32| job).unwrap();
        for job in 0..10 {
            jobs.send(job).unwrap();
        }
        // Neither the jobs conduit is closed nor the results drained; dropping must not hang.
        drop(group);
        assert!(results.iter().count() <= 10);
    }

    #[test]
    #[should_panic(expected = "worker count must be at least 1")]
    fn zero_workers_panics() {
        let (_jobs, queue) = conduit::unbounded::<()>();
        TaskGroup::new().worker_pool(queue, 0, |job| job).ok();
    }
}
