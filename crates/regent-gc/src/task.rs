//! Background task pool.
//!
//! A fixed set of threads fed by a channel. Marking and sweeping tasks are
//! posted here and may overlap with the mutator; parallel pause work uses
//! [`run_parallel`], where the calling thread acts as worker 0.

use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

use crate::tracing::{gc_debug, gc_warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Get the number of CPUs available for parallel collection.
#[must_use]
pub fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Process-wide pool of GC worker threads.
pub(crate) struct Taskpool {
    sender: Sender<Job>,
    threads: usize,
}

static GLOBAL: OnceLock<Taskpool> = OnceLock::new();

impl Taskpool {
    /// The shared pool, started on first use.
    pub(crate) fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::start(available_parallelism().clamp(2, 16)))
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn start(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        for i in 0..threads {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("regent-gc-{i}"))
                .spawn(move || {
                    for job in &receiver {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            gc_warn!("gc task panicked");
                        }
                    }
                });
            if let Err(err) = spawned {
                gc_warn!(error = %err, "failed to spawn gc worker");
            }
        }
        gc_debug!(threads, "gc task pool started");
        Self { sender, threads }
    }

    /// Number of pool threads.
    pub(crate) const fn threads(&self) -> usize {
        self.threads
    }

    /// Queues `job`. Runs it inline if the pool is gone.
    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.sender.send(Box::new(job)) {
            (err.into_inner())();
        }
    }
}

/// Counts outstanding tasks so a thread can wait for all of them.
#[derive(Default)]
pub(crate) struct TaskGroup {
    pending: Mutex<usize>,
    done: Condvar,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, n: usize) {
        *self.pending.lock() += n;
    }

    /// Marks one task finished. Returns true for the last one.
    pub(crate) fn finish(&self) -> bool {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "task group underflow");
        *pending = pending.saturating_sub(1);
        let last = *pending == 0;
        if last {
            self.done.notify_all();
        }
        last
    }

    pub(crate) fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.done.wait(&mut pending);
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        *self.pending.lock() == 0
    }
}

/// Finishes a group slot even if the task unwinds.
struct FinishOnDrop<'a>(&'a TaskGroup);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Runs `f(host, id)` for `id` in `0..workers`, worker 0 on this thread, and
/// waits for all of them.
pub(crate) fn run_parallel<H, F>(host: &Arc<H>, workers: usize, f: F)
where
    H: Send + Sync + 'static,
    F: Fn(&H, usize) + Send + Sync + 'static,
{
    let workers = workers.clamp(1, Taskpool::global().threads() + 1);
    if workers == 1 {
        f(host, 0);
        return;
    }
    let f = Arc::new(f);
    let group = Arc::new(TaskGroup::new());
    group.add(workers - 1);
    for id in 1..workers {
        let host = Arc::clone(host);
        let f = Arc::clone(&f);
        let group = Arc::clone(&group);
        Taskpool::global().post(move || {
            let _finish = FinishOnDrop(&group);
            f(&host, id);
        });
    }
    f(host, 0);
    group.wait();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_run_parallel_visits_every_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        run_parallel(&seen, 3, |seen, id| seen.lock().push(id));
        let mut ids = seen.lock().clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_task_group_waits_for_posted_jobs() {
        let group = Arc::new(TaskGroup::new());
        let counter = Arc::new(AtomicUsize::new(0));
        group.add(4);
        for _ in 0..4 {
            let group = Arc::clone(&group);
            let counter = Arc::clone(&counter);
            Taskpool::global().post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                group.finish();
            });
        }
        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(group.is_idle());
    }
}
