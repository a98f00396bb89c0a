//! The shared collector thread.
//!
//! Shared collections never run on a mutator thread: runtimes post a [`Job`]
//! and, when they need the result, block on the acknowledgement channel as
//! parked mutators.

use std::sync::Weak;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};

use super::SharedHeapCore;
use crate::error::{HeapError, Result};
use crate::gc::state::{GcReason, TriggerGcType};
use crate::tracing::{gc_debug, gc_warn};

/// Work item for the daemon.
pub(crate) struct Job {
    pub(crate) trigger: TriggerGcType,
    pub(crate) reason: GcReason,
    /// Signalled once the collection is done.
    pub(crate) done: Option<Sender<()>>,
}

pub(crate) struct Daemon {
    sender: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Daemon {
    pub(crate) fn spawn(heap: Weak<SharedHeapCore>) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let thread = thread::Builder::new()
            .name("regent-shared-gc".to_owned())
            .spawn(move || run(&heap, &receiver))
            .map_err(HeapError::DaemonSpawn)?;
        Ok(Self {
            sender: Some(sender),
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }

    /// Queues `job`. Gives it back if the daemon is gone.
    pub(crate) fn post(&self, job: Job) -> std::result::Result<(), Job> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|err| err.into_inner()),
            None => Err(job),
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // Disconnecting the channel ends the loop.
        self.sender.take();
        if self.is_current() {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                gc_warn!("shared collector thread panicked");
            }
        }
    }
}

fn run(heap: &Weak<SharedHeapCore>, jobs: &Receiver<Job>) {
    gc_debug!("shared collector started");
    while let Ok(job) = jobs.recv() {
        let Some(core) = heap.upgrade() else {
            break;
        };
        core.collect_now(job.trigger, job.reason);
        if let Some(done) = job.done {
            let _ = done.send(());
        }
    }
    gc_debug!("shared collector stopped");
}
