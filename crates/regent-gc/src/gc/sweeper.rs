//! Concurrent sweeper.
//!
//! The pause queues every region of the swept spaces; the task pool then
//! sweeps them while mutators run. A mutator that needs a space's free list
//! before its task is done helps sweep the remaining regions and then waits
//! for the task, so allocation never observes a half-built free list.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::heap::space::{Space, SpaceType, SweepContext};
use crate::task::Taskpool;
use crate::tracing::gc_debug;

const SWEEP_SLOTS: usize = 7;

const fn slot(space: SpaceType) -> Option<usize> {
    match space {
        SpaceType::Old => Some(0),
        SpaceType::NonMovable => Some(1),
        SpaceType::MachineCode => Some(2),
        SpaceType::Huge => Some(3),
        SpaceType::SharedOld => Some(4),
        SpaceType::SharedNonMovable => Some(5),
        SpaceType::SharedHuge => Some(6),
        SpaceType::Young | SpaceType::ReadOnly => None,
    }
}

/// Owner of the sweepable spaces a [`ConcurrentSweeper`] works on.
pub(crate) trait SweepHost: Send + Sync + 'static {
    fn sweep_space(&self, space: SpaceType) -> Option<&dyn Space>;
    fn sweep_context(&self) -> SweepContext<'_>;
    fn sweeper(&self) -> &ConcurrentSweeper;
}

/// Tracks outstanding sweep tasks per space.
pub(crate) struct ConcurrentSweeper {
    concurrent: bool,
    remaining: Mutex<[usize; SWEEP_SLOTS]>,
    done: Condvar,
}

impl ConcurrentSweeper {
    pub(crate) fn new(concurrent: bool) -> Self {
        Self {
            concurrent,
            remaining: Mutex::new([0; SWEEP_SLOTS]),
            done: Condvar::new(),
        }
    }

    /// Queues `spaces` for sweeping and starts the tasks.
    ///
    /// Must run inside a pause. Sweeps synchronously when concurrent
    /// sweeping is disabled.
    pub(crate) fn start<H: SweepHost>(host: &Arc<H>, spaces: &[SpaceType]) {
        let cx = host.sweep_context();
        for &kind in spaces {
            if let Some(space) = host.sweep_space(kind) {
                space.prepare_sweep(cx.table);
            }
        }
        let sweeper = host.sweeper();
        if !sweeper.concurrent {
            for &kind in spaces {
                if let Some(space) = host.sweep_space(kind) {
                    space.sweep(&cx);
                }
            }
            return;
        }
        for &kind in spaces {
            let (Some(index), Some(_)) = (slot(kind), host.sweep_space(kind)) else {
                continue;
            };
            sweeper.remaining.lock()[index] += 1;
            let host = Arc::clone(host);
            Taskpool::global().post(move || {
                let cx = host.sweep_context();
                if let Some(space) = host.sweep_space(kind) {
                    space.sweep(&cx);
                }
                host.sweeper().finish(index);
            });
        }
        gc_debug!(spaces = spaces.len(), "concurrent sweep started");
    }

    fn finish(&self, index: usize) {
        let mut remaining = self.remaining.lock();
        remaining[index] = remaining[index].saturating_sub(1);
        self.done.notify_all();
    }

    fn wait(&self, index: usize) {
        let mut remaining = self.remaining.lock();
        while remaining[index] > 0 {
            self.done.wait(&mut remaining);
        }
    }

    fn pending(&self, index: usize) -> bool {
        self.remaining.lock()[index] > 0
    }

    /// Finishes sweeping `space` on the calling thread, then waits for its task.
    pub(crate) fn ensure_task_finished<H: SweepHost + ?Sized>(host: &H, kind: SpaceType) {
        let Some(index) = slot(kind) else {
            return;
        };
        let sweeper = host.sweeper();
        if !sweeper.pending(index) {
            return;
        }
        if let Some(space) = host.sweep_space(kind) {
            space.sweep(&host.sweep_context());
        }
        sweeper.wait(index);
    }

    /// [`ensure_task_finished`](Self::ensure_task_finished) for every space.
    pub(crate) fn ensure_all_task_finished<H: SweepHost + ?Sized>(host: &H) {
        for kind in [
            SpaceType::Old,
            SpaceType::NonMovable,
            SpaceType::MachineCode,
            SpaceType::Huge,
            SpaceType::SharedOld,
            SpaceType::SharedNonMovable,
            SpaceType::SharedHuge,
        ] {
            Self::ensure_task_finished(host, kind);
        }
    }

    pub(crate) fn is_sweeping(&self) -> bool {
        self.remaining.lock().iter().any(|&n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorModel, TypeDescriptor};
    use crate::heap::region::RegionTable;
    use crate::heap::remembered_set::DefaultRememberedSetPolicy;
    use crate::heap::space::SweepableSpace;
    use crate::object::Address;

    static LEAF: TypeDescriptor = TypeDescriptor::fixed("Leaf", 32, &[]);

    struct Host {
        table: RegionTable,
        model: DescriptorModel,
        old: SweepableSpace,
        sweeper: ConcurrentSweeper,
    }

    impl SweepHost for Host {
        fn sweep_space(&self, space: SpaceType) -> Option<&dyn Space> {
            (space == SpaceType::Old).then_some(&self.old as &dyn Space)
        }

        fn sweep_context(&self) -> SweepContext<'_> {
            SweepContext {
                table: &self.table,
                model: &self.model,
            }
        }

        fn sweeper(&self) -> &ConcurrentSweeper {
            &self.sweeper
        }
    }

    fn host(concurrent: bool) -> Arc<Host> {
        Arc::new(Host {
            table: RegionTable::new(8, Arc::new(DefaultRememberedSetPolicy)).unwrap(),
            model: DescriptorModel,
            old: SweepableSpace::new(SpaceType::Old),
            sweeper: ConcurrentSweeper::new(concurrent),
        })
    }

    /// Allocates `n` leaves and marks every other one.
    fn populate(host: &Host, n: usize) -> Vec<Address> {
        let mut objs = Vec::new();
        for i in 0..n {
            let addr = host
                .old
                .allocate_from_free_list(32)
                .or_else(|| host.old.expand_and_allocate(&host.table, 32))
                .unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            LEAF.write_header(obj);
            if i % 2 == 0 {
                host.table.region_of(addr).unwrap().mark(addr);
            }
            objs.push(obj);
        }
        objs
    }

    #[test]
    fn test_concurrent_sweep_rebuilds_free_list() {
        let host = host(true);
        let objs = populate(&host, 10);
        ConcurrentSweeper::start(&host, &[SpaceType::Old]);
        ConcurrentSweeper::ensure_task_finished(&*host, SpaceType::Old);
        assert!(!host.sweeper.is_sweeping());
        let region = host.table.region_of(objs[0].raw()).unwrap();
        assert_eq!(region.alive_bytes(), 5 * 32);
        // The first dead object's hole is reusable.
        let reused = host.old.allocate_from_free_list(32).unwrap();
        assert!(objs.iter().skip(1).step_by(2).any(|o| o.raw() == reused)
            || reused >= objs[9].raw());
    }

    #[test]
    fn test_synchronous_sweep_finishes_inside_start() {
        let host = host(false);
        populate(&host, 4);
        ConcurrentSweeper::start(&host, &[SpaceType::Old]);
        assert!(!host.sweeper.is_sweeping());
        assert!(host.old.free_bytes() > 0);
    }

    #[test]
    fn test_ensure_all_without_tasks_returns() {
        let host = host(true);
        ConcurrentSweeper::ensure_all_task_finished(&*host);
        assert!(!host.sweeper.is_sweeping());
    }
}
