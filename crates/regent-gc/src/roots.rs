//! Root tracking.
//!
//! A [`Root`] is a heap-registered cell holding one object address. The
//! collector marks from every live root and rewrites it when the object
//! moves, so a `Root` stays valid across collections while a bare
//! [`Address`] does not. Roots owned elsewhere (an interpreter's frames, a
//! global table) are exposed through a [`RootProvider`].

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::object::{Address, ObjectSlot};

#[derive(Default)]
struct RootCell(AtomicUsize);

impl RootCell {
    fn slot(&self) -> ObjectSlot {
        // SAFETY: the cell is a word owned by an `Arc` that outlives the scan.
        unsafe { ObjectSlot::from_raw(std::ptr::from_ref(&self.0) as usize) }
    }
}

/// A strong reference to a heap object that survives relocation.
///
/// ```
/// # use std::sync::Arc;
/// use regent_gc::descriptor::{DescriptorModel, TypeDescriptor};
/// use regent_gc::{Heap, HeapConfig, SpaceType};
///
/// static LEAF: TypeDescriptor = TypeDescriptor::fixed("Leaf", 16, &[]);
///
/// let heap = Heap::new(HeapConfig::default(), Arc::new(DescriptorModel)).unwrap();
/// let mut mutator = heap.attach();
/// let obj = mutator.allocate(SpaceType::Young, 16).unwrap();
/// LEAF.write_header(obj);
/// let root = heap.root(Some(obj));
/// assert_eq!(root.get(), Some(obj));
/// ```
#[derive(Clone)]
pub struct Root {
    cell: Arc<RootCell>,
}

impl Root {
    /// Current referent.
    #[must_use]
    pub fn get(&self) -> Option<Address> {
        self.cell.slot().referent()
    }

    /// Points the root at `obj`.
    pub fn set(&self, obj: Option<Address>) {
        self.cell.0.store(obj.map_or(0, Address::raw), Ordering::Release);
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Root").field(&self.get()).finish()
    }
}

/// Source of root slots the heap does not own.
///
/// The collector calls [`for_each_root`](Self::for_each_root) only while
/// every mutator is stopped. Slots may be rewritten with relocated addresses.
pub trait RootProvider: Send + Sync {
    /// Calls `visitor` for every root slot.
    fn for_each_root(&self, visitor: &mut dyn FnMut(ObjectSlot));
}

/// Every root of one heap.
#[derive(Default)]
pub(crate) struct RootSet {
    roots: Mutex<Vec<Arc<RootCell>>>,
    providers: Mutex<Vec<Arc<dyn RootProvider>>>,
}

impl RootSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(&self, obj: Option<Address>) -> Root {
        let root = Root {
            cell: Arc::default(),
        };
        root.set(obj);
        self.roots.lock().push(Arc::clone(&root.cell));
        root
    }

    pub(crate) fn add_provider(&self, provider: Arc<dyn RootProvider>) {
        self.providers.lock().push(provider);
    }

    /// Visits every root slot, dropping handles nobody holds anymore.
    pub(crate) fn for_each(&self, visitor: &mut dyn FnMut(ObjectSlot)) {
        let cells: Vec<Arc<RootCell>> = {
            let mut roots = self.roots.lock();
            roots.retain(|cell| Arc::strong_count(cell) > 1);
            roots.clone()
        };
        for cell in &cells {
            visitor(cell.slot());
        }
        let providers = self.providers.lock().clone();
        for provider in providers {
            provider.for_each_root(visitor);
        }
    }

    /// Number of live root handles.
    pub(crate) fn len(&self) -> usize {
        self.roots
            .lock()
            .iter()
            .filter(|cell| Arc::strong_count(cell) > 1)
            .count()
    }
}
