//! Object addresses, header words and the object-model boundary.
//!
//! Every heap object starts with one header word. Outside evacuation it holds
//! the object's [`ClassWord`]; once the object has been relocated it holds the
//! new address tagged with [`FORWARD_TAG`]. Reference slots are word-sized and
//! hold `0` (null), an object address (strong) or an address tagged with
//! [`WEAK_TAG`] (weak). All slot and header accesses are atomic.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size of a heap word.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Alignment of every object start and object size.
pub const OBJECT_ALIGNMENT: usize = 8;

/// Low bit set on a slot value that holds a weak reference.
pub const WEAK_TAG: usize = 1;

/// Low bit set on a header word that holds a forwarding address.
pub const FORWARD_TAG: usize = 1;

/// Rounds `size` up to the object alignment.
#[must_use]
pub const fn align_object_size(size: usize) -> usize {
    (size + OBJECT_ALIGNMENT - 1) & !(OBJECT_ALIGNMENT - 1)
}

/// Size of a non-forwarded object, rounded to the object alignment.
pub(crate) fn object_size(model: &dyn ObjectModel, obj: Address) -> usize {
    obj.mark_word().class().map_or_else(
        || {
            debug_assert!(false, "object {obj:?} has no class word");
            OBJECT_ALIGNMENT
        },
        |class| align_object_size(model.size_of(obj, class)).max(OBJECT_ALIGNMENT),
    )
}

/// Address of a heap object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(NonZeroUsize);

impl Address {
    /// Wraps a raw address.
    ///
    /// Returns `None` for null or misaligned values.
    ///
    /// # Safety
    ///
    /// `raw` must be the start of an object owned by a live heap.
    #[must_use]
    pub const unsafe fn from_raw(raw: usize) -> Option<Self> {
        if raw % OBJECT_ALIGNMENT != 0 {
            return None;
        }
        match NonZeroUsize::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Raw address value.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0.get()
    }

    /// Slot at `offset` bytes into the object.
    ///
    /// # Safety
    ///
    /// `offset` must lie inside the object and be word aligned.
    #[must_use]
    pub const unsafe fn field(self, offset: usize) -> ObjectSlot {
        ObjectSlot(self.raw() + offset)
    }

    pub(crate) const fn add(self, bytes: usize) -> Self {
        // SAFETY: adding to a non-zero address inside the heap reservation cannot wrap to zero.
        Self(unsafe { NonZeroUsize::new_unchecked(self.0.get() + bytes) })
    }

    pub(crate) fn header(self) -> &'static AtomicUsize {
        // SAFETY: every object starts with an aligned header word inside mapped heap memory.
        unsafe { &*(self.raw() as *const AtomicUsize) }
    }

    /// Loads the header word.
    pub(crate) fn mark_word(self) -> MarkWord {
        MarkWord(self.header().load(Ordering::Acquire))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.raw())
    }
}

/// Header value describing an object's type.
///
/// The heap never interprets a class word beyond checking the forwarding tag;
/// its meaning belongs to the [`ObjectModel`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ClassWord(NonZeroUsize);

impl ClassWord {
    /// Wraps a raw class word. The low bit must be clear.
    #[must_use]
    pub const fn new(raw: usize) -> Option<Self> {
        if raw & FORWARD_TAG != 0 {
            return None;
        }
        match NonZeroUsize::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Raw header value.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0.get()
    }
}

/// A header word as loaded from an object.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct MarkWord(pub(crate) usize);

impl MarkWord {
    pub(crate) const fn from_forwarding(to: Address) -> Self {
        Self(to.raw() | FORWARD_TAG)
    }

    pub(crate) const fn from_class(class: ClassWord) -> Self {
        Self(class.raw())
    }

    pub(crate) const fn is_forwarded(self) -> bool {
        self.0 & FORWARD_TAG != 0
    }

    pub(crate) fn forwarding_address(self) -> Option<Address> {
        if self.is_forwarded() {
            // SAFETY: forwarding words are only installed with addresses of copied objects.
            unsafe { Address::from_raw(self.0 & !FORWARD_TAG) }
        } else {
            None
        }
    }

    pub(crate) const fn class(self) -> Option<ClassWord> {
        if self.is_forwarded() {
            None
        } else {
            ClassWord::new(self.0)
        }
    }
}

/// A word-sized reference slot inside an object (or a root cell).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectSlot(usize);

impl ObjectSlot {
    /// Wraps the address of a slot.
    ///
    /// # Safety
    ///
    /// `addr` must point to an aligned word that stays valid while the slot is used.
    #[must_use]
    pub const unsafe fn from_raw(addr: usize) -> Self {
        Self(addr)
    }

    /// Address of the slot itself.
    #[must_use]
    pub const fn address(self) -> usize {
        self.0
    }

    fn cell(self) -> &'static AtomicUsize {
        // SAFETY: construction requires a valid aligned word.
        unsafe { &*(self.0 as *const AtomicUsize) }
    }

    /// Raw slot value including the weak tag.
    #[must_use]
    pub fn load_raw(self) -> usize {
        self.cell().load(Ordering::Acquire)
    }

    /// Stores a raw value. No barrier is applied.
    pub fn store_raw(self, value: usize) {
        self.cell().store(value, Ordering::Release);
    }

    /// Referenced object, ignoring the weak tag.
    #[must_use]
    pub fn referent(self) -> Option<Address> {
        // SAFETY: slots only hold null or object addresses.
        unsafe { Address::from_raw(self.load_raw() & !WEAK_TAG) }
    }

    /// True if the slot currently holds a weak reference.
    #[must_use]
    pub fn is_weak(self) -> bool {
        let raw = self.load_raw();
        raw != 0 && raw & WEAK_TAG != 0
    }

    /// Redirects the slot to `to`, keeping its weak tag.
    pub(crate) fn update(self, to: Address) {
        let tag = self.load_raw() & WEAK_TAG;
        self.store_raw(to.raw() | tag);
    }

    /// Redirects the slot from `from` to `to` unless the slot changed meanwhile.
    pub(crate) fn update_if(self, from: usize, to: Address) -> bool {
        let new = to.raw() | (from & WEAK_TAG);
        self.cell()
            .compare_exchange(from, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clears the slot.
    pub(crate) fn clear(self) {
        self.store_raw(0);
    }
}

impl fmt::Debug for ObjectSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectSlot({:#x})", self.0)
    }
}

/// The collector's view of the managed language's object layout.
///
/// The heap passes the class word it loaded alongside the object, so a
/// racing forwarding install can never make the model read a forwarding
/// address as a type.
pub trait ObjectModel: Send + Sync + 'static {
    /// Size of the object in bytes, header included.
    fn size_of(&self, obj: Address, class: ClassWord) -> usize;

    /// Calls `visitor` for every reference slot of the object, weak ones included.
    fn for_each_reference_slot(
        &self,
        obj: Address,
        class: ClassWord,
        visitor: &mut dyn FnMut(ObjectSlot),
    );

    /// True if objects of this class may contain references.
    fn has_reference_fields(&self, class: ClassWord) -> bool;
}
