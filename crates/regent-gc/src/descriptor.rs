//! Static type descriptors.
//!
//! A ready-made [`ObjectModel`] for embedders without their own layout
//! machinery. An object's header holds the address of its `'static`
//! [`TypeDescriptor`]:
//!
//! ```text
//! fixed:      [ header | field 8 | field 16 | ... ]
//! ref array:  [ header | length | slot 0 | slot 1 | ... ]
//! byte array: [ header | length | bytes ... ]
//! ```
//!
//! ```
//! use regent_gc::descriptor::TypeDescriptor;
//!
//! static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 24, &[8, 16]);
//! assert_eq!(NODE.instance_size(0), 24);
//! assert!(NODE.has_references());
//! ```

use std::sync::atomic::Ordering;

use crate::object::{Address, ClassWord, ObjectModel, ObjectSlot, WORD_SIZE};

/// Offset of the length word in arrays.
pub const ARRAY_LENGTH_OFFSET: usize = WORD_SIZE;

/// Offset of the first element in arrays.
pub const ARRAY_DATA_OFFSET: usize = 2 * WORD_SIZE;

#[derive(Debug)]
enum Layout {
    Fixed {
        size: usize,
        refs: &'static [usize],
    },
    RefArray,
    ByteArray,
}

/// Layout of one kind of object.
#[derive(Debug)]
pub struct TypeDescriptor {
    name: &'static str,
    layout: Layout,
}

impl TypeDescriptor {
    /// Fixed-size objects with reference fields at `refs` (byte offsets).
    #[must_use]
    pub const fn fixed(name: &'static str, size: usize, refs: &'static [usize]) -> Self {
        Self {
            name,
            layout: Layout::Fixed { size, refs },
        }
    }

    /// Arrays of reference slots.
    #[must_use]
    pub const fn ref_array(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::RefArray,
        }
    }

    /// Arrays of raw bytes.
    #[must_use]
    pub const fn byte_array(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::ByteArray,
        }
    }

    /// Type name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Bytes needed for an instance; `len` is ignored for fixed objects.
    #[must_use]
    pub const fn instance_size(&self, len: usize) -> usize {
        match self.layout {
            Layout::Fixed { size, .. } => size,
            Layout::RefArray => ARRAY_DATA_OFFSET + len * WORD_SIZE,
            Layout::ByteArray => ARRAY_DATA_OFFSET + len,
        }
    }

    /// True if instances may hold references.
    #[must_use]
    pub const fn has_references(&self) -> bool {
        match self.layout {
            Layout::Fixed { refs, .. } => !refs.is_empty(),
            Layout::RefArray => true,
            Layout::ByteArray => false,
        }
    }

    /// Header value for instances of this type.
    #[must_use]
    pub fn class_word(&'static self) -> ClassWord {
        ClassWord::new(std::ptr::from_ref(self) as usize)
            .unwrap_or_else(|| unreachable!("descriptors are word aligned"))
    }

    /// Writes the header of a freshly allocated object.
    pub fn write_header(&'static self, obj: Address) {
        obj.header().store(self.class_word().raw(), Ordering::Release);
    }

    /// Writes the header and, for arrays, the length.
    pub fn initialize(&'static self, obj: Address, len: usize) {
        if !matches!(self.layout, Layout::Fixed { .. }) {
            obj.add(ARRAY_LENGTH_OFFSET)
                .header()
                .store(len, Ordering::Relaxed);
        }
        self.write_header(obj);
    }

    /// Resolves a class word written by [`write_header`](Self::write_header).
    ///
    /// # Safety
    ///
    /// `class` must have been produced by [`class_word`](Self::class_word).
    #[must_use]
    pub const unsafe fn from_class_word(class: ClassWord) -> &'static Self {
        // SAFETY: guaranteed by the caller.
        unsafe { &*(class.raw() as *const Self) }
    }
}

/// Length of an array object.
#[must_use]
pub fn array_length(obj: Address) -> usize {
    obj.add(ARRAY_LENGTH_OFFSET).header().load(Ordering::Relaxed)
}

/// [`ObjectModel`] over [`TypeDescriptor`] headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorModel;

impl ObjectModel for DescriptorModel {
    fn size_of(&self, obj: Address, class: ClassWord) -> usize {
        // SAFETY: every object of a heap using this model has a descriptor header.
        let desc = unsafe { TypeDescriptor::from_class_word(class) };
        match desc.layout {
            Layout::Fixed { size, .. } => size,
            Layout::RefArray | Layout::ByteArray => desc.instance_size(array_length(obj)),
        }
    }

    fn for_each_reference_slot(
        &self,
        obj: Address,
        class: ClassWord,
        visitor: &mut dyn FnMut(ObjectSlot),
    ) {
        // SAFETY: as in `size_of`.
        let desc = unsafe { TypeDescriptor::from_class_word(class) };
        match desc.layout {
            Layout::Fixed { refs, .. } => {
                for &offset in refs {
                    // SAFETY: descriptor offsets lie inside the object.
                    visitor(unsafe { obj.field(offset) });
                }
            }
            Layout::RefArray => {
                for i in 0..array_length(obj) {
                    // SAFETY: elements lie inside the array.
                    visitor(unsafe { obj.field(ARRAY_DATA_OFFSET + i * WORD_SIZE) });
                }
            }
            Layout::ByteArray => {}
        }
    }

    fn has_reference_fields(&self, class: ClassWord) -> bool {
        // SAFETY: as in `size_of`.
        unsafe { TypeDescriptor::from_class_word(class) }.has_references()
    }
}
