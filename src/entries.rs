use std::{mem, slice};

use crate::{flags::MemFlags, Pointer};

/// One slot of a batch request: what to ask for and, once allocated, where
/// it ended up.
#[derive(Debug, Clone, Copy)]
pub struct MemEntry {
    /// Attribute requirements and options for this slot.
    pub flags: MemFlags,
    /// Requested size in bytes.
    pub size: usize,
    /// Filled in by [`crate::ExecMem::alloc_entries`]; `None` in a request
    /// template.
    pub address: Pointer<u8>,
}

/// A batch of allocation requests with all-or-nothing semantics: either
/// every entry gets memory or none does. Build a template with
/// [`MemEntries::new`], hand it to [`crate::ExecMem::alloc_entries`] and
/// release the populated result with [`crate::ExecMem::free_entries`].
#[derive(Debug)]
pub struct MemEntries {
    entries: Box<[MemEntry]>,
}

impl MemEntries {
    /// Builds a request template from `(flags, size)` pairs.
    pub fn new(requests: impl IntoIterator<Item = (MemFlags, usize)>) -> Self {
        let entries = requests
            .into_iter()
            .map(|(flags, size)| MemEntry {
                flags,
                size,
                address: None,
            })
            .collect();
        Self { entries }
    }

    pub(crate) fn from_entries(entries: Vec<MemEntry>) -> Self {
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MemEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, MemEntry> {
        self.entries.iter()
    }

    /// Footprint of a batch descriptor with `count` entries: one header plus
    /// one slot per entry. Relevant when the descriptor itself is kept in
    /// managed memory.
    pub fn byte_size(count: usize) -> usize {
        mem::size_of::<Self>() + count * mem::size_of::<MemEntry>()
    }
}
