use std::{
    alloc::{GlobalAlloc, Layout},
    mem, ptr,
    ptr::NonNull,
    sync::Mutex,
};

use crate::{
    chunk::BLOCK_SIZE,
    entries::{MemEntries, MemEntry},
    flags::{HandlerFlags, MemFlags},
    handler::{HandlerEntry, HandlerStatus, LowMemHandler, MemHandlerData},
    list::{List, Node},
    mungwall,
    region::{Region, RegionHeader},
    MemError, Pointer,
};

/// Per-allocator knobs, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Wrap every allocation in guard words and verify them on free.
    pub mungwall: bool,
    /// Paint allocated and freed memory with the fill patterns.
    pub fill: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mungwall: false,
            fill: cfg!(debug_assertions),
        }
    }
}

/// Opaque token for a registered region, returned by
/// [`ExecMem::add_region`] and consumed by [`ExecMem::rem_region`].
#[derive(Debug, Clone, Copy)]
pub struct RegionHandle(pub(crate) NonNull<RegionHeader>);

// The handle is just an address, never dereferenced outside the allocator's
// lock.
unsafe impl Send for RegionHandle {}
unsafe impl Sync for RegionHandle {}

/// Where a request wants its memory.
#[derive(Clone, Copy)]
enum AllocTarget {
    /// Anywhere a matching region has room.
    Any,
    /// At this absolute address.
    Abs(usize),
    /// At any address aligned to `1 << exp`.
    Align(u32),
}

impl AllocTarget {
    fn align_exp(self) -> Option<u32> {
        match self {
            Self::Align(exp) => Some(exp),
            _ => None,
        }
    }
}

/// Outcome of one run of the handler chain.
enum Chain {
    /// A handler claims progress was (or may have been) made.
    Retry,
    /// The chain is spent; give up.
    Exhausted,
}

/// The allocator state proper. [`ExecMem`] wraps this in a [`Mutex`] (and a
/// [`Box`], because the intrusive lists pin it in memory) to expose the
/// public interface:
///
/// ```text
///               +----------+     +----------+     +----------+
/// regions   --> | pri 10   | --> | pri 0    | --> | pri -5   |
///               | "fast"   |     | "video"  |     | "slow"   |
///               +----------+     +----------+     +----------+
///
///               +----------+     +----------+
/// handlers  --> | pri 10   | --> | pri 5    |      cursor: where the
///               | "caches" |     | "pools"  |      current attempt stands
///               +----------+     +----------+
/// ```
///
/// Allocation walks matching regions in priority order; when the walk comes
/// up empty the handler chain gets a chance to release memory and the walk
/// repeats, until either an allocation lands or the chain is exhausted.
struct InternalAllocator {
    regions: List<Region>,
    handlers: List<HandlerEntry>,
    /// Position in the handler chain for the allocation attempt in flight.
    /// Reset before every fresh attempt.
    cursor: Pointer<Node<HandlerEntry>>,
    config: Config,
}

impl InternalAllocator {
    unsafe fn add_region(
        &mut self,
        memory: NonNull<u8>,
        size: usize,
        attrs: MemFlags,
        pri: i32,
        name: &'static str,
    ) -> Result<RegionHandle, MemError> {
        let header = Region::init(memory, size, attrs, pri, name, self.config.fill)?;
        self.regions.insert_sorted(header, Region::pri);
        let region = &(*header.as_ptr()).data;
        log::debug!(
            "added region {name:?}: {} bytes usable, attrs {attrs:?}, pri {pri}",
            region.total()
        );
        Ok(RegionHandle(header))
    }

    unsafe fn rem_region(&mut self, handle: RegionHandle) -> Result<NonNull<u8>, MemError> {
        let region = &(*handle.0.as_ptr()).data;
        if region.free() != region.total() {
            return Err(MemError::RegionBusy {
                name: region.name(),
                outstanding: region.total() - region.free(),
            });
        }
        log::debug!("removing region {:?}", region.name());
        List::<Region>::unlink(handle.0);
        Ok(handle.0.cast())
    }

    unsafe fn add_handler(&mut self, name: &'static str, pri: i32, hook: Box<dyn LowMemHandler>) {
        let entry = Box::new(Node::new(HandlerEntry {
            pri,
            name,
            flags: HandlerFlags::empty(),
            hook,
        }));
        let node = NonNull::new_unchecked(Box::into_raw(entry));
        self.handlers.insert_sorted(node, |h| h.pri);
        log::debug!("added low-memory handler {name:?}, pri {pri}");
    }

    unsafe fn rem_handler(&mut self, name: &str) -> Result<(), MemError> {
        let node = self
            .handlers
            .find_by_name(name, |h| h.name)
            .ok_or_else(|| MemError::HandlerNotFound {
                name: name.to_owned(),
            })?;
        if self.cursor == Some(node) {
            self.cursor = None;
        }
        List::<HandlerEntry>::unlink(node);
        drop(Box::from_raw(node.as_ptr()));
        Ok(())
    }

    unsafe fn alloc(&mut self, size: usize, flags: MemFlags) -> Pointer<u8> {
        assert!(size > 0, "allocation of zero bytes");
        if !self.config.mungwall {
            return self.alloc_raw(size, flags, AllocTarget::Any);
        }

        let front = mungwall::front_size(None);
        let full = size + mungwall::extra_size(None);
        let raw = self.alloc_raw(full, flags, AllocTarget::Any)?;
        Some(mungwall::install(raw, front, full, size))
    }

    unsafe fn alloc_abs(&mut self, size: usize, location: usize, flags: MemFlags) -> Pointer<u8> {
        assert!(size > 0, "allocation of zero bytes");
        if !self.config.mungwall {
            return self.alloc_raw(size, flags, AllocTarget::Abs(location));
        }

        // The guard block sits in front of the address the caller asked
        // for, so the raw allocation starts one block earlier.
        let front = mungwall::front_size(None);
        let full = size + mungwall::extra_size(None);
        let below = location
            .checked_sub(front)
            .expect("absolute location below the guard block");
        let raw = self.alloc_raw(full, flags, AllocTarget::Abs(below))?;
        Some(mungwall::install(raw, front, full, size))
    }

    unsafe fn alloc_align(&mut self, size: usize, align_exp: u32, flags: MemFlags) -> Pointer<u8> {
        assert!(size > 0, "allocation of zero bytes");
        assert!(
            align_exp > 0 && align_exp < usize::BITS,
            "alignment exponent {align_exp} out of range"
        );
        if !self.config.mungwall {
            return self.alloc_raw(size, flags, AllocTarget::Align(align_exp));
        }

        // A whole alignment unit in front keeps the user pointer aligned.
        let front = mungwall::front_size(Some(align_exp));
        let full = size + mungwall::extra_size(Some(align_exp));
        let raw = self.alloc_raw(full, flags, AllocTarget::Align(align_exp))?;
        Some(mungwall::install(raw, front, full, size))
    }

    /// Allocates `size + one word` and stashes the full size in the leading
    /// word, so the matching free does not need to be told the size.
    unsafe fn alloc_vec(&mut self, size: usize, flags: MemFlags) -> Pointer<u8> {
        assert!(size > 0, "allocation of zero bytes");
        let total = size + mem::size_of::<usize>();
        let base = self.alloc(total, flags)?;
        ptr::write(base.as_ptr() as *mut usize, total);
        Some(NonNull::new_unchecked(
            base.as_ptr().add(mem::size_of::<usize>()),
        ))
    }

    unsafe fn free_vec(&mut self, ptr: NonNull<u8>) {
        let base = ptr.as_ptr().sub(mem::size_of::<usize>());
        let total = ptr::read(base as *const usize);
        self.free(NonNull::new_unchecked(base), total);
    }

    /// The retry loop behind every allocation path: walk the regions, and on
    /// failure let the handler chain earn another walk.
    unsafe fn alloc_raw(
        &mut self,
        size: usize,
        flags: MemFlags,
        target: AllocTarget,
    ) -> Pointer<u8> {
        self.cursor = None;
        loop {
            if let Some(address) = self.walk_regions(size, flags, target) {
                return Some(address);
            }
            if flags.contains(MemFlags::NO_EXPUNGE) {
                return None;
            }
            match self.call_handlers(size, target.align_exp(), flags) {
                Chain::Retry => continue,
                Chain::Exhausted => return None,
            }
        }
    }

    unsafe fn walk_regions(
        &mut self,
        size: usize,
        flags: MemFlags,
        target: AllocTarget,
    ) -> Pointer<u8> {
        let fill = self.config.fill;
        for node in self.regions.iter() {
            let region = &mut (*node.as_ptr()).data;
            if !region.satisfies(flags) {
                continue;
            }
            let address = match target {
                AllocTarget::Any => region.allocate(size, flags, fill),
                AllocTarget::Abs(location) => {
                    region.allocate_abs(size, location, flags.difference(MemFlags::ALIGN), fill)
                }
                AllocTarget::Align(exp) => {
                    region.allocate_abs(size, exp as usize, flags.union(MemFlags::ALIGN), fill)
                }
            };
            if address.is_some() {
                return address;
            }
        }
        None
    }

    /// Runs the handler chain for one failed walk. Handlers are visited in
    /// priority order; a handler that returned `TryAgain` keeps the cursor
    /// (its RECYCLE bit is set) until it reports something else.
    unsafe fn call_handlers(
        &mut self,
        size: usize,
        align_exp: Option<u32>,
        flags: MemFlags,
    ) -> Chain {
        loop {
            let node = match self.cursor {
                None => {
                    let Some(first) = self.handlers.first() else {
                        return Chain::Exhausted;
                    };
                    (*first.as_ptr()).data.flags.remove(HandlerFlags::RECYCLE);
                    self.cursor = Some(first);
                    first
                }
                Some(current) => {
                    if (*current.as_ptr())
                        .data
                        .flags
                        .contains(HandlerFlags::RECYCLE)
                    {
                        current
                    } else {
                        match Self::next_handler(current) {
                            Some(next) => {
                                self.cursor = Some(next);
                                next
                            }
                            None => {
                                self.cursor = None;
                                return Chain::Exhausted;
                            }
                        }
                    }
                }
            };

            let entry = &mut (*node.as_ptr()).data;
            let data = MemHandlerData {
                size,
                align_exp,
                flags,
                handler_flags: entry.flags,
            };
            log::trace!(
                "invoking low-memory handler {:?} (pri {})",
                entry.name,
                entry.pri
            );
            match entry.hook.low_memory(&data) {
                HandlerStatus::TryAgain => {
                    entry.flags.insert(HandlerFlags::RECYCLE);
                    return Chain::Retry;
                }
                HandlerStatus::AllDone => {
                    entry.flags.remove(HandlerFlags::RECYCLE);
                    return Chain::Retry;
                }
                HandlerStatus::DidNothing => {
                    entry.flags.remove(HandlerFlags::RECYCLE);
                }
            }
        }
    }

    unsafe fn next_handler(node: NonNull<Node<HandlerEntry>>) -> Pointer<Node<HandlerEntry>> {
        let succ = (*node.as_ptr()).links.succ.expect("handler entry unlinked");
        if succ.as_ref().succ.is_none() {
            None
        } else {
            Some(Node::from_links(succ))
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        assert!(size > 0, "free of zero bytes");
        let addr = ptr.as_ptr() as usize;
        let Some(node) = self.region_of(addr) else {
            panic!("free of unmanaged address {addr:#x}");
        };
        let region = &mut (*node.as_ptr()).data;

        if self.config.mungwall {
            let (raw, full) = mungwall::verify_and_strip(ptr, size);
            region.deallocate(raw, full, self.config.fill);
        } else {
            region.deallocate(ptr, size, self.config.fill);
        }
    }

    unsafe fn region_of(&self, addr: usize) -> Pointer<RegionHeader> {
        for node in self.regions.iter() {
            if (*node.as_ptr()).data.contains(addr) {
                return Some(node);
            }
        }
        None
    }

    unsafe fn avail_mem(&self, flags: MemFlags) -> usize {
        let mut value = 0;
        for node in self.regions.iter() {
            let region = &(*node.as_ptr()).data;
            if !region.satisfies(flags) {
                continue;
            }
            if flags.contains(MemFlags::LARGEST) {
                value = value.max(region.largest_and_verify());
            } else if flags.contains(MemFlags::TOTAL) {
                value += region.total();
            } else {
                value += region.free();
            }
        }
        value
    }

    unsafe fn type_of(&self, addr: usize) -> MemFlags {
        match self.region_of(addr) {
            Some(node) => (*node.as_ptr()).data.attrs(),
            None => MemFlags::empty(),
        }
    }

    unsafe fn alloc_entries(&mut self, request: &MemEntries) -> Option<MemEntries> {
        let mut done: Vec<MemEntry> = Vec::with_capacity(request.len());
        for entry in request.iter() {
            match self.alloc(entry.size, entry.flags) {
                Some(address) => done.push(MemEntry {
                    flags: entry.flags,
                    size: entry.size,
                    address: Some(address),
                }),
                None => {
                    // All or nothing: put back everything that already
                    // succeeded, most recent first.
                    for finished in done.iter().rev() {
                        if let Some(address) = finished.address {
                            self.free(address, finished.size);
                        }
                    }
                    return None;
                }
            }
        }
        Some(MemEntries::from_entries(done))
    }

    unsafe fn free_entries(&mut self, entries: &MemEntries) {
        for entry in entries.iter().rev() {
            if let Some(address) = entry.address {
                self.free(address, entry.size);
            }
        }
    }
}

/// The central allocator. Callers register memory regions with tagged
/// attributes and priorities, then request blocks by size, attributes,
/// alignment or absolute address; a failed request runs a priority-ordered
/// chain of reclaim handlers before giving up. See the crate docs for an
/// end-to-end example.
///
/// All public operations serialize on one coarse [`Mutex`], held for the
/// whole call including any handler invocations. Out of memory is a soft
/// failure (`None`); misuse (freeing unknown pointers, zero-size requests,
/// damaged guard words) is a fault and panics. A panic poisons the lock and
/// later allocation attempts simply report out of memory.
pub struct ExecMem {
    inner: Mutex<Box<InternalAllocator>>,
}

// The raw pointers inside are only ever touched under the mutex.
unsafe impl Send for ExecMem {}
unsafe impl Sync for ExecMem {}

impl ExecMem {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut inner = Box::new(InternalAllocator {
            regions: List::new(),
            handlers: List::new(),
            cursor: None,
            config,
        });
        // The box pins the lists; from here on the struct must not move,
        // and it will not, because only the box pointer does.
        unsafe {
            inner.regions.init();
            inner.handlers.init();
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Registers `[memory, memory + size)` as a new region. The caller keeps
    /// ownership of the memory and must keep it alive until
    /// [`ExecMem::rem_region`] succeeds or the allocator is dropped.
    ///
    /// # Safety
    ///
    /// `memory` must be valid, writable, word aligned memory of `size` bytes
    /// that nothing else touches while the region is registered.
    pub unsafe fn add_region(
        &self,
        memory: NonNull<u8>,
        size: usize,
        attrs: MemFlags,
        pri: i32,
        name: &'static str,
    ) -> Result<RegionHandle, MemError> {
        match self.inner.lock() {
            Ok(mut inner) => inner.add_region(memory, size, attrs, pri, name),
            Err(_) => Err(MemError::Poisoned),
        }
    }

    /// Deregisters a region and returns its base address. Fails while any
    /// byte of it is still allocated.
    ///
    /// # Safety
    ///
    /// `handle` must come from [`ExecMem::add_region`] on this allocator and
    /// must not have been removed already.
    pub unsafe fn rem_region(&self, handle: RegionHandle) -> Result<NonNull<u8>, MemError> {
        match self.inner.lock() {
            Ok(mut inner) => inner.rem_region(handle),
            Err(_) => Err(MemError::Poisoned),
        }
    }

    /// Installs a reclaim handler. Handlers are kept sorted by descending
    /// priority; equal priorities run in installation order.
    pub fn add_handler(
        &self,
        name: &'static str,
        pri: i32,
        hook: Box<dyn LowMemHandler>,
    ) -> Result<(), MemError> {
        match self.inner.lock() {
            Ok(mut inner) => {
                unsafe { inner.add_handler(name, pri, hook) };
                Ok(())
            }
            Err(_) => Err(MemError::Poisoned),
        }
    }

    /// Removes the first handler with the given name and drops it.
    pub fn rem_handler(&self, name: &str) -> Result<(), MemError> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.rem_handler(name) },
            Err(_) => Err(MemError::Poisoned),
        }
    }

    /// Allocates `size` bytes from the highest-priority region that matches
    /// the requirement bits of `flags`. Returns `None` when every matching
    /// region is full and the handler chain could not help.
    pub fn alloc(&self, size: usize, flags: MemFlags) -> Pointer<u8> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.alloc(size, flags) },
            Err(_) => None,
        }
    }

    /// Allocates `size` bytes at exactly `location` (rounded down to a block
    /// boundary), if that range is free in some matching region.
    pub fn alloc_abs(&self, size: usize, location: usize, flags: MemFlags) -> Pointer<u8> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.alloc_abs(size, location, flags) },
            Err(_) => None,
        }
    }

    /// Allocates `size` bytes aligned to `1 << align_exp`.
    pub fn alloc_align(&self, size: usize, align_exp: u32, flags: MemFlags) -> Pointer<u8> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.alloc_align(size, align_exp, flags) },
            Err(_) => None,
        }
    }

    /// Like [`ExecMem::alloc`], but remembers the allocation size so that
    /// [`ExecMem::free_vec`] does not need to be told.
    pub fn alloc_vec(&self, size: usize, flags: MemFlags) -> Pointer<u8> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.alloc_vec(size, flags) },
            Err(_) => None,
        }
    }

    /// Returns `size` bytes at `ptr` to the owning region.
    ///
    /// # Safety
    ///
    /// `ptr` must come from an allocation of exactly `size` bytes on this
    /// allocator that has not been freed yet.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.free(ptr, size);
        }
    }

    /// Counterpart of [`ExecMem::alloc_vec`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`ExecMem::alloc_vec`] on this allocator and
    /// must not have been freed yet.
    pub unsafe fn free_vec(&self, ptr: NonNull<u8>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.free_vec(ptr);
        }
    }

    /// Free bytes across matching regions. With [`MemFlags::LARGEST`], the
    /// biggest single chunk instead (verifying each region's freelist on the
    /// way); with [`MemFlags::TOTAL`], registered capacity.
    pub fn avail_mem(&self, flags: MemFlags) -> usize {
        match self.inner.lock() {
            Ok(inner) => unsafe { inner.avail_mem(flags) },
            Err(_) => 0,
        }
    }

    /// Attributes of the region owning `ptr`, or no bits when no region
    /// does.
    pub fn type_of(&self, ptr: NonNull<u8>) -> MemFlags {
        match self.inner.lock() {
            Ok(inner) => unsafe { inner.type_of(ptr.as_ptr() as usize) },
            Err(_) => MemFlags::empty(),
        }
    }

    /// Allocates a whole batch or nothing: on the first failing entry every
    /// earlier one is rolled back and `None` is returned. The whole batch is
    /// one critical section.
    pub fn alloc_entries(&self, request: &MemEntries) -> Option<MemEntries> {
        match self.inner.lock() {
            Ok(mut inner) => unsafe { inner.alloc_entries(request) },
            Err(_) => None,
        }
    }

    /// Releases a batch in reverse allocation order.
    ///
    /// # Safety
    ///
    /// `entries` must be the untouched result of a successful
    /// [`ExecMem::alloc_entries`] on this allocator.
    pub unsafe fn free_entries(&self, entries: MemEntries) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.free_entries(&entries);
        }
    }
}

impl Default for ExecMem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecMem {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Handler entries are the only thing the allocator owns; region
        // memory stays with whoever registered it.
        unsafe {
            while let Some(node) = inner.handlers.rem_head() {
                drop(Box::from_raw(node.as_ptr()));
            }
        }
    }
}

/// Runtime bridge: lets the allocator back `Box`, `Vec` and friends once
/// regions are registered. Requests with an alignment above one block take
/// the aligned path; out of memory surfaces as a null pointer, as the trait
/// demands.
unsafe impl GlobalAlloc for ExecMem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Ok(mut inner) = self.inner.lock() else {
            return ptr::null_mut();
        };
        let size = layout.size().max(1);
        let address = if layout.align() <= BLOCK_SIZE {
            inner.alloc(size, MemFlags::ANY)
        } else {
            inner.alloc_align(size, layout.align().trailing_zeros(), MemFlags::ANY)
        };
        address.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let Ok(mut inner) = self.inner.lock() else {
            return ptr::null_mut();
        };
        let size = layout.size().max(1);
        let address = if layout.align() <= BLOCK_SIZE {
            inner.alloc(size, MemFlags::CLEAR)
        } else {
            inner.alloc_align(size, layout.align().trailing_zeros(), MemFlags::CLEAR)
        };
        address.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.free(NonNull::new_unchecked(ptr), layout.size().max(1));
        }
    }
}
