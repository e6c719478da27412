use std::{mem, ptr, ptr::NonNull};

use crate::{
    chunk::{
        chunk_addr, chunk_end, fill_bytes, round_to_block, write_chunk, Chunk, FreeChunk,
        ALLOC_FILL_BYTE, BLOCK_MASK, BLOCK_SIZE, CHUNK_HEADER_SIZE, FREE_FILL_BYTE,
    },
    flags::MemFlags,
    list::{List, Node},
    MemError, Pointer,
};

/// A complete region header is a list node so that the central allocator can
/// chain registered regions by priority.
pub(crate) type RegionHeader = Node<Region>;

pub(crate) const REGION_HEADER_SIZE: usize = round_to_block(mem::size_of::<RegionHeader>());

/// One contiguous byte range under management. The header sits at the base
/// of the registered memory, followed by padding up to the next block
/// boundary; everything from there to the last block boundary is handed out
/// in [`BLOCK_SIZE`] quanta and tracked by a freelist of [`FreeChunk`]s kept
/// strictly sorted by address:
///
/// ```text
/// base                lower                                         upper
/// +--------+---------+----------+--------+----------+--------------+
/// | Region | padding | FreeChunk| in use | FreeChunk|    in use    |
/// | header |         | bytes=B0 |        | bytes=B1 |              |
/// +--------+---------+----------+--------+----------+--------------+
///                     ^--------------------^
///                      chunks, address ordered, never adjacent
/// ```
///
/// Two touching free chunks cannot exist: deallocation merges them on the
/// spot. The region knows nothing about guard words; it hands out and takes
/// back block-accurate ranges and the layer above decorates them.
pub(crate) struct Region {
    attrs: MemFlags,
    pri: i32,
    name: &'static str,
    /// First usable address. Acts as a fictitious left endpoint during
    /// coalescing: nothing ever merges across it.
    lower: usize,
    /// One past the last usable address, block aligned. Fictitious right
    /// endpoint, same rule.
    upper: usize,
    /// Usable capacity, `upper - lower`.
    total: usize,
    /// Bytes currently free. Always the sum of the chunk sizes.
    free: usize,
    chunks: List<Chunk>,
}

impl Region {
    /// Builds a region inside the caller's memory: writes the header at
    /// `base`, then turns the rest into a single spanning free chunk.
    ///
    /// # Safety
    ///
    /// `[base, base + size)` must be writable memory that outlives the
    /// region's registration, and `base` must be word aligned.
    pub(crate) unsafe fn init(
        base: NonNull<u8>,
        size: usize,
        attrs: MemFlags,
        pri: i32,
        name: &'static str,
        fill: bool,
    ) -> Result<NonNull<RegionHeader>, MemError> {
        let start = base.as_ptr() as usize;
        assert_eq!(
            start % mem::align_of::<RegionHeader>(),
            0,
            "region base must be word aligned"
        );

        let lower = (start + mem::size_of::<RegionHeader>() + BLOCK_MASK) & !BLOCK_MASK;
        let upper = start.checked_add(size).expect("region wraps the address space") & !BLOCK_MASK;
        if upper < lower + BLOCK_SIZE {
            return Err(MemError::RegionTooSmall { size });
        }
        let total = upper - lower;

        let header = base.cast::<RegionHeader>();
        ptr::write(
            header.as_ptr(),
            Node::new(Region {
                attrs,
                pri,
                name,
                lower,
                upper,
                total,
                free: total,
                chunks: List::new(),
            }),
        );

        // The chunk list now sits at its final address inside the header.
        let region = &mut (*header.as_ptr()).data;
        region.chunks.init();
        let chunk = write_chunk(lower, total);
        region.chunks.add_head(chunk);
        if fill {
            fill_bytes(lower + CHUNK_HEADER_SIZE, total - CHUNK_HEADER_SIZE, FREE_FILL_BYTE);
        }

        Ok(header)
    }

    pub(crate) fn attrs(&self) -> MemFlags {
        self.attrs
    }

    pub(crate) fn pri(&self) -> i32 {
        self.pri
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn free(&self) -> usize {
        self.free
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    #[cfg(test)]
    pub(crate) fn lower(&self) -> usize {
        self.lower
    }

    #[cfg(test)]
    pub(crate) fn upper(&self) -> usize {
        self.upper
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.lower <= addr && addr < self.upper
    }

    pub(crate) fn satisfies(&self, request: MemFlags) -> bool {
        self.attrs.satisfies(request)
    }

    /// First-fit allocation. Walks the freelist bottom-up, or top-down with
    /// `REVERSE`, and carves the winning chunk from the matching end so that
    /// forward allocations grow from `lower` and reverse ones from `upper`.
    pub(crate) unsafe fn allocate(
        &mut self,
        size: usize,
        flags: MemFlags,
        fill: bool,
    ) -> Pointer<u8> {
        if size == 0 || self.free < size {
            return None;
        }
        let size = round_to_block(size);
        if self.free < size {
            return None;
        }

        let address = if flags.contains(MemFlags::REVERSE) {
            self.carve_reverse(size)?
        } else {
            self.carve_forward(size)?
        };

        self.free -= size;
        self.finish(address, size, flags, fill);
        Some(NonNull::new_unchecked(address as *mut u8))
    }

    unsafe fn carve_forward(&mut self, size: usize) -> Option<usize> {
        for chunk in self.chunks.iter() {
            let bytes = chunk.as_ref().data.bytes;
            if bytes < size {
                continue;
            }

            let at = chunk_addr(chunk);
            if bytes > size {
                // Keep the rest as a smaller chunk in the old one's place.
                let rest = write_chunk(at + size, bytes - size);
                self.chunks.add_after(rest, Some(chunk));
            }
            List::<Chunk>::unlink(chunk);
            return Some(at);
        }
        None
    }

    unsafe fn carve_reverse(&mut self, size: usize) -> Option<usize> {
        for mut chunk in self.chunks.iter_rev() {
            let bytes = chunk.as_ref().data.bytes;
            if bytes < size {
                continue;
            }

            if bytes == size {
                let at = chunk_addr(chunk);
                List::<Chunk>::unlink(chunk);
                return Some(at);
            }
            chunk.as_mut().data.bytes = bytes - size;
            return Some(chunk_end(chunk));
        }
        None
    }

    /// Allocation at a caller-chosen position. With `ALIGN`, `location` is
    /// an alignment exponent and the first chunk that can host an aligned
    /// block wins; otherwise `location` is an absolute address, rounded down
    /// to a block boundary, that must fall inside a single free chunk
    /// together with the whole block.
    pub(crate) unsafe fn allocate_abs(
        &mut self,
        size: usize,
        location: usize,
        flags: MemFlags,
        fill: bool,
    ) -> Pointer<u8> {
        if size == 0 {
            return None;
        }
        let size = round_to_block(size);
        if self.free < size {
            return None;
        }

        let (chunk, at) = if flags.contains(MemFlags::ALIGN) {
            let exp = location as u32;
            assert!(
                exp > 0 && exp < usize::BITS,
                "alignment exponent {exp} out of range"
            );
            let mask = ((1usize << exp) - 1).max(BLOCK_MASK);
            if flags.contains(MemFlags::REVERSE) {
                self.find_aligned_reverse(size, mask)?
            } else {
                self.find_aligned_forward(size, mask)?
            }
        } else {
            self.find_absolute(size, location & !BLOCK_MASK)?
        };

        self.carve_at(chunk, at, size);
        self.free -= size;
        self.finish(at, size, flags, fill);
        Some(NonNull::new_unchecked(at as *mut u8))
    }

    unsafe fn find_aligned_forward(
        &self,
        size: usize,
        mask: usize,
    ) -> Option<(NonNull<FreeChunk>, usize)> {
        for chunk in self.chunks.iter() {
            let at = (chunk_addr(chunk) + mask) & !mask;
            if at + size <= chunk_end(chunk) {
                return Some((chunk, at));
            }
        }
        None
    }

    unsafe fn find_aligned_reverse(
        &self,
        size: usize,
        mask: usize,
    ) -> Option<(NonNull<FreeChunk>, usize)> {
        for chunk in self.chunks.iter_rev() {
            let end = chunk_end(chunk);
            if end < size {
                continue;
            }
            let at = (end - size) & !mask;
            if at >= chunk_addr(chunk) {
                return Some((chunk, at));
            }
        }
        None
    }

    unsafe fn find_absolute(
        &self,
        size: usize,
        location: usize,
    ) -> Option<(NonNull<FreeChunk>, usize)> {
        for chunk in self.chunks.iter() {
            if chunk_addr(chunk) <= location && location + size <= chunk_end(chunk) {
                return Some((chunk, location));
            }
        }
        None
    }

    /// Cuts `[at, at + size)` out of `chunk`, leaving up to two remainder
    /// chunks behind. All three boundaries are block aligned by the callers.
    unsafe fn carve_at(&mut self, mut chunk: NonNull<FreeChunk>, at: usize, size: usize) {
        let start = chunk_addr(chunk);
        let end = chunk_end(chunk);
        debug_assert!(start <= at && at + size <= end);

        let head = at - start;
        let tail = end - (at + size);

        if tail > 0 {
            let rest = write_chunk(at + size, tail);
            self.chunks.add_after(rest, Some(chunk));
        }
        if head > 0 {
            chunk.as_mut().data.bytes = head;
        } else {
            List::<Chunk>::unlink(chunk);
        }
    }

    unsafe fn finish(&self, address: usize, size: usize, flags: MemFlags, fill: bool) {
        if flags.contains(MemFlags::CLEAR) {
            ptr::write_bytes(address as *mut u8, 0, size);
        } else if fill {
            fill_bytes(address, size, ALLOC_FILL_BYTE);
        }
    }

    /// Returns a block to the freelist and merges it with whichever
    /// neighbours it touches. The fictitious `lower`/`upper` endpoints are
    /// never merged across.
    pub(crate) unsafe fn deallocate(&mut self, block: NonNull<u8>, size: usize, fill: bool) {
        assert!(size > 0, "deallocate of zero bytes");
        let at = block.as_ptr() as usize;
        let size = round_to_block(size);
        assert_eq!(at & BLOCK_MASK, 0, "deallocate of unaligned block {at:#x}");
        assert!(
            self.lower <= at && at + size <= self.upper,
            "block {at:#x}+{size} outside region {:?}",
            self.name
        );

        // Locate the pair of chunks that straddle the block in address
        // order. Either side may be missing.
        let mut prev: Pointer<FreeChunk> = None;
        let mut next: Pointer<FreeChunk> = None;
        for chunk in self.chunks.iter() {
            if chunk_addr(chunk) < at {
                prev = Some(chunk);
            } else {
                next = Some(chunk);
                break;
            }
        }

        let prev_end = prev.map_or(self.lower, |c| chunk_end(c));
        let next_start = next.map_or(self.upper, |c| chunk_addr(c));
        assert!(
            at >= prev_end,
            "block {at:#x} overlaps a free chunk ending at {prev_end:#x}"
        );
        assert!(
            at + size <= next_start,
            "block {at:#x}+{size} overlaps the following free chunk at {next_start:#x}"
        );

        let merge_prev = prev.is_some() && prev_end == at;
        let merge_next = next.is_some() && next_start == at + size;

        match (merge_prev, merge_next) {
            (true, true) => {
                let mut prev = prev.unwrap();
                let next = next.unwrap();
                let next_bytes = next.as_ref().data.bytes;
                List::<Chunk>::unlink(next);
                prev.as_mut().data.bytes += size + next_bytes;
                if fill {
                    fill_bytes(at, size, FREE_FILL_BYTE);
                    fill_bytes(next_start, CHUNK_HEADER_SIZE, FREE_FILL_BYTE);
                }
            }
            (true, false) => {
                let mut prev = prev.unwrap();
                prev.as_mut().data.bytes += size;
                if fill {
                    fill_bytes(at, size, FREE_FILL_BYTE);
                }
            }
            (false, true) => {
                let next = next.unwrap();
                let next_bytes = next.as_ref().data.bytes;
                List::<Chunk>::unlink(next);
                let merged = write_chunk(at, size + next_bytes);
                self.chunks.add_after(merged, prev);
                if fill {
                    fill_bytes(at + CHUNK_HEADER_SIZE, size - CHUNK_HEADER_SIZE, FREE_FILL_BYTE);
                    fill_bytes(next_start, CHUNK_HEADER_SIZE, FREE_FILL_BYTE);
                }
            }
            (false, false) => {
                let fresh = write_chunk(at, size);
                self.chunks.add_after(fresh, prev);
                if fill {
                    fill_bytes(at + CHUNK_HEADER_SIZE, size - CHUNK_HEADER_SIZE, FREE_FILL_BYTE);
                }
            }
        }

        self.free += size;
    }

    /// Largest chunk currently on the freelist. Doubles as a consistency
    /// check: the chunk sizes must add up to the free counter.
    pub(crate) unsafe fn largest_and_verify(&self) -> usize {
        let mut sum = 0;
        let mut largest = 0;
        for chunk in self.chunks.iter() {
            let bytes = chunk.as_ref().data.bytes;
            sum += bytes;
            largest = largest.max(bytes);
        }
        assert_eq!(
            sum, self.free,
            "freelist does not add up to the free counter in region {:?}",
            self.name
        );
        largest
    }

    #[cfg(test)]
    pub(crate) unsafe fn chunk_count(&self) -> usize {
        self.chunks.iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(32))]
    struct Arena<const N: usize>([u8; N]);

    fn arena<const N: usize>() -> Box<Arena<N>> {
        Box::new(Arena([0u8; N]))
    }

    unsafe fn region_in<const N: usize>(arena: &mut Arena<N>, fill: bool) -> &mut Region {
        let base = NonNull::new(arena.0.as_mut_ptr()).unwrap();
        let header = Region::init(base, N, MemFlags::FAST, 0, "test", fill).unwrap();
        &mut (*header.as_ptr()).data
    }

    unsafe fn addr(p: NonNull<u8>) -> usize {
        p.as_ptr() as usize
    }

    #[test]
    fn header_and_capacity_accounting() {
        let mut a = arena::<256>();
        unsafe {
            let region = region_in(&mut a, false);

            // The header eats the front of the arena, block aligned.
            assert_eq!(region.lower() % BLOCK_SIZE, 0);
            assert_eq!(region.upper() - region.lower(), region.total());
            assert_eq!(region.free(), region.total());
            assert_eq!(region.total(), 256 - REGION_HEADER_SIZE);
            assert_eq!(region.chunk_count(), 1);
            assert_eq!(region.largest_and_verify(), region.total());
        }
    }

    #[test]
    fn too_small_memory_is_rejected() {
        let mut a = arena::<64>();
        unsafe {
            let base = NonNull::new(a.0.as_mut_ptr()).unwrap();
            let result = Region::init(base, 64, MemFlags::ANY, 0, "tiny", false);
            assert!(matches!(result, Err(MemError::RegionTooSmall { .. })));
        }
    }

    #[test]
    fn fill_and_drain_one_byte() {
        let mut a = arena::<256>();
        unsafe {
            let region = region_in(&mut a, false);
            let initial = region.free();

            // A single byte still costs a whole block.
            let p = region.allocate(1, MemFlags::ANY, false).unwrap();
            assert_eq!(region.free(), initial - BLOCK_SIZE);

            region.deallocate(p, 1, false);
            assert_eq!(region.free(), initial);
            assert_eq!(region.chunk_count(), 1);
            assert_eq!(region.largest_and_verify(), initial);
        }
    }

    #[test]
    fn forward_allocations_grow_from_the_bottom() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let lower = region.lower();

            let b0 = region.allocate(64, MemFlags::ANY, false).unwrap();
            let b1 = region.allocate(64, MemFlags::ANY, false).unwrap();
            let b2 = region.allocate(64, MemFlags::ANY, false).unwrap();

            assert_eq!(addr(b0), lower);
            assert_eq!(addr(b1), lower + 64);
            assert_eq!(addr(b2), lower + 128);
        }
    }

    #[test]
    fn reverse_allocations_grow_from_the_top() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let upper = region.upper();

            let p = region.allocate(64, MemFlags::REVERSE, false).unwrap();
            let q = region.allocate(32, MemFlags::REVERSE, false).unwrap();

            assert_eq!(addr(p), upper - 64);
            assert_eq!(addr(q), upper - 96);
        }
    }

    #[test]
    fn first_fit_carves_the_matching_end_of_a_hole() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let total = region.total();

            // Three 64 byte blocks, then the rest, so that nothing but the
            // hole we poke is free.
            let _b0 = region.allocate(64, MemFlags::ANY, false).unwrap();
            let b1 = region.allocate(64, MemFlags::ANY, false).unwrap();
            let _b2 = region.allocate(64, MemFlags::ANY, false).unwrap();
            let _rest = region.allocate(total - 192, MemFlags::ANY, false).unwrap();
            assert_eq!(region.free(), 0);

            region.deallocate(b1, 64, false);
            assert_eq!(region.free(), 64);

            // Forward first-fit takes the front of the hole.
            let front = region.allocate(32, MemFlags::ANY, false).unwrap();
            assert_eq!(addr(front), addr(b1));

            // Put it back (it merges with the remaining half of the hole)
            // and take the back of the hole instead.
            region.deallocate(front, 32, false);
            assert_eq!(region.chunk_count(), 1);
            let back = region.allocate(32, MemFlags::REVERSE, false).unwrap();
            assert_eq!(addr(back), addr(b1) + 32);
        }
    }

    #[test]
    fn freeing_the_middle_merges_both_sides() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let total = region.total();

            let b0 = region.allocate(32, MemFlags::ANY, false).unwrap();
            let b1 = region.allocate(32, MemFlags::ANY, false).unwrap();
            let b2 = region.allocate(32, MemFlags::ANY, false).unwrap();
            let _rest = region.allocate(total - 96, MemFlags::ANY, false).unwrap();
            assert_eq!(region.free(), 0);

            region.deallocate(b0, 32, false);
            region.deallocate(b2, 32, false);
            assert_eq!(region.chunk_count(), 2);
            assert_eq!(region.free(), 64);

            // The middle block bridges both chunks into one.
            region.deallocate(b1, 32, false);
            assert_eq!(region.chunk_count(), 1);
            assert_eq!(region.free(), 96);
            assert_eq!(region.largest_and_verify(), 96);
        }
    }

    #[test]
    fn exact_fit_unlinks_the_chunk() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, false);
            let total = region.total();

            let p = region.allocate(total, MemFlags::ANY, false).unwrap();
            assert_eq!(region.free(), 0);
            assert_eq!(region.chunk_count(), 0);
            assert!(region.allocate(1, MemFlags::ANY, false).is_none());

            region.deallocate(p, total, false);
            assert_eq!(region.chunk_count(), 1);
            assert_eq!(region.free(), total);
        }
    }

    #[test]
    fn zero_and_oversized_requests_yield_nothing() {
        let mut a = arena::<256>();
        unsafe {
            let region = region_in(&mut a, false);
            assert!(region.allocate(0, MemFlags::ANY, false).is_none());
            assert!(region
                .allocate(region.total() + 1, MemFlags::ANY, false)
                .is_none());
            // Rounding may push a fitting request over the edge.
            let total = region.total();
            let p = region.allocate(total - 16, MemFlags::ANY, false);
            assert_eq!(addr(p.unwrap()), region.lower());
            assert_eq!(region.free(), 0);
        }
    }

    #[test]
    fn odd_sizes_are_rounded_to_blocks() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, false);
            let initial = region.free();
            let p = region.allocate(33, MemFlags::ANY, false).unwrap();
            assert_eq!(region.free(), initial - 64);
            region.deallocate(p, 33, false);
            assert_eq!(region.free(), initial);
        }
    }

    #[test]
    fn absolute_allocation_carves_inside_one_chunk() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let lower = region.lower();
            let total = region.total();

            let target = lower + 96;
            let p = region
                .allocate_abs(64, target, MemFlags::ANY, false)
                .unwrap();
            assert_eq!(addr(p), target);
            assert_eq!(region.free(), total - 64);
            assert_eq!(region.chunk_count(), 2);

            // The exact same spot is taken now.
            assert!(region
                .allocate_abs(64, target, MemFlags::ANY, false)
                .is_none());

            // Unaligned locations land on the previous block boundary.
            let q = region
                .allocate_abs(32, lower + 37, MemFlags::ANY, false)
                .unwrap();
            assert_eq!(addr(q), lower + 32);

            region.deallocate(p, 64, false);
            region.deallocate(q, 32, false);
            assert_eq!(region.free(), total);
            assert_eq!(region.chunk_count(), 1);
        }
    }

    #[test]
    fn absolute_allocation_at_chunk_boundaries() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);
            let lower = region.lower();

            // Consume the very start of the region: the chunk shrinks in
            // place, no new chunk appears.
            let p = region.allocate_abs(96, lower, MemFlags::ANY, false).unwrap();
            assert_eq!(addr(p), lower);
            assert_eq!(region.chunk_count(), 1);

            region.deallocate(p, 96, false);
            assert_eq!(region.chunk_count(), 1);
        }
    }

    #[test]
    fn aligned_allocation_respects_the_mask() {
        let mut a = arena::<1024>();
        unsafe {
            let region = region_in(&mut a, false);

            // Push the free chunk off any 64 byte boundary first.
            let _pad = region.allocate(32, MemFlags::ANY, false).unwrap();

            let p = region
                .allocate_abs(96, 6, MemFlags::ALIGN, false)
                .unwrap();
            assert_eq!(addr(p) % 64, 0);
            assert!(region.contains(addr(p)));

            // Reverse aligned allocation comes from the top of the region.
            let q = region
                .allocate_abs(64, 6, MemFlags::ALIGN | MemFlags::REVERSE, false)
                .unwrap();
            assert_eq!(addr(q) % 64, 0);
            assert_eq!(addr(q), (region.upper() - 64) & !63);
        }
    }

    #[test]
    fn small_alignment_exponents_fall_back_to_the_block_mask() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, false);
            // Exponent 1 would mean 2 byte alignment, but blocks are the
            // minimum resolution.
            let p = region.allocate_abs(32, 1, MemFlags::ALIGN, false).unwrap();
            assert_eq!(addr(p) % BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn clear_zeroes_and_fill_paints_allocations() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, true);

            let p = region.allocate(64, MemFlags::ANY, true).unwrap();
            for i in 0..64 {
                assert_eq!(*p.as_ptr().add(i), ALLOC_FILL_BYTE);
            }

            let q = region.allocate(64, MemFlags::CLEAR, true).unwrap();
            for i in 0..64 {
                assert_eq!(*q.as_ptr().add(i), 0);
            }

            // Freed memory is painted beyond the chunk header that now
            // squats in it.
            region.deallocate(p, 64, true);
            for i in CHUNK_HEADER_SIZE..64 {
                assert_eq!(*p.as_ptr().add(i), FREE_FILL_BYTE);
            }
        }
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn double_free_trips_the_overlap_check() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, false);
            let p = region.allocate(64, MemFlags::ANY, false).unwrap();
            region.deallocate(p, 64, false);
            region.deallocate(p, 64, false);
        }
    }

    #[test]
    #[should_panic(expected = "outside region")]
    fn freeing_out_of_bounds_is_a_fault() {
        let mut a = arena::<512>();
        let mut elsewhere = arena::<64>();
        unsafe {
            let region = region_in(&mut a, false);
            let bogus = NonNull::new(elsewhere.0.as_mut_ptr()).unwrap();
            region.deallocate(bogus, 32, false);
        }
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn freeing_an_unaligned_block_is_a_fault() {
        let mut a = arena::<512>();
        unsafe {
            let region = region_in(&mut a, false);
            let p = region.allocate(64, MemFlags::ANY, false).unwrap();
            let skewed = NonNull::new(p.as_ptr().add(8)).unwrap();
            region.deallocate(skewed, 32, false);
        }
    }
}
