use std::{mem, ptr, ptr::NonNull};

use crate::list::Node;

/// The allocation quantum. Every request is rounded up to a multiple of this
/// and every free chunk starts on a multiple of it, so a one byte request
/// still consumes a full block.
pub const BLOCK_SIZE: usize = 32;

/// `BLOCK_SIZE == 1 << BLOCK_EXP`.
pub const BLOCK_EXP: u32 = 5;

pub(crate) const BLOCK_MASK: usize = BLOCK_SIZE - 1;

/// Pattern written over freshly allocated blocks when fill patterns are
/// enabled and the caller did not ask for cleared memory.
pub const ALLOC_FILL: u64 = 0xAAAA_AAAA_AAAA_AAAA;

/// Pattern written over freed memory when fill patterns are enabled.
pub const FREE_FILL: u64 = 0x5555_5555_5555_5555;

pub(crate) const ALLOC_FILL_BYTE: u8 = 0xAA;
pub(crate) const FREE_FILL_BYTE: u8 = 0x55;

/// Freelist payload. The complete free chunk header is [`FreeChunk`], which
/// lives *inside* the free memory it describes, right at its start. Nobody
/// else points at free memory, so squatting there is fair game and keeps the
/// bookkeeping overhead of a free region at zero.
///
/// ```text
///          +----------------------+
/// chunk -> | succ / pred links    |  <-+
///          +----------------------+    | FreeChunk (one block at most)
///          | bytes                |  <-+
///          +----------------------+
///          | free memory          |
///          |        ...           |
///          +----------------------+  <- chunk + bytes
/// ```
///
/// `bytes` counts the whole run including the header itself and is always a
/// multiple of [`BLOCK_SIZE`].
pub(crate) struct Chunk {
    pub bytes: usize,
}

pub(crate) type FreeChunk = Node<Chunk>;

/// A chunk header must fit in the smallest thing we ever carve out.
const _: () = assert!(mem::size_of::<FreeChunk>() <= BLOCK_SIZE);

pub(crate) const CHUNK_HEADER_SIZE: usize = mem::size_of::<FreeChunk>();

/// Rounds a request up to the allocation quantum.
pub(crate) const fn round_to_block(bytes: usize) -> usize {
    (bytes + BLOCK_MASK) & !BLOCK_MASK
}

pub(crate) unsafe fn chunk_addr(chunk: NonNull<FreeChunk>) -> usize {
    chunk.as_ptr() as usize
}

pub(crate) unsafe fn chunk_end(chunk: NonNull<FreeChunk>) -> usize {
    chunk_addr(chunk) + chunk.as_ref().data.bytes
}

/// Writes a fresh, unlinked chunk header at `at`.
///
/// # Safety
///
/// `[at, at + bytes)` must be writable memory that nothing else points at,
/// and `at` must be block aligned.
pub(crate) unsafe fn write_chunk(at: usize, bytes: usize) -> NonNull<FreeChunk> {
    debug_assert_eq!(at & BLOCK_MASK, 0);
    debug_assert_eq!(bytes & BLOCK_MASK, 0);
    let chunk = at as *mut FreeChunk;
    ptr::write(chunk, Node::new(Chunk { bytes }));
    NonNull::new_unchecked(chunk)
}

/// Fills `[at, at + len)` with `pattern`.
pub(crate) unsafe fn fill_bytes(at: usize, len: usize, pattern: u8) {
    ptr::write_bytes(at as *mut u8, pattern, len);
}
