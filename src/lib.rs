//! Region-based freelist allocator with guard words and a pluggable
//! low-memory handler chain, in the style of a classic microkernel memory
//! subsystem brought to userspace.
//!
//! Callers register memory regions tagged with attribute bits and a
//! priority; allocations name a size and the attributes they require, and
//! the highest-priority region with room wins. Blocks can also be placed at
//! an absolute address or on a power-of-two boundary. When no region can
//! satisfy a request, a priority-ordered chain of user-installed reclaim
//! handlers gets a chance to free memory before the allocator reports
//! failure. Optional guard words (the mungwall) around every allocation
//! turn buffer overruns and double frees into immediate, loud faults.
//!
//! ```rust
//! use execmem::{ExecMem, HostRegion, MemFlags};
//!
//! let arena = HostRegion::with_capacity(64 * 1024).expect("no pages");
//! let mem = ExecMem::new();
//!
//! let region = unsafe {
//!     mem.add_region(arena.base(), arena.len(), MemFlags::FAST, 0, "main")
//!         .expect("arena too small")
//! };
//!
//! let block = mem.alloc(256, MemFlags::CLEAR).expect("out of memory");
//! assert_eq!(mem.type_of(block), MemFlags::FAST);
//!
//! unsafe {
//!     mem.free(block, 256);
//!     mem.rem_region(region).expect("still allocated");
//! }
//! ```

use std::ptr::NonNull;

use thiserror::Error;

mod allocator;
mod chunk;
mod entries;
mod flags;
mod handler;
mod list;
mod mungwall;
mod platform;
mod region;

/// Non-null pointer to `T`. We use this in most places instead of `*mut T`
/// because the compiler will yell at us if we forget to handle the `None`
/// case, and out-of-memory is exactly a `None`.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Failures of the management surface. Out of memory is not an error here,
/// it is a `None` from the allocation calls; these are the ways region and
/// handler bookkeeping can refuse.
#[derive(Debug, Error)]
pub enum MemError {
    /// The memory handed to `add_region` cannot hold a region header and at
    /// least one block.
    #[error("memory too small for a region ({size} bytes)")]
    RegionTooSmall { size: usize },

    /// `rem_region` on a region that still has live allocations.
    #[error("region {name:?} still has {outstanding} bytes allocated")]
    RegionBusy {
        name: &'static str,
        outstanding: usize,
    },

    /// `rem_handler` with a name nobody registered.
    #[error("no low-memory handler named {name:?}")]
    HandlerNotFound { name: String },

    /// The allocator mutex was poisoned by an earlier fault.
    #[error("allocator poisoned by an earlier fault")]
    Poisoned,
}

pub use allocator::{Config, ExecMem, RegionHandle};
pub use chunk::{ALLOC_FILL, BLOCK_EXP, BLOCK_SIZE, FREE_FILL};
pub use entries::{MemEntries, MemEntry};
pub use flags::{HandlerFlags, MemFlags};
pub use handler::{HandlerStatus, LowMemHandler, MemHandlerData, SystemMemHandler};
pub use mungwall::{MUNGWALL_HI, MUNGWALL_LO};
pub use platform::HostRegion;
