use bitflags::bitflags;

bitflags! {
    /// Allocation attributes and options. The low 16 bits are *requirement*
    /// bits: a region satisfies a request iff it carries every requirement
    /// bit the request names. The high bits are *options* that steer a
    /// single call and are never stored on a region.
    ///
    /// The bit positions are part of the stable API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        /// Memory shareable with other tasks.
        const PUBLIC = 1 << 0;
        /// Memory reachable by the display hardware.
        const VIDEO = 1 << 1;
        /// CPU-only memory, preferred for general allocations.
        const FAST = 1 << 2;
        /// Memory backed by a pager rather than real frames.
        const VIRTUAL = 1 << 3;
        /// Memory that survives a soft reboot.
        const PERMANENT = 1 << 4;

        /// Zero the block before returning it.
        const CLEAR = 1 << 16;
        /// `avail_mem` only: report the largest contiguous chunk.
        const LARGEST = 1 << 17;
        /// Allocate from the top of the region instead of the bottom.
        const REVERSE = 1 << 18;
        /// `avail_mem` only: report total capacity instead of free bytes.
        const TOTAL = 1 << 19;
        /// Interpret the location argument as an alignment exponent.
        const ALIGN = 1 << 20;
        /// Fail immediately instead of running the low-memory handlers.
        const NO_EXPUNGE = 1 << 31;
    }
}

impl MemFlags {
    /// Matches every region.
    pub const ANY: MemFlags = MemFlags::empty();

    /// Mask selecting the requirement bits.
    pub const MASK_REQ: u32 = 0xFFFF;

    /// The requirement bits of this value.
    pub fn requirements(self) -> u32 {
        self.bits() & Self::MASK_REQ
    }

    /// Whether a region with these attributes satisfies `request`. Only the
    /// requirement bits participate; `ANY` matches everything.
    pub(crate) fn satisfies(self, request: MemFlags) -> bool {
        self.bits() & request.requirements() == request.requirements()
    }
}

bitflags! {
    /// Per-handler state bits, visible to the handler itself through
    /// [`crate::MemHandlerData`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandlerFlags: u32 {
        /// The handler asked to be reinvoked on the next retry before the
        /// chain cursor advances.
        const RECYCLE = 1 << 0;
    }
}
