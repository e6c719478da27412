use crate::flags::{HandlerFlags, MemFlags};

/// What a low-memory handler reports back to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    /// Nothing was freed; move on to the next handler.
    DidNothing,
    /// Something may have been freed; retry the allocation and come back to
    /// this handler before advancing.
    TryAgain,
    /// This handler is spent for the current attempt; retry the allocation
    /// and advance past it next time.
    AllDone,
}

impl HandlerStatus {
    pub const DID_NOTHING: i32 = 0;
    pub const TRY_AGAIN: i32 = 1;
    pub const ALL_DONE: i32 = -1;

    pub const fn code(self) -> i32 {
        match self {
            Self::DidNothing => Self::DID_NOTHING,
            Self::TryAgain => Self::TRY_AGAIN,
            Self::AllDone => Self::ALL_DONE,
        }
    }

    /// Decodes a raw status code. Anything unknown counts as
    /// [`HandlerStatus::DidNothing`].
    pub const fn from_code(code: i32) -> Self {
        match code {
            Self::TRY_AGAIN => Self::TryAgain,
            Self::ALL_DONE => Self::AllDone,
            _ => Self::DidNothing,
        }
    }
}

/// Snapshot of the failing request, handed to each handler invocation.
#[derive(Debug, Clone)]
pub struct MemHandlerData {
    /// Requested size in bytes, including any guard overhead.
    pub size: usize,
    /// Alignment exponent of the failing request, if it was an aligned one.
    pub align_exp: Option<u32>,
    /// Flags of the failing request.
    pub flags: MemFlags,
    /// The invoked handler's own state bits.
    pub handler_flags: HandlerFlags,
}

/// A reclaim capability. Installed with [`crate::ExecMem::add_handler`] and
/// invoked, highest priority first, whenever an allocation cannot be
/// satisfied from any region.
///
/// Handlers run with the allocator locked and therefore must not call back
/// into it; they release resources they hold themselves (caches, pools,
/// region memory they track) and report what happened.
pub trait LowMemHandler: Send {
    fn low_memory(&mut self, data: &MemHandlerData) -> HandlerStatus;
}

/// Placeholder system policy. There is nothing generic worth reclaiming in
/// userspace, so it always reports [`HandlerStatus::DidNothing`].
pub struct SystemMemHandler;

impl LowMemHandler for SystemMemHandler {
    fn low_memory(&mut self, _data: &MemHandlerData) -> HandlerStatus {
        HandlerStatus::DidNothing
    }
}

/// A registered handler as the allocator tracks it.
pub(crate) struct HandlerEntry {
    pub pri: i32,
    pub name: &'static str,
    pub flags: HandlerFlags,
    pub hook: Box<dyn LowMemHandler>,
}
