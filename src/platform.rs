//! Page-grade memory from the host OS. The allocator itself never maps
//! anything: region memory belongs to whoever registers it. This module is
//! for callers who have no better source, wrapping the platform page
//! allocator in an arena that can be handed straight to
//! [`crate::ExecMem::add_region`].

use std::ptr::NonNull;

use crate::Pointer;

/// What we need from the underlying OS: whole pages in, whole pages out.
/// The rest of the crate does not care which API that is.
trait HostPages {
    /// Requests `length` bytes of fresh, writable pages.
    unsafe fn request(length: usize) -> Pointer<u8>;

    /// Hands `length` bytes starting at `address` back to the OS.
    unsafe fn release(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`HostPages`] for each OS.
struct Host;

/// Virtual memory page size. 4096 bytes on most computers. This should be a
/// constant but we don't know the value at compile time.
static mut PAGE_SIZE: usize = 0;

/// We only learn the page size at runtime from the platform, so the first
/// call stores it in a global and everyone after that reuses it.
#[inline]
pub(crate) fn page_size() -> usize {
    unsafe {
        if PAGE_SIZE == 0 {
            PAGE_SIZE = Host::page_size();
        }
        PAGE_SIZE
    }
}

/// A page-backed arena: whole pages requested from the OS on creation and
/// returned on drop. Page alignment comfortably exceeds the block quantum,
/// so the base can go straight into [`crate::ExecMem::add_region`]. The
/// arena must outlive the registration, the usual region contract.
pub struct HostRegion {
    base: NonNull<u8>,
    len: usize,
}

impl HostRegion {
    /// Maps enough whole pages to cover `min_len` bytes. `None` when the OS
    /// refuses.
    pub fn with_capacity(min_len: usize) -> Option<Self> {
        let page = page_size();
        let len = min_len.div_ceil(page).max(1) * page;
        let base = unsafe { Host::request(len)? };
        Some(Self { base, len })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for HostRegion {
    fn drop(&mut self) {
        unsafe { Host::release(self.base, self.len) };
    }
}

// Pages belong to the process, not to the thread that mapped them.
unsafe impl Send for HostRegion {}
unsafe impl Sync for HostRegion {}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Host, HostPages};
    use crate::Pointer;

    impl HostPages for Host {
        unsafe fn request(length: usize) -> Pointer<u8> {
            // Read-write, private to this process, not backed by a file.
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // The pages stay mapped; nothing sensible to do beyond
                // making some noise.
                log::warn!("munmap of {length} bytes at {address:p} failed");
            }
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Host, HostPages};
    use crate::Pointer;

    impl HostPages for Host {
        unsafe fn request(length: usize) -> Pointer<u8> {
            // Reserve and commit in one go; the equivalent of an anonymous
            // private mapping.
            let protection = Memory::PAGE_READWRITE;
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn release(address: NonNull<u8>, _length: usize) {
            // Length zero plus MEM_RELEASE frees the whole reservation.
            let address = address.cast().as_ptr();

            if !Memory::VirtualFree(address, 0, Memory::MEM_RELEASE).as_bool() {
                log::warn!("VirtualFree of {address:p} failed");
            }
        }

        unsafe fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(miri)]
mod miri {
    //! Miri has no FFI, so pages come from the global allocator instead.
    //! This doubles as a leak check for arenas that are never dropped.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Host, HostPages};
    use crate::Pointer;

    fn layout_for(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, page_size()).unwrap()
    }

    impl HostPages for Host {
        unsafe fn request(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(layout_for(length)))
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), layout_for(length));
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
