use std::{mem, ptr, ptr::NonNull};

use crate::chunk::{BLOCK_SIZE, FREE_FILL_BYTE};

/// Magic word sitting immediately below every guarded user pointer, stored
/// big-endian.
pub const MUNGWALL_LO: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// Magic word sitting immediately after every guarded user area, stored
/// big-endian.
pub const MUNGWALL_HI: u64 = 0xCAFE_CAFE_CAFE_CAFE;

const WORD: usize = mem::size_of::<u64>();

/// Bytes added after the user area for the high magic.
pub(crate) const TRAILER_SIZE: usize = WORD;

/// Size of the guard block placed in front of the user area. It must keep
/// the user pointer aligned, so aligned allocations get a whole alignment
/// unit instead of a single block.
///
/// The last three words of the front block carry the recovery data:
///
/// ```text
/// raw                                                user            user + size
/// +--------------------+----------+-----------+-----------+---------+------+
/// |      padding       | raw addr | full size | LO magic  | user    |  HI  |
/// +--------------------+----------+-----------+-----------+ area    | magic|
///                      user-3W    user-2W     user-1W     +---------+------+
/// ```
pub(crate) fn front_size(align_exp: Option<u32>) -> usize {
    match align_exp {
        Some(exp) => (1usize << exp).max(BLOCK_SIZE),
        None => BLOCK_SIZE,
    }
}

/// Total overhead a guarded allocation adds on top of the requested size.
pub(crate) fn extra_size(align_exp: Option<u32>) -> usize {
    front_size(align_exp) + TRAILER_SIZE
}

/// Decorates a raw allocation of `full_size` bytes and returns the user
/// pointer, `front` bytes in.
///
/// # Safety
///
/// `raw` must point at a live allocation of at least `full_size` bytes with
/// `front + user_size + TRAILER_SIZE <= full_size`, and `front` must be at
/// least three words.
pub(crate) unsafe fn install(
    raw: NonNull<u8>,
    front: usize,
    full_size: usize,
    user_size: usize,
) -> NonNull<u8> {
    debug_assert!(front >= 3 * WORD);
    debug_assert!(front + user_size + TRAILER_SIZE <= full_size);

    let user = raw.as_ptr().add(front);
    ptr::write_unaligned(user.sub(3 * WORD) as *mut u64, raw.as_ptr() as u64);
    ptr::write_unaligned(user.sub(2 * WORD) as *mut u64, full_size as u64);
    ptr::copy_nonoverlapping(MUNGWALL_LO.to_be_bytes().as_ptr(), user.sub(WORD), WORD);
    ptr::copy_nonoverlapping(MUNGWALL_HI.to_be_bytes().as_ptr(), user.add(user_size), WORD);

    NonNull::new_unchecked(user)
}

/// Checks both guard words of a decorated allocation and recovers the raw
/// address and full size. The magics are scrubbed with the free pattern so
/// that a second free of the same pointer trips the check again.
///
/// A damaged guard word is a fault: the dump goes to the log and the call
/// panics.
///
/// # Safety
///
/// `user` must have been produced by [`install`] with the same `user_size`.
pub(crate) unsafe fn verify_and_strip(user: NonNull<u8>, user_size: usize) -> (NonNull<u8>, usize) {
    let p = user.as_ptr();

    let mut lo = [0u8; WORD];
    let mut hi = [0u8; WORD];
    ptr::copy_nonoverlapping(p.sub(WORD), lo.as_mut_ptr(), WORD);
    ptr::copy_nonoverlapping(p.add(user_size), hi.as_mut_ptr(), WORD);

    if lo != MUNGWALL_LO.to_be_bytes() || hi != MUNGWALL_HI.to_be_bytes() {
        log::error!(
            "guard words around {p:p} (size {user_size}) damaged: \
             low {lo:02x?} (expected {:02x?}), high {hi:02x?} (expected {:02x?})",
            MUNGWALL_LO.to_be_bytes(),
            MUNGWALL_HI.to_be_bytes(),
        );
        panic!("memory corruption around allocation at {p:p}");
    }

    let raw = ptr::read_unaligned(p.sub(3 * WORD) as *const u64) as usize;
    let full_size = ptr::read_unaligned(p.sub(2 * WORD) as *const u64) as usize;
    debug_assert!(raw < p as usize);
    debug_assert!(full_size >= user_size);

    ptr::write_bytes(p.sub(WORD), FREE_FILL_BYTE, WORD);
    ptr::write_bytes(p.add(user_size), FREE_FILL_BYTE, WORD);

    (NonNull::new_unchecked(raw as *mut u8), full_size)
}
