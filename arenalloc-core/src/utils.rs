//! A collection of utilities.

use core::ptr::{self, NonNull};

mod power_of_2;

pub use power_of_2::PowerOf2;

/// Returns the floor of the base-2 logarithm of `n`.
///
/// `n` must be non-zero.
pub(crate) const fn lg_floor(n: usize) -> u32 {
    debug_assert!(n != 0);

    usize::BITS - 1 - n.leading_zeros()
}

/// Fills `size` bytes at `pointer` with `byte`.
///
/// #   Safety
///
/// -   Assumes that `[pointer, pointer + size)` is writable.
pub(crate) unsafe fn fill(pointer: NonNull<u8>, size: usize, byte: u8) {
    ptr::write_bytes(pointer.as_ptr(), byte, size);
}

/// Returns whether the `size` bytes at `pointer` all equal `byte`.
///
/// #   Safety
///
/// -   Assumes that `[pointer, pointer + size)` is readable.
pub(crate) unsafe fn is_filled_with(pointer: NonNull<u8>, size: usize, byte: u8) -> bool {
    core::slice::from_raw_parts(pointer.as_ptr(), size).iter().all(|b| *b == byte)
}
