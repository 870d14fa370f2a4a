//! Chunks
//!
//! Chunk-aligned reservations from the platform, with a bounded recycle list of single chunks.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{Platform, PowerOf2};
use crate::internals::mutex::Mutex;

/// Capacity of the recycle list.
pub(crate) const RECYCLE_CAPACITY: usize = 16;

/// A reserved chunk.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reserved {
    pub(crate) pointer: NonNull<u8>,
    /// Whether the memory is known to be zero-filled.
    pub(crate) zeroed: bool,
}

/// Chunk reservations.
pub(crate) struct Chunks {
    chunk: AtomicUsize,
    mapped: AtomicUsize,
    recycle: Mutex<Recycle>,
}

struct Recycle {
    chunks: [*mut u8; RECYCLE_CAPACITY],
    length: usize,
}

//  Safety:
//  -   The recycled chunks are owned by the list.
unsafe impl Send for Recycle {}

impl Chunks {
    /// Creates an instance, not booted yet.
    pub(crate) const fn new() -> Self {
        Self {
            chunk: AtomicUsize::new(0),
            mapped: AtomicUsize::new(0),
            recycle: Mutex::new(Recycle { chunks: [ptr::null_mut(); RECYCLE_CAPACITY], length: 0 }),
        }
    }

    /// Boots, returns false if the platform cannot provide chunks.
    pub(crate) fn boot<P: Platform>(&self, platform: &P, chunk: PowerOf2) -> bool {
        if !platform.boot() {
            return false;
        }

        self.chunk.store(chunk.value(), Ordering::Relaxed);
        true
    }

    /// Returns the number of bytes currently reserved from the platform.
    pub(crate) fn mapped(&self) -> usize { self.mapped.load(Ordering::Relaxed) }

    /// Reserves `size` bytes, aligned on at least the chunk size.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `size` is a non-zero multiple of the chunk size.
    pub(crate) unsafe fn reserve<P: Platform>(&self, platform: &P, size: usize, alignment: PowerOf2)
        -> Option<Reserved>
    {
        let chunk = self.chunk_size();
        let alignment = if alignment > chunk { alignment } else { chunk };

        debug_assert!(size != 0 && chunk.is_aligned(size));

        if size == chunk.value() && alignment == chunk {
            let mut recycle = self.recycle.lock();

            if recycle.length > 0 {
                recycle.length -= 1;
                let pointer = recycle.chunks[recycle.length];

                //  Safety:
                //  -   Only non-null pointers are pushed.
                return Some(Reserved { pointer: NonNull::new_unchecked(pointer), zeroed: false });
            }
        }

        let pointer = platform.reserve_chunk(size, alignment)?;
        debug_assert!(alignment.is_aligned(pointer.as_ptr() as usize));

        self.mapped.fetch_add(size, Ordering::Relaxed);

        Some(Reserved { pointer, zeroed: true })
    }

    /// Releases `size` bytes at `pointer`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` was reserved by `reserve`, with `size` as argument.
    pub(crate) unsafe fn release<P: Platform>(&self, platform: &P, pointer: NonNull<u8>, size: usize) {
        if size == self.chunk_size().value() {
            let mut recycle = self.recycle.lock();

            if recycle.length < RECYCLE_CAPACITY {
                let length = recycle.length;
                recycle.chunks[length] = pointer.as_ptr();
                recycle.length += 1;
                return;
            }
        }

        self.mapped.fetch_sub(size, Ordering::Relaxed);
        platform.release_chunk(pointer, size);
    }

    pub(crate) fn prefork(&self) { self.recycle.prefork(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_parent(&self) { self.recycle.postfork_parent(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_child(&self) { self.recycle.postfork_child(); }

    fn chunk_size(&self) -> PowerOf2 {
        PowerOf2::new(self.chunk.load(Ordering::Relaxed)).unwrap_or(crate::SizeClasses::DEFAULT.chunk_size())
    }
}

#[cfg(test)]
mod tests {

use super::*;
use crate::internals::test::TestPlatform;

#[test]
fn chunks_recycle_single_chunks() {
    let platform = TestPlatform::default();
    let chunk = PowerOf2::new(64 * 1024).unwrap();

    let chunks = Chunks::new();
    assert!(chunks.boot(&platform, chunk));

    unsafe {
        let first = chunks.reserve(&platform, chunk.value(), PowerOf2::ONE).unwrap();
        assert!(first.zeroed);
        assert!(chunk.is_aligned(first.pointer.as_ptr() as usize));

        chunks.release(&platform, first.pointer, chunk.value());
        assert_eq!(1, platform.reserved_count());

        let second = chunks.reserve(&platform, chunk.value(), PowerOf2::ONE).unwrap();
        assert_eq!(first.pointer, second.pointer);
        assert!(!second.zeroed);

        let double = chunks.reserve(&platform, 2 * chunk.value(), PowerOf2::ONE).unwrap();
        assert!(double.zeroed);
        assert_eq!(3 * chunk.value(), chunks.mapped());

        chunks.release(&platform, double.pointer, 2 * chunk.value());
        assert_eq!(chunk.value(), chunks.mapped());
        assert_eq!(1, platform.reserved_count());
    }
}

#[test]
fn chunks_boot_failure() {
    let platform = TestPlatform::default();
    platform.fail_boot(true);

    assert!(!Chunks::new().boot(&platform, PowerOf2::new(64 * 1024).unwrap()));
}

#[test]
fn chunks_reserve_failure() {
    let platform = TestPlatform::default();
    let chunk = PowerOf2::new(64 * 1024).unwrap();

    let chunks = Chunks::new();
    assert!(chunks.boot(&platform, chunk));

    platform.fail_reservations(true);

    assert!(unsafe { chunks.reserve(&platform, chunk.value(), PowerOf2::ONE) }.is_none());
}

}
