//! Base
//!
//! Bump allocator for the internal metadata of the heap: arenas, the arena array, thread states, thread caches,
//! huge nodes and the profiler table.
//!
//! Memory is carved out of chunks reserved directly from the platform, it is never returned. Nodes of fixed kinds are
//! recycled through per-kind free lists.
//!
//! The base lock is the innermost lock but for the huge lock, and no other lock is ever taken under it.

use core::{
    alloc::Layout,
    cmp,
    mem,
    ptr::{self, NonNull},
};

use crate::{Platform, PowerOf2};
use crate::internals::mutex::Mutex;

/// Kinds of recycled nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NodeKind {
    ThreadState = 0,
    Tcache = 1,
    Huge = 2,
}

const NODE_KINDS: usize = 3;

struct FreeNode {
    next: *mut FreeNode,
}

/// Bump allocator.
pub(crate) struct Base {
    inner: Mutex<BaseInner>,
}

struct BaseInner {
    granularity: usize,
    next: usize,
    end: usize,
    mapped: usize,
    allocated: usize,
    free: [*mut FreeNode; NODE_KINDS],
}

//  Safety:
//  -   The free nodes are owned by the lists.
unsafe impl Send for BaseInner {}

impl Base {
    /// Creates an instance, not booted yet.
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(BaseInner {
                granularity: 0,
                next: 0,
                end: 0,
                mapped: 0,
                allocated: 0,
                free: [ptr::null_mut(); NODE_KINDS],
            }),
        }
    }

    /// Boots, reserving memory in multiples of `chunk`.
    pub(crate) fn boot(&self, chunk: PowerOf2) { self.inner.lock().granularity = chunk.value(); }

    /// Returns the number of bytes reserved, and the number handed out.
    pub(crate) fn usage(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.mapped, inner.allocated)
    }

    /// Allocates zero-filled memory for `layout`.
    ///
    /// Returns `None` if the platform is out of memory.
    pub(crate) fn alloc<P: Platform>(&self, platform: &P, layout: Layout) -> Option<NonNull<u8>> {
        let mut inner = self.inner.lock();

        let align = cmp::max(layout.align(), mem::align_of::<usize>());
        let mut start = round_up(inner.next, align)?;

        if inner.next == 0 || start.checked_add(layout.size())? > inner.end {
            let granularity = PowerOf2::new(inner.granularity)?;
            let size = granularity.checked_round_up(layout.size().checked_add(align)?)?;

            //  Safety:
            //  -   `size` is a non-zero multiple of the granularity, itself a multiple of the page size.
            let chunk = unsafe { platform.reserve_chunk(size, granularity)? };

            inner.next = chunk.as_ptr() as usize;
            inner.end = inner.next + size;
            inner.mapped += size;

            start = round_up(inner.next, align)?;
        }

        inner.next = start + layout.size();
        inner.allocated += layout.size();

        NonNull::new(start as *mut u8)
    }

    /// Allocates a node of type `T`, recycled from the free list of `kind` if possible.
    ///
    /// The memory is uninitialized.
    pub(crate) fn alloc_node<P: Platform, T>(&self, platform: &P, kind: NodeKind) -> Option<NonNull<T>> {
        debug_assert!(mem::size_of::<T>() >= mem::size_of::<FreeNode>());

        {
            let mut inner = self.inner.lock();
            let head = inner.free[kind as usize];

            if let Some(head) = NonNull::new(head) {
                //  Safety:
                //  -   Free nodes are only pushed by `free_node`, and are not otherwise referenced.
                inner.free[kind as usize] = unsafe { head.as_ref().next };
                return Some(head.cast());
            }
        }

        self.alloc(platform, Layout::new::<T>()).map(NonNull::cast)
    }

    /// Recycles a node of type `T` into the free list of `kind`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `node` was allocated by `alloc_node` with the same `T` and `kind`.
    /// -   Assumes that `node` is no longer referenced.
    pub(crate) unsafe fn free_node<T>(&self, kind: NodeKind, node: NonNull<T>) {
        let mut inner = self.inner.lock();

        let node: NonNull<FreeNode> = node.cast();
        ptr::write(node.as_ptr(), FreeNode { next: inner.free[kind as usize] });

        inner.free[kind as usize] = node.as_ptr();
    }

    /// Abandons the remainder of the current chunk.
    #[cfg(test)]
    pub(crate) fn exhaust(&self) {
        let mut inner = self.inner.lock();
        inner.next = inner.end;
    }

    pub(crate) fn prefork(&self) { self.inner.prefork(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_parent(&self) { self.inner.postfork_parent(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_child(&self) { self.inner.postfork_child(); }
}

fn round_up(n: usize, align: usize) -> Option<usize> { PowerOf2::new(align)?.checked_round_up(n) }

#[cfg(test)]
mod tests {

use super::*;
use crate::internals::test::TestPlatform;

#[test]
fn base_bumps_within_chunk() {
    let platform = TestPlatform::default();

    let base = Base::new();
    base.boot(PowerOf2::new(64 * 1024).unwrap());

    let first = base.alloc(&platform, Layout::new::<[u64; 3]>()).unwrap();
    let second = base.alloc(&platform, Layout::from_size_align(8, 64).unwrap()).unwrap();

    assert_eq!(1, platform.reserved_count());
    assert!(second.as_ptr() as usize >= first.as_ptr() as usize + 24);
    assert_eq!(0, second.as_ptr() as usize % 64);

    let large = base.alloc(&platform, Layout::from_size_align(100 * 1024, 16).unwrap()).unwrap();
    assert_eq!(2, platform.reserved_count());

    let bytes = unsafe { core::slice::from_raw_parts(large.as_ptr(), 100 * 1024) };
    assert!(bytes.iter().all(|b| *b == 0));

    assert_eq!((64 * 1024 + 128 * 1024, 24 + 8 + 100 * 1024), base.usage());
}

#[test]
fn base_recycles_nodes_per_kind() {
    let platform = TestPlatform::default();

    let base = Base::new();
    base.boot(PowerOf2::new(64 * 1024).unwrap());

    let node: NonNull<[usize; 4]> = base.alloc_node(&platform, NodeKind::Tcache).unwrap();

    unsafe { base.free_node(NodeKind::Tcache, node) };

    let other: NonNull<[usize; 4]> = base.alloc_node(&platform, NodeKind::Huge).unwrap();
    assert_ne!(node, other);

    let again: NonNull<[usize; 4]> = base.alloc_node(&platform, NodeKind::Tcache).unwrap();
    assert_eq!(node, again);
}

#[test]
fn base_out_of_memory() {
    let platform = TestPlatform::default();
    platform.fail_reservations(true);

    let base = Base::new();
    base.boot(PowerOf2::new(64 * 1024).unwrap());

    assert!(base.alloc(&platform, Layout::new::<u64>()).is_none());
}

}
