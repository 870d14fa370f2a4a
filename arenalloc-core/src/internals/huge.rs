//! Huge allocations.
//!
//! Huge allocations are chunk multiples, backed directly by dedicated chunks and recorded in a node list under the
//! huge lock. A huge allocation is the only allocation to start at the base of a chunk.
//!
//! The chunk and node are reserved before the huge lock is taken, and released after it is, so that the huge lock
//! is always innermost.

use core::ptr::{self, NonNull};

use crate::{configuration::FILL, Platform, PowerOf2};
use crate::internals::{base::NodeKind, context::Context, mutex::Mutex};
use crate::utils;

/// Node of a huge allocation.
pub(crate) struct HugeNode {
    address: NonNull<u8>,
    size: usize,
    arena: usize,
    sampled: bool,
    next: *mut HugeNode,
}

/// Statistics of huge allocations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct HugeStats {
    pub(crate) allocated: usize,
    pub(crate) nmalloc: u64,
    pub(crate) ndalloc: u64,
}

/// Registry of huge allocations.
pub(crate) struct Huge {
    inner: Mutex<HugeInner>,
}

struct HugeInner {
    head: *mut HugeNode,
    stats: HugeStats,
}

//  Safety:
//  -   The nodes are owned by the list.
unsafe impl Send for HugeInner {}

impl Huge {
    /// Creates an empty instance.
    pub(crate) const fn new() -> Self {
        Self { inner: Mutex::new(HugeInner { head: ptr::null_mut(), stats: HugeStats { allocated: 0, nmalloc: 0, ndalloc: 0 } }) }
    }

    /// Allocates `usable` bytes, a multiple of the chunk size, on behalf of `arena`.
    pub(crate) fn alloc<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        usable: usize,
        alignment: PowerOf2,
        arena: usize,
        zero: bool,
    )
        -> Option<NonNull<u8>>
    {
        debug_assert!(ctx.classes.chunk_size().is_aligned(usable));

        //  Safety:
        //  -   `usable` is a non-zero multiple of the chunk size.
        let reserved = unsafe { ctx.chunks.reserve(ctx.platform, usable, alignment)? };

        let node: NonNull<HugeNode> = match ctx.base.alloc_node(ctx.platform, NodeKind::Huge) {
            Some(node) => node,
            None => {
                //  Safety:
                //  -   Reserved just above, with the same size.
                unsafe { ctx.chunks.release(ctx.platform, reserved.pointer, usable) };
                return None;
            },
        };

        let address = reserved.pointer;

        //  Safety:
        //  -   `node` is fresh from base, and suitably sized and aligned.
        unsafe {
            ptr::write(node.as_ptr(), HugeNode { address, size: usable, arena, sampled: false, next: ptr::null_mut() });
        }

        {
            let mut inner = self.inner.lock();

            //  Safety:
            //  -   `node` is exclusively owned until pushed.
            unsafe { (*node.as_ptr()).next = inner.head };
            inner.head = node.as_ptr();

            inner.stats.allocated += usable;
            inner.stats.nmalloc += 1;
        }

        //  Safety:
        //  -   The chunk is `usable` bytes, and exclusively owned by the caller.
        unsafe {
            if zero {
                if !reserved.zeroed {
                    utils::fill(address, usable, 0);
                }
            } else if FILL && ctx.options.junk {
                utils::fill(address, usable, super::fill::JUNK_ALLOC);
            }
        }

        Some(address)
    }

    /// Deallocates a huge allocation.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` was returned by `alloc`, and is not referenced any longer.
    pub(crate) unsafe fn dalloc<P: Platform>(&self, ctx: &Context<'_, P>, pointer: NonNull<u8>) {
        let node = {
            let mut inner = self.inner.lock();

            let mut link: *mut *mut HugeNode = &mut inner.head;

            while !(*link).is_null() && (**link).address != pointer {
                link = &mut (**link).next;
            }

            let node = match NonNull::new(*link) {
                Some(node) => node,
                None => {
                    debug_assert!(false, "Unknown huge allocation {:?}", pointer);
                    return;
                },
            };

            *link = node.as_ref().next;

            inner.stats.allocated -= node.as_ref().size;
            inner.stats.ndalloc += 1;

            node
        };

        ctx.chunks.release(ctx.platform, pointer, node.as_ref().size);
        ctx.base.free_node(NodeKind::Huge, node);
    }

    /// Returns the usable size of `pointer`, or 0 if not a huge allocation.
    pub(crate) fn usable_size(&self, pointer: NonNull<u8>) -> usize {
        self.with_node(pointer, |node| node.size).unwrap_or(0)
    }

    /// Returns the index of the arena `pointer` was allocated on behalf of.
    pub(crate) fn arena_of(&self, pointer: NonNull<u8>) -> Option<usize> { self.with_node(pointer, |node| node.arena) }

    /// Returns whether `pointer` is sampled.
    pub(crate) fn is_sampled(&self, pointer: NonNull<u8>) -> bool {
        self.with_node(pointer, |node| node.sampled).unwrap_or(false)
    }

    /// Tags `pointer` as sampled, or not.
    pub(crate) fn set_sampled(&self, pointer: NonNull<u8>, sampled: bool) {
        self.with_node(pointer, |node| node.sampled = sampled);
    }

    /// Attempts to resize `pointer` in place, to a usable size within `[min, max]`.
    ///
    /// Only succeeds if no re-mapping is needed, that is if the current size is within the chunk ceilings of the
    /// bounds.
    pub(crate) fn ralloc_in_place<P: Platform>(&self, ctx: &Context<'_, P>, old: usize, min: usize, max: usize)
        -> bool
    {
        let low = match ctx.classes.chunk_ceiling(min) {
            Some(low) => low,
            None => return false,
        };

        let high = ctx.classes.chunk_ceiling(max).unwrap_or(usize::MAX);

        low <= old && old <= high
    }

    /// Returns the statistics.
    pub(crate) fn stats(&self) -> HugeStats { self.inner.lock().stats }

    pub(crate) fn prefork(&self) { self.inner.prefork(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_parent(&self) { self.inner.postfork_parent(); }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_child(&self) { self.inner.postfork_child(); }

    fn with_node<R, F>(&self, pointer: NonNull<u8>, fun: F) -> Option<R>
        where
            F: FnOnce(&mut HugeNode) -> R,
    {
        let inner = self.inner.lock();

        let mut current = inner.head;

        //  Safety:
        //  -   The nodes of the list are valid, as long as the lock is held.
        unsafe {
            while let Some(mut node) = NonNull::new(current) {
                if node.as_ref().address == pointer {
                    return Some(fun(node.as_mut()));
                }

                current = node.as_ref().next;
            }
        }

        None
    }
}
