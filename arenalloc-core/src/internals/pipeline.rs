//! Internal allocation primitives, shared by all entry points.
//!
//! -   `iallocate` allocates a usable size, from the thread cache, an arena, or as a huge allocation.
//! -   `isalloc` returns the usable size of an allocation.
//! -   `idalloc` frees an allocation, `iqalloc` routes it through the quarantine first.
//! -   `ixalloc` resizes an allocation in place, `iralloc` resizes it, moving it if necessary.
//!
//! None of these update the thread counters, nor the profiler: the entry points do.

use core::ptr::{self, NonNull};

use crate::{configuration::FILL, BinIndex, Category, Platform, PowerOf2, ThreadState, LARGE_MINCLASS, PAGE, SMALL_MAXCLASS};
use crate::internals::{
    arena::{self, Arena, Run},
    chunk_map,
    context::Context,
    fill,
    tcache::Tcache,
};
use crate::utils;

/// Where an allocation is served from.
pub(crate) struct Route<'a> {
    pub(crate) arena: &'a Arena,
    /// Whether the thread cache may be used.
    pub(crate) tcache: bool,
}

impl<'a, P: Platform> Context<'a, P> {
    /// Resolves the arena serving `thread`, or the `explicit` one.
    ///
    /// The thread cache is only used for an explicit arena if it is the one the thread is bound to.
    pub(crate) fn route(&self, thread: &mut ThreadState, explicit: Option<usize>) -> Option<Route<'a>> {
        match explicit {
            None => Some(Route { arena: self.pool.choose(self, thread)?, tcache: true }),
            Some(index) => {
                let arena = self.pool.get_or_create(self, index)?;
                Some(Route { arena, tcache: thread.arena() == Some(index) })
            },
        }
    }

    /// Returns the thread cache of `thread`, creating it if necessary.
    ///
    /// Transient threads never get one.
    pub(crate) fn tcache(&self, thread: &mut ThreadState) -> Option<NonNull<Tcache>> {
        if self.tcache_nbins == 0 || !thread.is_nominal() {
            return None;
        }

        if let Some(tcache) = thread.tcache {
            return Some(tcache);
        }

        let arena = self.pool.choose(self, thread)?;
        let tcache = Tcache::create(self, arena.index())?;

        thread.tcache = Some(tcache);
        Some(tcache)
    }

    /// Allocates `usable` bytes, a usable size, aligned on at least `alignment`.
    pub(crate) fn iallocate(
        &self,
        thread: &mut ThreadState,
        usable: usize,
        alignment: Option<PowerOf2>,
        zero: bool,
        explicit: Option<usize>,
    )
        -> Option<NonNull<u8>>
    {
        debug_assert!(usable != 0);

        let route = self.route(thread, explicit)?;
        let zero = zero || (FILL && self.options.zero);

        match self.classes.category(usable) {
            Category::Small => {
                let bin = BinIndex::from_size(usable)?;

                let tcache = if route.tcache && bin.value() < self.tcache_nbins { self.tcache(thread) } else { None };

                let pointer = match tcache {
                    //  Safety:
                    //  -   The thread cache is only ever used by its thread.
                    Some(mut tcache) => unsafe { tcache.as_mut().alloc(self, bin)? },
                    None => route.arena.alloc_small(self, bin)?,
                };

                //  Safety:
                //  -   `pointer` is a fresh region of `bin`.
                unsafe { fill::alloc_small(self, pointer, bin, zero) };

                Some(pointer)
            },
            Category::Large => {
                let pointer = route.arena.alloc_large(self, usable, alignment.unwrap_or(PAGE))?;

                //  Safety:
                //  -   `pointer` is a fresh run of `usable` bytes.
                unsafe { fill::alloc_large(self, pointer, usable, zero) };

                Some(pointer)
            },
            Category::Huge => {
                self.huge.alloc(self, usable, alignment.unwrap_or(PowerOf2::ONE), route.arena.index(), zero)
            },
        }
    }

    /// Returns the usable size of `pointer`.
    ///
    /// With `demote`, a sampled allocation reports the size it was promoted from.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation.
    pub(crate) unsafe fn isalloc(&self, pointer: NonNull<u8>, demote: bool) -> usize {
        let chunk = self.classes.chunk_size();

        if chunk_map::is_chunk_aligned(pointer, chunk) {
            return self.huge.usable_size(pointer);
        }

        match arena::run_of(pointer, chunk) {
            Run::Small(bin) => self.bins.get(bin).reg_size,
            Run::Large { size, sampled, promoted } => if demote && sampled && promoted != 0 { promoted } else { size },
        }
    }

    /// Resolves the thread cache to free through.
    ///
    /// A free never creates a thread cache, nor binds the thread to an arena.
    pub(crate) fn tcache_for_free(&self, thread: &ThreadState, allowed: bool) -> Option<NonNull<Tcache>> {
        if allowed && self.tcache_nbins != 0 && thread.is_nominal() { thread.tcache } else { None }
    }

    /// Frees `pointer`, through `tcache` if small enough.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation, no longer referenced.
    /// -   Assumes that `tcache`, if any, belongs to the calling thread.
    pub(crate) unsafe fn idalloc(&self, pointer: NonNull<u8>, tcache: Option<NonNull<Tcache>>) {
        let chunk = self.classes.chunk_size();

        if chunk_map::is_chunk_aligned(pointer, chunk) {
            fill::dalloc_large(self, pointer, self.huge.usable_size(pointer));
            self.huge.dalloc(self, pointer);
            return;
        }

        match arena::run_of(pointer, chunk) {
            Run::Small(bin) => {
                fill::dalloc_small(self, pointer, bin);

                match tcache {
                    Some(mut tcache) if bin.value() < self.tcache_nbins => tcache.as_mut().dalloc(self, pointer, bin),
                    _ => arena::owner(pointer, chunk).dalloc(self, pointer),
                }
            },
            Run::Large { size, .. } => {
                fill::dalloc_large(self, pointer, size);
                arena::owner(pointer, chunk).dalloc(self, pointer);
            },
        }
    }

    /// Frees `pointer`, through the quarantine if enabled.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation, no longer referenced.
    pub(crate) unsafe fn iqalloc(&self, thread: &mut ThreadState, pointer: NonNull<u8>, tcache_allowed: bool) {
        let tcache = self.tcache_for_free(thread, tcache_allowed);
        let budget = self.options.quarantine;

        if !FILL || budget == 0 || !thread.is_nominal() {
            self.idalloc(pointer, tcache);
            return;
        }

        let usable = self.isalloc(pointer, false);

        if usable <= budget && self.options.junk {
            utils::fill(pointer, usable, fill::JUNK_FREE);
        }

        thread.quarantine.admit(pointer, usable, budget, |evicted| self.idalloc(evicted, tcache));
    }

    /// Releases all regions held in the quarantine of `thread`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `tcache`, if any, belongs to `thread`.
    pub(crate) unsafe fn drain_quarantine(&self, thread: &mut ThreadState, tcache: Option<NonNull<Tcache>>) {
        thread.quarantine.drain(|evicted| self.idalloc(evicted, tcache));
    }

    /// Resizes `pointer`, of physical size `old`, in place to a usable size within `[min, max]`.
    ///
    /// Returns the new physical usable size on success.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation of `old` bytes, exclusively owned by the caller.
    pub(crate) unsafe fn ixalloc(&self, pointer: NonNull<u8>, old: usize, min: usize, max: usize, zero: bool)
        -> Option<usize>
    {
        debug_assert!(min <= max);

        let chunk = self.classes.chunk_size();

        if chunk_map::is_chunk_aligned(pointer, chunk) {
            return if self.huge.ralloc_in_place(self, old, min, max) { Some(old) } else { None };
        }

        if old <= SMALL_MAXCLASS {
            return if min <= old && old <= max { Some(old) } else { None };
        }

        let large_max = self.classes.large_maxclass();

        if max < LARGE_MINCLASS || min > large_max {
            return None;
        }

        let min = if min < LARGE_MINCLASS { LARGE_MINCLASS } else { min };
        let max = if max > large_max { large_max } else { max };

        //  The tail is junked before being handed back.
        if FILL && self.options.junk && max < old {
            utils::fill(NonNull::new_unchecked(pointer.as_ptr().add(max)), old - max, fill::JUNK_FREE);
        }

        let new = arena::owner(pointer, chunk).ralloc_large_in_place(self, pointer, old, min, max)?;

        if new > old {
            let tail = NonNull::new_unchecked(pointer.as_ptr().add(old));

            if zero || (FILL && self.options.zero) {
                utils::fill(tail, new - old, 0);
            } else if FILL && self.options.junk {
                utils::fill(tail, new - old, fill::JUNK_ALLOC);
            }
        }

        Some(new)
    }

    /// Resizes `pointer` to `usable` bytes, moving it if it cannot be resized in place.
    ///
    /// `copy` is the number of bytes preserved when moving.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation, exclusively owned by the caller.
    /// -   Assumes that `copy` does not exceed the usable size of either allocation.
    pub(crate) unsafe fn iralloc(
        &self,
        thread: &mut ThreadState,
        pointer: NonNull<u8>,
        copy: usize,
        usable: usize,
        alignment: Option<PowerOf2>,
        zero: bool,
        explicit: Option<usize>,
        tcache_allowed: bool,
    )
        -> Option<NonNull<u8>>
    {
        let physical = self.isalloc(pointer, false);
        let aligned = alignment.map_or(true, |alignment| alignment.is_aligned(pointer.as_ptr() as usize));

        if aligned && self.ixalloc(pointer, physical, usable, usable, zero).is_some() {
            return Some(pointer);
        }

        let fresh = self.iallocate(thread, usable, alignment, zero, explicit)?;

        ptr::copy_nonoverlapping(pointer.as_ptr(), fresh.as_ptr(), copy);

        self.iqalloc(thread, pointer, tcache_allowed);

        Some(fresh)
    }
}
