//! Arena Pool
//!
//! The pool is an array of slots, each holding a lazily created arena and the number of threads bound to it. The
//! first `narenas_auto` slots are eligible for automatic assignment, slots beyond are created on explicit request.
//!
//! Slot pointers are published with release semantics and may be read without lock, all other mutations, arena
//! creation and thread counts included, happen under the pool lock.
//!
//! During boot, the pool is first installed over a single stack-local slot holding arena 0, so that the calls
//! needed to size the real array may allocate.

use core::{
    mem,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use crate::{Platform, ThreadState};
use crate::internals::{
    arena::Arena,
    context::Context,
    diagnostics::diagnostic,
    mutex::Mutex,
};

/// Slot of the pool.
///
/// An all-zero slot is a valid, empty, slot.
pub(crate) struct ArenaSlot {
    arena: AtomicPtr<Arena>,
    nthreads: AtomicUsize,
}

impl ArenaSlot {
    /// Creates an empty slot.
    pub(crate) const fn new() -> Self { Self { arena: AtomicPtr::new(ptr::null_mut()), nthreads: AtomicUsize::new(0) } }

    /// Returns the maximum number of slots of an array fitting within `bytes`.
    pub(crate) const fn capacity_within(bytes: usize) -> usize { bytes / mem::size_of::<ArenaSlot>() }
}

/// Pool of arenas.
pub(crate) struct ArenaPool {
    lock: Mutex<()>,
    slots: AtomicPtr<ArenaSlot>,
    capacity: AtomicUsize,
    narenas_auto: AtomicUsize,
    narenas_total: AtomicUsize,
}

impl ArenaPool {
    /// Creates an empty pool.
    pub(crate) const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            slots: AtomicPtr::new(ptr::null_mut()),
            capacity: AtomicUsize::new(0),
            narenas_auto: AtomicUsize::new(0),
            narenas_total: AtomicUsize::new(0),
        }
    }

    /// Installs `capacity` slots, of which the first `narenas` are in use.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `slots` points to `capacity` initialized slots, valid until replaced or reset.
    /// -   Assumes that `narenas <= capacity`.
    pub(crate) unsafe fn install(&self, slots: NonNull<ArenaSlot>, capacity: usize, narenas: usize) {
        debug_assert!(narenas <= capacity);

        let _guard = self.lock.lock();

        self.capacity.store(capacity, Ordering::Relaxed);
        self.narenas_auto.store(narenas, Ordering::Relaxed);
        self.narenas_total.store(narenas, Ordering::Relaxed);
        self.slots.store(slots.as_ptr(), Ordering::Release);
    }

    /// Copies the slots `[0, count)` of the installed array into `target`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `target` points to at least `count` slots, and that `count` slots are installed.
    pub(crate) unsafe fn copy_into(&self, target: NonNull<ArenaSlot>, count: usize) {
        let _guard = self.lock.lock();

        let slots = self.slots.load(Ordering::Acquire);

        for index in 0..count {
            let (from, to) = (&*slots.add(index), &*target.as_ptr().add(index));

            to.arena.store(from.arena.load(Ordering::Relaxed), Ordering::Relaxed);
            to.nthreads.store(from.nthreads.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Uninstalls the slots, after a failed boot.
    pub(crate) fn reset(&self) {
        let _guard = self.lock.lock();

        self.slots.store(ptr::null_mut(), Ordering::Release);
        self.capacity.store(0, Ordering::Relaxed);
        self.narenas_auto.store(0, Ordering::Relaxed);
        self.narenas_total.store(0, Ordering::Relaxed);
    }

    /// Returns the number of arenas eligible for automatic assignment.
    pub(crate) fn narenas_auto(&self) -> usize { self.narenas_auto.load(Ordering::Relaxed) }

    /// Returns the number of arenas, including those created explicitly.
    pub(crate) fn narenas_total(&self) -> usize { self.narenas_total.load(Ordering::Acquire) }

    /// Returns the arena at `index`, if created.
    pub(crate) fn get<'a>(&'a self, index: usize) -> Option<&'a Arena> {
        let slot = self.slot(index)?;

        //  Safety:
        //  -   Arenas are never destroyed.
        unsafe { slot.arena.load(Ordering::Acquire).as_ref() }
    }

    /// Returns the arena at `index`, creating it if necessary.
    ///
    /// Returns `None` if `index` is out of bounds, or the arena cannot be created.
    pub(crate) fn get_or_create<'a, P: Platform>(&'a self, ctx: &Context<'_, P>, index: usize) -> Option<&'a Arena> {
        if let Some(arena) = self.get(index) {
            return Some(arena);
        }

        let _guard = self.lock.lock();

        self.create_locked(ctx, index)
    }

    /// Returns the arena of `thread`, binding it on first use.
    ///
    /// Returns `None` only if the pool is not installed.
    pub(crate) fn choose<'a, P: Platform>(&'a self, ctx: &Context<'_, P>, thread: &mut ThreadState)
        -> Option<&'a Arena>
    {
        if let Some(index) = thread.arena() {
            if let Some(arena) = self.get(index) {
                return Some(arena);
            }
        }

        self.choose_hard(ctx, thread)
    }

    /// Creates a new arena, beyond the current ones, and returns its index.
    pub(crate) fn extend<P: Platform>(&self, ctx: &Context<'_, P>) -> Option<usize> {
        let _guard = self.lock.lock();

        let index = self.narenas_total.load(Ordering::Relaxed);

        if index >= self.capacity.load(Ordering::Relaxed) {
            return None;
        }

        self.narenas_total.store(index + 1, Ordering::Release);

        if self.create_locked(ctx, index).is_none() {
            self.narenas_total.store(index, Ordering::Release);
            return None;
        }

        Some(index)
    }

    /// Unbinds `thread`, decrementing the thread count of its arena.
    pub(crate) fn cleanup(&self, thread: &mut ThreadState) {
        if !thread.is_nominal() {
            return;
        }

        if let Some(index) = thread.arena.take() {
            let _guard = self.lock.lock();

            if let Some(slot) = self.slot(index) {
                slot.nthreads.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Rebinds `thread` to the arena at `index`, creating it if necessary.
    ///
    /// Returns `None` if the arena does not exist and cannot be created.
    pub(crate) fn rebind<P: Platform>(&self, ctx: &Context<'_, P>, thread: &mut ThreadState, index: usize)
        -> Option<usize>
    {
        let _guard = self.lock.lock();

        self.create_locked(ctx, index)?;

        if !thread.is_nominal() {
            return Some(index);
        }

        if let Some(previous) = thread.arena().and_then(|previous| self.slot(previous)) {
            previous.nthreads.fetch_sub(1, Ordering::Relaxed);
        }

        self.slot(index)?.nthreads.fetch_add(1, Ordering::Relaxed);
        thread.bind(index);

        Some(index)
    }

    /// Returns the number of threads bound to the arena at `index`.
    pub(crate) fn nthreads(&self, index: usize) -> Option<usize> {
        let _guard = self.lock.lock();

        self.slot(index).map(|slot| slot.nthreads.load(Ordering::Relaxed))
    }

    /// Returns the created arenas, in index order.
    pub(crate) fn arenas(&self) -> impl Iterator<Item = &Arena> + '_ {
        (0..self.narenas_total()).filter_map(move |index| self.get(index))
    }

    /// Acquires the pool lock, then the lock of every arena, in index order.
    pub(crate) fn prefork(&self) {
        self.lock.prefork();

        for arena in self.arenas() {
            arena.prefork();
        }
    }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_parent(&self) {
        for index in (0..self.narenas_total()).rev() {
            if let Some(arena) = self.get(index) {
                arena.postfork_parent();
            }
        }

        self.lock.postfork_parent();
    }

    /// #   Safety
    ///
    /// -   Assumes `prefork` was called.
    pub(crate) unsafe fn postfork_child(&self) {
        for index in (0..self.narenas_total()).rev() {
            if let Some(arena) = self.get(index) {
                arena.postfork_child();
            }
        }

        self.lock.postfork_child();
    }

    #[cold]
    #[inline(never)]
    fn choose_hard<'a, P: Platform>(&'a self, ctx: &Context<'_, P>, thread: &mut ThreadState) -> Option<&'a Arena> {
        let nominal = thread.is_nominal();

        let index = {
            let _guard = self.lock.lock();

            let narenas = self.narenas_auto.load(Ordering::Relaxed);

            let index = if narenas > 1 { self.select_locked(ctx, narenas)? } else { 0 };

            if nominal {
                self.slot(index)?.nthreads.fetch_add(1, Ordering::Relaxed);
            }

            index
        };

        thread.bind(index);

        self.get(index)
    }

    //  Picks the least loaded arena, unless it is busy and an empty slot remains, in which case an arena is created.
    fn select_locked<P: Platform>(&self, ctx: &Context<'_, P>, narenas: usize) -> Option<usize> {
        let mut least = 0;
        let mut least_threads = usize::MAX;
        let mut first_empty = None;

        for index in 0..narenas {
            let slot = self.slot(index)?;

            if slot.arena.load(Ordering::Relaxed).is_null() {
                first_empty = first_empty.or(Some(index));
                continue;
            }

            let nthreads = slot.nthreads.load(Ordering::Relaxed);

            if nthreads < least_threads {
                least = index;
                least_threads = nthreads;
            }
        }

        match first_empty {
            Some(empty) if least_threads != 0 => {
                if self.create_locked(ctx, empty).is_some() {
                    Some(empty)
                } else {
                    Some(0)
                }
            },
            _ => Some(least),
        }
    }

    //  Returns the arena at `index`, creating it if necessary. Falls back to arena 0 on failure to create.
    fn create_locked<'a, P: Platform>(&'a self, ctx: &Context<'_, P>, index: usize) -> Option<&'a Arena> {
        let slot = self.slot(index)?;

        if let Some(arena) = self.get(index) {
            return Some(arena);
        }

        match Arena::create(ctx, index) {
            Some(arena) => {
                slot.arena.store(arena.as_ptr(), Ordering::Release);

                //  Safety:
                //  -   Arenas are never destroyed.
                Some(unsafe { &*arena.as_ptr() })
            },
            None => {
                diagnostic!(ctx.platform, "Error initializing arena");

                if ctx.options.abort {
                    ctx.platform.abort();
                }

                None
            },
        }
    }

    fn slot(&self, index: usize) -> Option<&ArenaSlot> {
        if index >= self.narenas_total() {
            return None;
        }

        let slots = self.slots.load(Ordering::Acquire);

        //  Safety:
        //  -   `index` is within the installed slots, which are valid until replaced, and never released.
        unsafe { slots.as_ref().map(|_| &*slots.add(index)) }
    }
}

#[cfg(test)]
mod tests {

use super::*;
use crate::internals::test::TestHeap;

#[test]
fn pool_single_arena() {
    let heap = TestHeap::with_conf("narenas:1");
    let ctx = heap.context();

    let mut first = ThreadState::new();
    let mut second = ThreadState::new();

    assert_eq!(0, ctx.pool.choose(&ctx, &mut first).unwrap().index());
    assert_eq!(0, ctx.pool.choose(&ctx, &mut second).unwrap().index());
    assert_eq!(0, ctx.pool.choose(&ctx, &mut second).unwrap().index());

    assert_eq!(Some(2), ctx.pool.nthreads(0));

    ctx.pool.cleanup(&mut first);
    assert_eq!(Some(1), ctx.pool.nthreads(0));
    assert_eq!(None, first.arena());
}

#[test]
fn pool_balances_load() {
    let heap = TestHeap::with_conf("narenas:3");
    let ctx = heap.context();

    let mut threads: Vec<_> = (0..6).map(|_| ThreadState::new()).collect();

    let chosen: Vec<_> = threads.iter_mut().map(|t| ctx.pool.choose(&ctx, t).unwrap().index()).collect();

    //  0 is idle at first, then busy: 1 and 2 get created, then the least loaded is reused.
    assert_eq!(vec![0, 1, 2, 0, 1, 2], chosen);

    for index in 0..3 {
        assert_eq!(Some(2), ctx.pool.nthreads(index));
    }
}

#[test]
fn pool_reuses_idle_arena() {
    let heap = TestHeap::with_conf("narenas:4");
    let ctx = heap.context();

    let mut first = ThreadState::new();
    let mut second = ThreadState::new();

    assert_eq!(0, ctx.pool.choose(&ctx, &mut first).unwrap().index());
    ctx.pool.cleanup(&mut first);

    //  Arena 0 is idle again, no need to create another.
    assert_eq!(0, ctx.pool.choose(&ctx, &mut second).unwrap().index());
    assert!(ctx.pool.get(1).is_none());
}

#[test]
fn pool_transient_threads_do_not_count() {
    let heap = TestHeap::with_conf("narenas:1");
    let ctx = heap.context();

    let mut transient = ThreadState::transient(crate::ThreadStatus::Purgatory);

    assert_eq!(0, ctx.pool.choose(&ctx, &mut transient).unwrap().index());
    assert_eq!(None, transient.arena());
    assert_eq!(Some(0), ctx.pool.nthreads(0));
}

#[test]
fn pool_creation_failure_falls_back() {
    let heap = TestHeap::with_conf("narenas:2,abort:false,lg_chunk:16");
    let ctx = heap.context();

    let mut first = ThreadState::new();
    let mut second = ThreadState::new();

    assert_eq!(0, ctx.pool.choose(&ctx, &mut first).unwrap().index());

    heap.platform().fail_reservations(true);
    heap.exhaust_base();

    assert_eq!(0, ctx.pool.choose(&ctx, &mut second).unwrap().index());
    assert_eq!(Some(2), ctx.pool.nthreads(0));
    assert_eq!(vec!["<arenalloc>: Error initializing arena\n".to_string()], heap.platform().diagnostics());
}

#[test]
fn pool_extend_and_rebind() {
    let heap = TestHeap::with_conf("narenas:1");
    let ctx = heap.context();

    let mut thread = ThreadState::new();
    ctx.pool.choose(&ctx, &mut thread).unwrap();

    let index = ctx.pool.extend(&ctx).unwrap();
    assert_eq!(1, index);
    assert_eq!(1, ctx.pool.narenas_auto());
    assert_eq!(2, ctx.pool.narenas_total());

    assert_eq!(Some(1), ctx.pool.rebind(&ctx, &mut thread, 1));
    assert_eq!(Some(1), thread.arena());
    assert_eq!(Some(0), ctx.pool.nthreads(0));
    assert_eq!(Some(1), ctx.pool.nthreads(1));

    assert_eq!(None, ctx.pool.rebind(&ctx, &mut thread, 2));
    assert_eq!(Some(1), thread.arena());
}

}
