//! Profiler
//!
//! Allocations are sampled deterministically: each thread samples one allocation per `2^lg_prof_sample` bytes
//! allocated. A sampled allocation reserves a slot of a fixed table during preparation, fills it in once the
//! allocation succeeded, and clears it when freed. A full table degrades to not sampling.
//!
//! The sampled flag itself lives on the allocation: on the page entry of a large run, or on the node of a huge
//! allocation. Small allocations are never sampled as such, they are promoted to `LARGE_MINCLASS` and the original
//! usable size is recorded along with the flag.
//!
//! Boot happens in three phases: defaults, options, and the table, allocated from base.

use core::{
    alloc::Layout,
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{configuration::PROF, Options, Platform, SMALL_MAXCLASS};
use crate::internals::{arena, base::Base, chunk_map, context::Context, diagnostics, mutex::Mutex};

/// Number of slots of the sample table.
pub(crate) const PROF_TABLE_CAPACITY: usize = 1024;

//  Address of a slot reserved by `alloc_prep`, not yet filled in.
const RESERVED: usize = 1;

/// Sampling state of a thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProfThread {
    initialized: bool,
    active: bool,
    bytes_until_sample: usize,
}

impl ProfThread {
    /// Creates a state, initialized on first use.
    pub(crate) const fn new() -> Self { Self { initialized: false, active: false, bytes_until_sample: 0 } }
}

/// Outcome of `Profiler::alloc_prep`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ProfToken {
    /// The allocation is not sampled.
    Unsampled,
    /// The allocation is sampled, and will be recorded in the given slot.
    Sampled(usize),
}

impl ProfToken {
    /// Returns whether the allocation is sampled.
    pub(crate) fn is_sampled(&self) -> bool { matches!(self, ProfToken::Sampled(_)) }
}

/// Sample record.
#[derive(Clone, Copy, Debug)]
struct Record {
    address: usize,
    size: usize,
}

/// Cumulative counters of the profiler.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ProfStats {
    /// Live sampled objects.
    pub(crate) curobjs: usize,
    /// Live sampled bytes.
    pub(crate) curbytes: usize,
    /// Objects sampled, since boot.
    pub(crate) accumobjs: u64,
    /// Bytes sampled, since boot.
    pub(crate) accumbytes: u64,
}

/// Profiler.
pub(crate) struct Profiler {
    enabled: AtomicBool,
    active: AtomicBool,
    thread_active_init: AtomicBool,
    lg_sample: AtomicUsize,
    inner: Mutex<ProfInner>,
}

struct ProfInner {
    table: *mut Record,
    stats: ProfStats,
}

//  Safety:
//  -   The table is owned by the profiler.
unsafe impl Send for ProfInner {}

impl Profiler {
    /// Creates a disabled instance.
    pub(crate) const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            active: AtomicBool::new(false),
            thread_active_init: AtomicBool::new(false),
            lg_sample: AtomicUsize::new(0),
            inner: Mutex::new(ProfInner {
                table: ptr::null_mut(),
                stats: ProfStats { curobjs: 0, curbytes: 0, accumobjs: 0, accumbytes: 0 },
            }),
        }
    }

    /// Boot phase 0: resets to defaults.
    pub(crate) fn boot0(&self) {
        let defaults = Options::DEFAULT;

        self.enabled.store(false, Ordering::Relaxed);
        self.active.store(false, Ordering::Relaxed);
        self.thread_active_init.store(defaults.prof_thread_active_init, Ordering::Relaxed);
        self.lg_sample.store(defaults.lg_prof_sample, Ordering::Relaxed);
    }

    /// Boot phase 1: applies the options.
    pub(crate) fn boot1(&self, options: &Options) {
        let enabled = PROF && options.prof;

        self.enabled.store(enabled, Ordering::Relaxed);
        self.active.store(enabled && options.prof_active, Ordering::Relaxed);
        self.thread_active_init.store(options.prof_thread_active_init, Ordering::Relaxed);
        self.lg_sample.store(options.lg_prof_sample, Ordering::Relaxed);
    }

    /// Boot phase 2: allocates the sample table, if enabled.
    ///
    /// Returns false if out of memory.
    pub(crate) fn boot2<P: Platform>(&self, platform: &P, base: &Base) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let layout = match Layout::array::<Record>(PROF_TABLE_CAPACITY) {
            Ok(layout) => layout,
            Err(_) => return false,
        };

        //  A zeroed record is an empty slot.
        match base.alloc(platform, layout) {
            Some(table) => {
                self.inner.lock().table = table.cast().as_ptr();
                true
            },
            None => false,
        }
    }

    /// Returns whether profiling was enabled at boot.
    pub(crate) fn is_enabled(&self) -> bool { self.enabled.load(Ordering::Relaxed) }

    /// Returns whether sampling is currently active.
    pub(crate) fn is_active(&self) -> bool { self.active.load(Ordering::Relaxed) }

    /// Sets whether sampling is active, returns the previous value.
    pub(crate) fn set_active(&self, active: bool) -> bool { self.active.swap(active, Ordering::Relaxed) }

    /// Decides whether an allocation of `usable` bytes is sampled.
    ///
    /// A sampled allocation reserves a slot, which must be either recorded or rolled back.
    pub(crate) fn alloc_prep(&self, thread: &mut ProfThread, usable: usize) -> ProfToken {
        if !PROF || !self.is_active() {
            return ProfToken::Unsampled;
        }

        let interval = self.interval();

        if !thread.initialized {
            thread.initialized = true;
            thread.active = self.thread_active_init.load(Ordering::Relaxed);
            thread.bytes_until_sample = interval;
        }

        if !thread.active {
            return ProfToken::Unsampled;
        }

        if usable < thread.bytes_until_sample {
            thread.bytes_until_sample -= usable;
            return ProfToken::Unsampled;
        }

        thread.bytes_until_sample = interval;

        self.reserve_slot()
    }

    /// Releases the slot of an allocation which did not happen.
    pub(crate) fn rollback(&self, token: ProfToken) {
        if let ProfToken::Sampled(slot) = token {
            let inner = self.inner.lock();

            //  Safety:
            //  -   `slot` was handed out by `reserve_slot`, hence the table exists and `slot` is within bounds.
            unsafe { (*inner.table.add(slot)).address = 0 };
        }
    }

    /// Records an allocation of `usable` bytes at `pointer`, if sampled.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation, of at least `LARGE_MINCLASS` bytes if sampled.
    pub(crate) unsafe fn malloc_record<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        pointer: NonNull<u8>,
        usable: usize,
        token: ProfToken,
    )
    {
        let slot = match token {
            ProfToken::Sampled(slot) => slot,
            ProfToken::Unsampled => return,
        };

        {
            let mut inner = self.inner.lock();

            *inner.table.add(slot) = Record { address: pointer.as_ptr() as usize, size: usable };

            inner.stats.curobjs += 1;
            inner.stats.curbytes += usable;
            inner.stats.accumobjs += 1;
            inner.stats.accumbytes += usable as u64;
        }

        let promoted = if usable <= SMALL_MAXCLASS { usable } else { 0 };

        tag(ctx, pointer, true, promoted);
    }

    /// Records a reallocation.
    ///
    /// The record of the old allocation, if any, is dropped. If the reallocation happened in place and the new
    /// allocation is not sampled, the sampled flag is cleared.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation, of at least `LARGE_MINCLASS` bytes if sampled.
    pub(crate) unsafe fn realloc_record<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        pointer: NonNull<u8>,
        usable: usize,
        token: ProfToken,
        old: NonNull<u8>,
        old_sampled: bool,
    )
    {
        if old_sampled {
            self.forget(old);

            if pointer == old && !token.is_sampled() {
                tag(ctx, pointer, false, 0);
            }
        }

        self.malloc_record(ctx, pointer, usable, token);
    }

    /// Drops the record of a sampled allocation about to be freed.
    pub(crate) fn free_record(&self, pointer: NonNull<u8>) { self.forget(pointer); }

    /// Returns whether `pointer` is sampled.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live allocation.
    pub(crate) unsafe fn is_sampled<P: Platform>(&self, ctx: &Context<'_, P>, pointer: NonNull<u8>) -> bool {
        if !PROF || !self.is_enabled() {
            return false;
        }

        let chunk = ctx.classes.chunk_size();

        if chunk_map::is_chunk_aligned(pointer, chunk) {
            return ctx.huge.is_sampled(pointer);
        }

        match arena::run_of(pointer, chunk) {
            arena::Run::Large { sampled, .. } => sampled,
            arena::Run::Small(_) => false,
        }
    }

    /// Returns the counters.
    pub(crate) fn stats(&self) -> ProfStats { self.inner.lock().stats }

    /// Reports the live sampled objects, at exit.
    pub(crate) fn leak_summary<P: Platform>(&self, platform: &P) {
        let stats = self.stats();

        if stats.curobjs == 0 {
            return;
        }

        let (bytes, objects) = (stats.curbytes, stats.curobjs);

        diagnostics::diagnostic!(platform, "Leak summary: {} byte{}, {} object{}",
            bytes, if bytes == 1 { "" } else { "s" }, objects, if objects == 1 { "" } else { "s" });
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

    fn interval(&self) -> usize {
        let lg = self.lg_sample.load(Ordering::Relaxed);

        1usize.checked_shl(lg as u32).unwrap_or(usize::MAX)
    }

    fn reserve_slot(&self) -> ProfToken {
        let inner = self.inner.lock();

        if inner.table.is_null() {
            return ProfToken::Unsampled;
        }

        for slot in 0..PROF_TABLE_CAPACITY {
            //  Safety:
            //  -   `slot` is within the table.
            let record = unsafe { &mut *inner.table.add(slot) };

            if record.address == 0 {
                record.address = RESERVED;
                return ProfToken::Sampled(slot);
            }
        }

        ProfToken::Unsampled
    }

    fn forget(&self, pointer: NonNull<u8>) {
        let mut inner = self.inner.lock();

        if inner.table.is_null() {
            return;
        }

        let address = pointer.as_ptr() as usize;

        for slot in 0..PROF_TABLE_CAPACITY {
            //  Safety:
            //  -   `slot` is within the table.
            let record = unsafe { &mut *inner.table.add(slot) };

            if record.address == address {
                let size = record.size;
                *record = Record { address: 0, size: 0 };

                inner.stats.curobjs -= 1;
                inner.stats.curbytes -= size;
                return;
            }
        }
    }
}

//  Sets, or clears, the sampled flag of `pointer`.
unsafe fn tag<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, sampled: bool, promoted: usize) {
    let chunk = ctx.classes.chunk_size();

    if chunk_map::is_chunk_aligned(pointer, chunk) {
        ctx.huge.set_sampled(pointer, sampled);
    } else {
        arena::owner(pointer, chunk).set_sampled(ctx, pointer, sampled, promoted);
    }
}

#[cfg(test)]
mod tests {

use super::*;
use crate::internals::test::TestHeap;

#[test]
fn prof_disabled_never_samples() {
    let heap = TestHeap::with_conf("prof:false,lg_prof_sample:0");
    let ctx = heap.context();

    let mut thread = ProfThread::new();

    assert!(!ctx.prof.is_enabled());
    assert_eq!(ProfToken::Unsampled, ctx.prof.alloc_prep(&mut thread, 4096));
}

#[test]
fn prof_samples_every_interval() {
    let heap = TestHeap::with_conf("prof:true,lg_prof_sample:12");
    let ctx = heap.context();

    let mut thread = ProfThread::new();

    let samples: Vec<_> = (0..8).map(|_| ctx.prof.alloc_prep(&mut thread, 1024).is_sampled()).collect();
    assert_eq!(vec![false, false, false, true, false, false, false, true], samples);

    ctx.prof.set_active(false);
    assert_eq!(ProfToken::Unsampled, ctx.prof.alloc_prep(&mut thread, 1 << 20));
}

#[test]
fn prof_thread_inactive() {
    let heap = TestHeap::with_conf("prof:true,lg_prof_sample:0,prof_thread_active_init:false");
    let ctx = heap.context();

    let mut thread = ProfThread::new();

    assert_eq!(ProfToken::Unsampled, ctx.prof.alloc_prep(&mut thread, 4096));
}

#[test]
fn prof_record_and_free() {
    let heap = TestHeap::with_conf("lg_chunk:16,prof:true,lg_prof_sample:0");
    let ctx = heap.context();
    let arena = ctx.pool.get(0).unwrap();

    let mut thread = ProfThread::new();
    let token = ctx.prof.alloc_prep(&mut thread, 48);
    assert_eq!(ProfToken::Sampled(0), token);

    let pointer = arena.alloc_large(&ctx, crate::LARGE_MINCLASS, crate::PAGE).unwrap();

    unsafe {
        ctx.prof.malloc_record(&ctx, pointer, 48, token);

        assert!(ctx.prof.is_sampled(&ctx, pointer));
        assert_eq!(
            arena::Run::Large { size: crate::LARGE_MINCLASS, sampled: true, promoted: 48 },
            arena::run_of(pointer, ctx.classes.chunk_size())
        );
    }

    assert_eq!(ProfStats { curobjs: 1, curbytes: 48, accumobjs: 1, accumbytes: 48 }, ctx.prof.stats());

    ctx.prof.leak_summary(heap.platform());
    assert_eq!(vec!["<arenalloc>: Leak summary: 48 bytes, 1 object\n".to_string()], heap.platform().diagnostics());

    ctx.prof.free_record(pointer);
    assert_eq!(ProfStats { curobjs: 0, curbytes: 0, accumobjs: 1, accumbytes: 48 }, ctx.prof.stats());

    unsafe { arena.dalloc(&ctx, pointer) };
}

#[test]
fn prof_realloc_in_place_clears_flag() {
    let heap = TestHeap::with_conf("lg_chunk:16,prof:true,lg_prof_sample:0");
    let ctx = heap.context();
    let arena = ctx.pool.get(0).unwrap();

    let mut thread = ProfThread::new();
    let pointer = arena.alloc_large(&ctx, crate::LARGE_MINCLASS, crate::PAGE).unwrap();

    unsafe {
        let token = ctx.prof.alloc_prep(&mut thread, crate::LARGE_MINCLASS);
        ctx.prof.malloc_record(&ctx, pointer, crate::LARGE_MINCLASS, token);
        assert!(ctx.prof.is_sampled(&ctx, pointer));

        ctx.prof.realloc_record(&ctx, pointer, crate::LARGE_MINCLASS, ProfToken::Unsampled, pointer, true);
        assert!(!ctx.prof.is_sampled(&ctx, pointer));
    }

    assert_eq!(0, ctx.prof.stats().curobjs);

    unsafe { arena.dalloc(&ctx, pointer) };
}

#[test]
fn prof_full_table_degrades() {
    let heap = TestHeap::with_conf("prof:true,lg_prof_sample:0");
    let ctx = heap.context();

    let mut thread = ProfThread::new();

    for slot in 0..PROF_TABLE_CAPACITY {
        assert_eq!(ProfToken::Sampled(slot), ctx.prof.alloc_prep(&mut thread, 16));
    }

    assert_eq!(ProfToken::Unsampled, ctx.prof.alloc_prep(&mut thread, 16));

    ctx.prof.rollback(ProfToken::Sampled(7));
    assert_eq!(ProfToken::Sampled(7), ctx.prof.alloc_prep(&mut thread, 16));
}

}
