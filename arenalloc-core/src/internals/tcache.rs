//! Thread cache
//!
//! A thread cache keeps a small stack of recently freed regions per small class, sparing the arena lock on the hot
//! path. A stack is refilled from the arena of the cache, a batch at a time, and when full the oldest half is flushed
//! back to the arenas owning each region.
//!
//! The request counters are the only fields touched by other threads: arenas merge them into their statistics.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{configuration::STATS, BinIndex, Platform, NBINS, SMALL_MAXCLASS};
use crate::internals::{arena, base::NodeKind, context::Context};

/// Number of regions cached per class.
pub(crate) const TCACHE_CAPACITY: usize = 16;

/// Number of regions obtained from the arena at once.
pub(crate) const TCACHE_FILL: usize = TCACHE_CAPACITY / 2;

/// Returns the number of small classes cached, given `lg_tcache_max`.
pub(crate) fn nbins(lg_tcache_max: isize) -> usize {
    let limit = if lg_tcache_max < 0 || lg_tcache_max as u32 >= usize::BITS {
        SMALL_MAXCLASS
    } else {
        core::cmp::min(SMALL_MAXCLASS, 1usize << lg_tcache_max)
    };

    (0..NBINS)
        .filter_map(BinIndex::new)
        .take_while(|bin| bin.size() <= limit)
        .count()
}

/// Cache of a small class.
struct TcacheBin {
    ncached: usize,
    requests: AtomicU64,
    avail: [*mut u8; TCACHE_CAPACITY],
}

/// Thread cache.
pub(crate) struct Tcache {
    arena: usize,
    pub(crate) next: *mut Tcache,
    pub(crate) prev: *mut Tcache,
    bins: [TcacheBin; NBINS],
}

impl Tcache {
    /// Creates a thread cache, linked to `arena`.
    pub(crate) fn create<P: Platform>(ctx: &Context<'_, P>, arena: usize) -> Option<NonNull<Tcache>> {
        let owner = ctx.pool.get(arena)?;
        let tcache: NonNull<Tcache> = ctx.base.alloc_node(ctx.platform, NodeKind::Tcache)?;

        //  Safety:
        //  -   `tcache` is suitably sized and aligned, and exclusively owned.
        unsafe {
            ptr::write(tcache.as_ptr(), Tcache::new(arena));
            owner.link_tcache(tcache);
        }

        Some(tcache)
    }

    /// Flushes, unlinks and returns a thread cache to base.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `tcache` was created by `create`, and is no longer used.
    pub(crate) unsafe fn destroy<P: Platform>(ctx: &Context<'_, P>, tcache: NonNull<Tcache>) {
        (*tcache.as_ptr()).flush_all(ctx);

        if let Some(owner) = ctx.pool.get(tcache.as_ref().arena) {
            owner.unlink_tcache(tcache);
        }

        ctx.base.free_node(NodeKind::Tcache, tcache);
    }

    /// Moves a thread cache to `arena`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `tcache` is linked, and only used by the calling thread.
    pub(crate) unsafe fn reassociate<P: Platform>(ctx: &Context<'_, P>, tcache: NonNull<Tcache>, arena: usize) {
        let current = tcache.as_ref().arena;

        if current == arena {
            return;
        }

        let target = match ctx.pool.get(arena) {
            Some(target) => target,
            None => return,
        };

        if let Some(owner) = ctx.pool.get(current) {
            owner.unlink_tcache(tcache);
        }

        (*tcache.as_ptr()).arena = arena;
        target.link_tcache(tcache);
    }

    /// Allocates a region of class `bin`, refilling from the arena if necessary.
    pub(crate) fn alloc<P: Platform>(&mut self, ctx: &Context<'_, P>, bin: BinIndex) -> Option<NonNull<u8>> {
        let arena = self.arena;
        let cached = &mut self.bins[bin.value()];

        if STATS {
            cached.requests.fetch_add(1, Ordering::Relaxed);
        }

        if cached.ncached == 0 {
            let owner = ctx.pool.get(arena)?;
            cached.ncached = owner.fill_small(ctx, bin, &mut cached.avail[..TCACHE_FILL]);
        }

        if cached.ncached == 0 {
            return None;
        }

        cached.ncached -= 1;
        NonNull::new(cached.avail[cached.ncached])
    }

    /// Caches a region of class `bin`, flushing half the stack if full.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live region of class `bin`, no longer referenced.
    pub(crate) unsafe fn dalloc<P: Platform>(&mut self, ctx: &Context<'_, P>, pointer: NonNull<u8>, bin: BinIndex) {
        if self.bins[bin.value()].ncached == TCACHE_CAPACITY {
            self.flush(ctx, bin, TCACHE_CAPACITY / 2);
        }

        let cached = &mut self.bins[bin.value()];
        cached.avail[cached.ncached] = pointer.as_ptr();
        cached.ncached += 1;
    }

    /// Flushes all the cached regions.
    pub(crate) fn flush_all<P: Platform>(&mut self, ctx: &Context<'_, P>) {
        for index in 0..NBINS {
            if let Some(bin) = BinIndex::new(index) {
                self.flush(ctx, bin, 0);
            }
        }
    }

    /// Returns the number of regions cached for `bin`.
    #[cfg(test)]
    pub(crate) fn ncached(&self, bin: BinIndex) -> usize { self.bins[bin.value()].ncached }

    /// Takes the request counters, resetting them.
    pub(crate) fn take_requests(&self) -> impl Iterator<Item = u64> + '_ {
        self.bins.iter().map(|bin| bin.requests.swap(0, Ordering::Relaxed))
    }

    const fn new(arena: usize) -> Tcache {
        const EMPTY: TcacheBin = TcacheBin {
            ncached: 0,
            requests: AtomicU64::new(0),
            avail: [ptr::null_mut(); TCACHE_CAPACITY],
        };

        Tcache { arena, next: ptr::null_mut(), prev: ptr::null_mut(), bins: [EMPTY; NBINS] }
    }

    //  Flushes the oldest regions of `bin`, keeping the `keep` most recent ones.
    fn flush<P: Platform>(&mut self, ctx: &Context<'_, P>, bin: BinIndex, keep: usize) {
        let chunk = ctx.classes.chunk_size();
        let own = self.arena;
        let cached = &mut self.bins[bin.value()];

        if cached.ncached <= keep {
            return;
        }

        let count = cached.ncached - keep;

        loop {
            let first = match cached.avail[..count].iter().copied().find(|region| !region.is_null()) {
                Some(first) => first,
                None => break,
            };

            //  Safety:
            //  -   `first` is a live small region, and thus within an arena chunk.
            unsafe {
                let owner = arena::owner(NonNull::new_unchecked(first), chunk);

                let requests = if owner.index() == own { cached.requests.swap(0, Ordering::Relaxed) } else { 0 };

                owner.dalloc_batch(ctx, bin, &mut cached.avail[..count], requests);
            }
        }

        cached.avail.copy_within(count..cached.ncached, 0);
        cached.ncached = keep;
    }
}
