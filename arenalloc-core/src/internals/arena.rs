//! Arena
//!
//! An arena carves the small and large allocations of the threads bound to it out of chunks it owns. All its
//! mutable state sits behind a single lock.
//!
//! Each small class has a _current_ run, regions are served from it until it is full, at which point it is replaced
//! by a non-full run, or a fresh one. A run which becomes non-full again is pushed onto the list of non-full runs of
//! its class, and a run which becomes empty is released, unless current.
//!
//! A chunk whose runs are all released is kept as spare, at most one, or returned, unless `lg_dirty_mult` is
//! negative in which case all chunks are retained.

use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};

use crate::{configuration::STATS, BinIndex, Platform, PowerOf2, NBINS, PAGE};
use crate::internals::{
    chunk_map::{self, ChunkHeader, PageEntry, PageState},
    context::Context,
    mutex::Mutex,
    tcache::Tcache,
};

/// Statistics of a small class.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct BinStats {
    /// Regions handed out, to threads or thread caches.
    pub(crate) nmalloc: u64,
    /// Regions returned.
    pub(crate) ndalloc: u64,
    /// Requests, including those served by thread caches.
    pub(crate) nrequests: u64,
    /// Regions currently handed out.
    pub(crate) curregs: usize,
}

/// Statistics of an arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ArenaStats {
    pub(crate) allocated_small: usize,
    pub(crate) allocated_large: usize,
    pub(crate) nmalloc_large: u64,
    pub(crate) ndalloc_large: u64,
    pub(crate) nchunks: usize,
    pub(crate) bins: [BinStats; NBINS],
}

impl ArenaStats {
    const EMPTY: ArenaStats = ArenaStats {
        allocated_small: 0,
        allocated_large: 0,
        nmalloc_large: 0,
        ndalloc_large: 0,
        nchunks: 0,
        bins: [BinStats { nmalloc: 0, ndalloc: 0, nrequests: 0, curregs: 0 }; NBINS],
    };

    /// Returns the sum of small requests.
    pub(crate) fn nrequests_small(&self) -> u64 { self.bins.iter().map(|b| b.nrequests).sum() }

    /// Returns the sum of small allocations.
    pub(crate) fn nmalloc_small(&self) -> u64 { self.bins.iter().map(|b| b.nmalloc).sum() }

    /// Returns the sum of small deallocations.
    pub(crate) fn ndalloc_small(&self) -> u64 { self.bins.iter().map(|b| b.ndalloc).sum() }
}

/// Arena.
pub(crate) struct Arena {
    index: usize,
    inner: Mutex<ArenaInner>,
}

struct Bin {
    current: *mut u8,
    nonfull: *mut u8,
}

struct ArenaInner {
    bins: [Bin; NBINS],
    chunks: *mut ChunkHeader,
    spare: *mut ChunkHeader,
    tcaches: *mut Tcache,
    stats: ArenaStats,
}

//  Safety:
//  -   The chunks, runs and internal pointers are owned by the arena, the thread caches are only touched under lock.
unsafe impl Send for ArenaInner {}

impl Arena {
    /// Creates an arena in memory obtained from base.
    ///
    /// Returns `None` if out of memory.
    pub(crate) fn create<P: Platform>(ctx: &Context<'_, P>, index: usize) -> Option<NonNull<Arena>> {
        let arena: NonNull<Arena> = ctx.base.alloc(ctx.platform, Layout::new::<Arena>())?.cast();

        //  Safety:
        //  -   `arena` is suitably sized and aligned, and exclusively owned.
        unsafe { ptr::write(arena.as_ptr(), Arena::new(index)) };

        Some(arena)
    }

    /// Creates an instance.
    pub(crate) const fn new(index: usize) -> Arena {
        const EMPTY_BIN: Bin = Bin { current: ptr::null_mut(), nonfull: ptr::null_mut() };

        Arena {
            index,
            inner: Mutex::new(ArenaInner {
                bins: [EMPTY_BIN; NBINS],
                chunks: ptr::null_mut(),
                spare: ptr::null_mut(),
                tcaches: ptr::null_mut(),
                stats: ArenaStats::EMPTY,
            }),
        }
    }

    /// Returns the index of the arena, within the pool.
    pub(crate) fn index(&self) -> usize { self.index }

    /// Allocates a region of class `bin`.
    pub(crate) fn alloc_small<P: Platform>(&self, ctx: &Context<'_, P>, bin: BinIndex) -> Option<NonNull<u8>> {
        let mut inner = self.inner.lock();

        let region = inner.alloc_region(self, ctx, bin)?;

        inner.record_small(ctx, bin, 1);
        inner.stats.bins[bin.value()].nrequests += 1;

        Some(region)
    }

    /// Fills `regions` with regions of class `bin`, returns the number of regions filled in.
    pub(crate) fn fill_small<P: Platform>(&self, ctx: &Context<'_, P>, bin: BinIndex, regions: &mut [*mut u8])
        -> usize
    {
        let mut inner = self.inner.lock();

        let mut count = 0;

        for slot in regions.iter_mut() {
            match inner.alloc_region(self, ctx, bin) {
                Some(region) => *slot = region.as_ptr(),
                None => break,
            }

            count += 1;
        }

        inner.record_small(ctx, bin, count);

        count
    }

    /// Allocates a large run of `usable` bytes, aligned on `alignment`.
    pub(crate) fn alloc_large<P: Platform>(&self, ctx: &Context<'_, P>, usable: usize, alignment: PowerOf2)
        -> Option<NonNull<u8>>
    {
        debug_assert!(PAGE.is_aligned(usable));

        let pages = usable / PAGE;
        let alignment = if alignment > PAGE { alignment } else { PAGE };

        let mut inner = self.inner.lock();

        let (header, start) = inner.alloc_pages(self, ctx, pages, alignment)?;

        //  Safety:
        //  -   The pages were just reserved, within the chunk.
        unsafe { mark_run(header, start, pages, PageState::Large, 0) };

        if STATS {
            inner.stats.allocated_large += usable;
            inner.stats.nmalloc_large += 1;
        }

        NonNull::new(ChunkHeader::page_address(header, start))
    }

    /// Deallocates a small region or large run of this arena.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` was allocated by this arena, and is no longer referenced.
    pub(crate) unsafe fn dalloc<P: Platform>(&self, ctx: &Context<'_, P>, pointer: NonNull<u8>) {
        let mut inner = self.inner.lock();

        inner.dalloc(ctx, pointer);
    }

    /// Deallocates the regions of class `bin` owned by this arena, nulling them out, and merges `requests`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that all non-null regions are live regions of class `bin`, no longer referenced.
    pub(crate) unsafe fn dalloc_batch<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        bin: BinIndex,
        regions: &mut [*mut u8],
        requests: u64,
    )
    {
        let chunk = ctx.classes.chunk_size();

        let mut inner = self.inner.lock();

        for slot in regions.iter_mut() {
            let region = match NonNull::new(*slot) {
                Some(region) => region,
                None => continue,
            };

            if owner(region, chunk).index != self.index {
                continue;
            }

            inner.dalloc(ctx, region);
            *slot = ptr::null_mut();
        }

        if STATS {
            inner.stats.bins[bin.value()].nrequests += requests;
        }
    }

    /// Attempts to resize the large run at `pointer` in place.
    ///
    /// Shrinks to `max` if larger, grows to `max`, or failing that `min`, if smaller than `min`. Returns the new
    /// usable size on success.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live large run of `old` bytes of this arena.
    pub(crate) unsafe fn ralloc_large_in_place<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        pointer: NonNull<u8>,
        old: usize,
        min: usize,
        max: usize,
    )
        -> Option<usize>
    {
        debug_assert!(min <= max);

        if min <= old && old <= max {
            return Some(old);
        }

        let chunk = ctx.classes.chunk_size();
        let header = chunk_map::header_of(pointer, chunk);
        let page = chunk_map::page_of(pointer.as_ptr(), chunk);
        let old_pages = old / PAGE;

        let mut inner = self.inner.lock();

        if max < old {
            let new_pages = max / PAGE;

            ChunkHeader::entry(header, page).run_pages = new_pages as u32;
            inner.free_run(ctx, header, page + new_pages, old_pages - new_pages);

            if STATS {
                inner.stats.allocated_large -= old - max;
            }

            return Some(max);
        }

        let total = chunk.value() / PAGE;

        for target in [max, min].iter().copied() {
            let target_pages = target / PAGE;

            if page + target_pages > total {
                continue;
            }

            let free = (page + old_pages..page + target_pages)
                .all(|p| (*ChunkHeader::entry_ptr(header, p)).state == PageState::Free);

            if !free {
                continue;
            }

            mark_run(header, page + old_pages, target_pages - old_pages, PageState::Large, 0);
            for p in page + old_pages..page + target_pages {
                ChunkHeader::entry(header, p).run_page = page as u32;
            }

            ChunkHeader::entry(header, page).run_pages = target_pages as u32;

            if STATS {
                inner.stats.allocated_large += target - old;
            }

            return Some(target);
        }

        None
    }

    /// Tags a large run as sampled, with its promoted usable size, if any.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` is a live large run of this arena.
    pub(crate) unsafe fn set_sampled<P: Platform>(
        &self,
        ctx: &Context<'_, P>,
        pointer: NonNull<u8>,
        sampled: bool,
        promoted: usize,
    )
    {
        let chunk = ctx.classes.chunk_size();

        let _guard = self.inner.lock();

        let entry = ChunkHeader::entry(chunk_map::header_of(pointer, chunk), chunk_map::page_of(pointer.as_ptr(), chunk));

        if entry.state != PageState::Large {
            return;
        }

        entry.sampled = sampled;
        entry.promoted = if sampled { promoted as u32 } else { 0 };
    }

    /// Links a thread cache to this arena.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `tcache` is valid until unlinked, and not linked anywhere.
    pub(crate) unsafe fn link_tcache(&self, tcache: NonNull<Tcache>) {
        let mut inner = self.inner.lock();

        let tcache = tcache.as_ptr();

        (*tcache).prev = ptr::null_mut();
        (*tcache).next = inner.tcaches;

        if let Some(head) = NonNull::new(inner.tcaches) {
            (*head.as_ptr()).prev = tcache;
        }

        inner.tcaches = tcache;
    }

    /// Unlinks a thread cache from this arena, merging its statistics.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `tcache` is linked to this arena.
    pub(crate) unsafe fn unlink_tcache(&self, tcache: NonNull<Tcache>) {
        let mut inner = self.inner.lock();

        let tcache = tcache.as_ptr();

        inner.merge_tcache(&*tcache);

        match NonNull::new((*tcache).prev) {
            Some(prev) => (*prev.as_ptr()).next = (*tcache).next,
            None => inner.tcaches = (*tcache).next,
        }

        if let Some(next) = NonNull::new((*tcache).next) {
            (*next.as_ptr()).prev = (*tcache).prev;
        }

        (*tcache).next = ptr::null_mut();
        (*tcache).prev = ptr::null_mut();
    }

    /// Returns the statistics, after merging those of the linked thread caches.
    pub(crate) fn stats(&self) -> ArenaStats {
        let mut inner = self.inner.lock();

        let mut tcache = inner.tcaches;

        //  Safety:
        //  -   Linked thread caches are valid until unlinked, which requires the lock.
        unsafe {
            while let Some(current) = NonNull::new(tcache) {
                inner.merge_tcache(current.as_ref());
                tcache = current.as_ref().next;
            }
        }

        inner.stats
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

/// Returns the arena owning the chunk of `pointer`.
///
/// #   Safety
///
/// -   Assumes that `pointer` is within an arena chunk.
pub(crate) unsafe fn owner<'a>(pointer: NonNull<u8>, chunk: PowerOf2) -> &'a Arena {
    &*(*chunk_map::header_of(pointer, chunk).as_ptr()).arena
}

/// Physical layout of a live, non-huge, allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Run {
    /// A region of a small run.
    Small(BinIndex),
    /// A large run, of the given size, possibly sampled with a promoted size.
    Large { size: usize, sampled: bool, promoted: usize },
}

/// Returns the physical layout of `pointer`, without locking.
///
/// #   Safety
///
/// -   Assumes that `pointer` is a live, non-huge, allocation.
pub(crate) unsafe fn run_of(pointer: NonNull<u8>, chunk: PowerOf2) -> Run {
    let header = chunk_map::header_of(pointer, chunk);
    let page = chunk_map::page_of(pointer.as_ptr(), chunk);

    //  The fields read are immutable during the lifetime of the run.
    let run_page = (*ChunkHeader::entry_ptr(header, page)).run_page as usize;
    let entry = ChunkHeader::entry_ptr(header, run_page);

    match (*entry).state {
        PageState::Small => Run::Small(BinIndex::new((*entry).bin as usize).unwrap_or(BinIndex::SMALLEST)),
        _ => Run::Large {
            size: (*entry).run_pages as usize * PAGE,
            sampled: (*entry).sampled,
            promoted: (*entry).promoted as usize,
        },
    }
}

impl ArenaInner {
    fn record_small<P>(&mut self, ctx: &Context<'_, P>, bin: BinIndex, count: usize) {
        if !STATS {
            return;
        }

        let stats = &mut self.stats.bins[bin.value()];
        stats.nmalloc += count as u64;
        stats.curregs += count;

        self.stats.allocated_small += count * ctx.bins.get(bin).reg_size;
    }

    fn alloc_region<P: Platform>(&mut self, arena: &Arena, ctx: &Context<'_, P>, bin: BinIndex)
        -> Option<NonNull<u8>>
    {
        let chunk = ctx.classes.chunk_size();
        let info = *ctx.bins.get(bin);

        let mut run = self.bins[bin.value()].current;

        //  Safety:
        //  -   `run`, if not null, is a small run of this arena.
        if run.is_null() || unsafe { run_entry(run, chunk).nfree == 0 } {
            run = match self.pop_nonfull(chunk, bin) {
                Some(run) => run,
                None => self.alloc_small_run(arena, ctx, bin)?,
            };

            self.bins[bin.value()].current = run;
        }

        //  Safety:
        //  -   `run` is a non-full small run of this arena.
        unsafe {
            let entry = run_entry(run, chunk);
            debug_assert!(entry.nfree > 0);

            let region = if let Some(region) = NonNull::new(entry.free_list) {
                entry.free_list = ptr::read(region.as_ptr() as *const *mut u8);
                region.as_ptr()
            } else {
                let region = run.add(info.region_offset(entry.next_region as usize));
                entry.next_region += 1;
                region
            };

            entry.nfree -= 1;

            NonNull::new(region)
        }
    }

    fn alloc_small_run<P: Platform>(&mut self, arena: &Arena, ctx: &Context<'_, P>, bin: BinIndex)
        -> Option<*mut u8>
    {
        let info = ctx.bins.get(bin);

        let (header, start) = self.alloc_pages(arena, ctx, info.run_pages, PAGE)?;

        //  Safety:
        //  -   The pages were just reserved, within the chunk.
        unsafe {
            mark_run(header, start, info.run_pages, PageState::Small, bin.value() as u8);

            let entry = ChunkHeader::entry(header, start);
            entry.nfree = info.nregs as u32;
            entry.next_region = 0;
        }

        Some(ChunkHeader::page_address(header, start))
    }

    //  Finds `pages` free pages aligned on `alignment`, carving a new chunk if necessary.
    fn alloc_pages<P: Platform>(&mut self, arena: &Arena, ctx: &Context<'_, P>, pages: usize, alignment: PowerOf2)
        -> Option<(NonNull<ChunkHeader>, usize)>
    {
        let chunk = ctx.classes.chunk_size();
        let map_bias = ctx.classes.map_bias();

        let mut current = self.chunks;

        //  Safety:
        //  -   The chunks of the list are owned by this arena.
        unsafe {
            while let Some(header) = NonNull::new(current) {
                if header.as_ref().free_pages >= pages {
                    if let Some(start) = find_free_run(header, chunk, map_bias, pages, alignment) {
                        return Some((header, start));
                    }
                }

                current = header.as_ref().next;
            }
        }

        let header = match NonNull::new(self.spare) {
            Some(spare) => {
                self.spare = ptr::null_mut();
                spare
            },
            None => {
                //  Safety:
                //  -   A single chunk, a non-zero multiple of itself.
                let reserved = unsafe { ctx.chunks.reserve(ctx.platform, chunk.value(), chunk)? };

                if STATS {
                    self.stats.nchunks += 1;
                }

                //  Safety:
                //  -   The chunk is exclusively owned.
                unsafe { ChunkHeader::initialize(reserved.pointer, chunk, map_bias, arena) }
            },
        };

        //  Safety:
        //  -   `header` is exclusively owned, and not linked.
        unsafe {
            (*header.as_ptr()).next = self.chunks;
            (*header.as_ptr()).prev = ptr::null_mut();

            if let Some(head) = NonNull::new(self.chunks) {
                (*head.as_ptr()).prev = header.as_ptr();
            }

            self.chunks = header.as_ptr();

            let start = find_free_run(header, chunk, map_bias, pages, alignment)?;

            Some((header, start))
        }
    }

    unsafe fn dalloc<P: Platform>(&mut self, ctx: &Context<'_, P>, pointer: NonNull<u8>) {
        let chunk = ctx.classes.chunk_size();
        let header = chunk_map::header_of(pointer, chunk);
        let page = chunk_map::page_of(pointer.as_ptr(), chunk);
        let run_page = ChunkHeader::entry(header, page).run_page as usize;
        let entry = *ChunkHeader::entry(header, run_page);

        match entry.state {
            PageState::Small => self.dalloc_region(ctx, header, run_page, pointer.as_ptr(), entry.bin()),
            PageState::Large => {
                debug_assert_eq!(page, run_page);

                let pages = entry.run_pages as usize;
                self.free_run(ctx, header, run_page, pages);

                if STATS {
                    self.stats.allocated_large -= pages * PAGE;
                    self.stats.ndalloc_large += 1;
                }
            },
            _ => debug_assert!(false, "Invalid deallocation of {:?}", pointer),
        }
    }

    unsafe fn dalloc_region<P: Platform>(
        &mut self,
        ctx: &Context<'_, P>,
        header: NonNull<ChunkHeader>,
        run_page: usize,
        region: *mut u8,
        bin: BinIndex,
    )
    {
        let chunk = ctx.classes.chunk_size();
        let info = *ctx.bins.get(bin);
        let run = ChunkHeader::page_address(header, run_page);

        debug_assert_eq!(0, (region as usize - run as usize - info.redzone) % info.interval);

        let entry = ChunkHeader::entry(header, run_page);

        ptr::write(region as *mut *mut u8, entry.free_list);
        entry.free_list = region;

        let was_full = entry.nfree == 0;
        entry.nfree += 1;

        let is_empty = entry.nfree as usize == info.nregs;
        let is_current = self.bins[bin.value()].current == run;

        if STATS {
            let stats = &mut self.stats.bins[bin.value()];
            stats.ndalloc += 1;
            stats.curregs -= 1;

            self.stats.allocated_small -= info.reg_size;
        }

        if is_current {
            return;
        }

        if is_empty {
            if !was_full {
                self.remove_nonfull(chunk, bin, run);
            }

            self.free_run(ctx, header, run_page, info.run_pages);
        } else if was_full {
            self.push_nonfull(chunk, bin, run);
        }
    }

    unsafe fn free_run<P: Platform>(&mut self, ctx: &Context<'_, P>, header: NonNull<ChunkHeader>, start: usize, pages: usize) {
        for page in start..start + pages {
            *ChunkHeader::entry(header, page) = PageEntry::FREE;
        }

        (*header.as_ptr()).free_pages += pages;

        let chunk = ctx.classes.chunk_size();
        let usable_pages = chunk.value() / PAGE - ctx.classes.map_bias();

        if header.as_ref().free_pages == usable_pages && ctx.options.lg_dirty_mult >= 0 {
            self.release_chunk(ctx, header);
        }
    }

    unsafe fn release_chunk<P: Platform>(&mut self, ctx: &Context<'_, P>, header: NonNull<ChunkHeader>) {
        let prev = header.as_ref().prev;
        let next = header.as_ref().next;

        match NonNull::new(prev) {
            Some(prev) => (*prev.as_ptr()).next = next,
            None => self.chunks = next,
        }

        if let Some(next) = NonNull::new(next) {
            (*next.as_ptr()).prev = prev;
        }

        if self.spare.is_null() {
            self.spare = header.as_ptr();
            return;
        }

        if STATS {
            self.stats.nchunks -= 1;
        }

        let chunk = ctx.classes.chunk_size();
        ctx.chunks.release(ctx.platform, header.cast(), chunk.value());
    }

    fn pop_nonfull(&mut self, chunk: PowerOf2, bin: BinIndex) -> Option<*mut u8> {
        let run = self.bins[bin.value()].nonfull;

        if run.is_null() {
            return None;
        }

        //  Safety:
        //  -   `run` is a small run of this arena.
        unsafe { self.remove_nonfull(chunk, bin, run) };

        Some(run)
    }

    unsafe fn push_nonfull(&mut self, chunk: PowerOf2, bin: BinIndex, run: *mut u8) {
        let head = self.bins[bin.value()].nonfull;

        let entry = run_entry(run, chunk);
        entry.prev_run = ptr::null_mut();
        entry.next_run = head;

        if !head.is_null() {
            run_entry(head, chunk).prev_run = run;
        }

        self.bins[bin.value()].nonfull = run;
    }

    unsafe fn remove_nonfull(&mut self, chunk: PowerOf2, bin: BinIndex, run: *mut u8) {
        let (prev, next) = {
            let entry = run_entry(run, chunk);
            let links = (entry.prev_run, entry.next_run);

            entry.prev_run = ptr::null_mut();
            entry.next_run = ptr::null_mut();

            links
        };

        if prev.is_null() {
            self.bins[bin.value()].nonfull = next;
        } else {
            run_entry(prev, chunk).next_run = next;
        }

        if !next.is_null() {
            run_entry(next, chunk).prev_run = prev;
        }
    }

    fn merge_tcache(&mut self, tcache: &Tcache) {
        if !STATS {
            return;
        }

        for (stats, requests) in self.stats.bins.iter_mut().zip(tcache.take_requests()) {
            stats.nrequests += requests;
        }
    }
}

//  Returns the authoritative entry of a run.
unsafe fn run_entry<'a>(run: *mut u8, chunk: PowerOf2) -> &'a mut PageEntry {
    let header = NonNull::new_unchecked(chunk.round_down(run as usize) as *mut ChunkHeader);

    ChunkHeader::entry(header, chunk_map::page_of(run, chunk))
}

unsafe fn mark_run(header: NonNull<ChunkHeader>, start: usize, pages: usize, state: PageState, bin: u8) {
    for page in start..start + pages {
        let entry = ChunkHeader::entry(header, page);

        *entry = PageEntry::FREE;
        entry.state = state;
        entry.bin = bin;
        entry.run_page = start as u32;
    }

    ChunkHeader::entry(header, start).run_pages = pages as u32;
    (*header.as_ptr()).free_pages -= pages;
}

unsafe fn find_free_run(
    header: NonNull<ChunkHeader>,
    chunk: PowerOf2,
    map_bias: usize,
    pages: usize,
    alignment: PowerOf2,
)
    -> Option<usize>
{
    let total = chunk.value() / PAGE;
    let base = header.as_ptr() as usize;

    let mut start = map_bias;

    while start + pages <= total {
        let address = base + start * PAGE;

        if !alignment.is_aligned(address) {
            start = (alignment.round_up(address) - base) / PAGE;
            continue;
        }

        let busy = (start..start + pages).find(|p| (*ChunkHeader::entry_ptr(header, *p)).state != PageState::Free);

        match busy {
            None => return Some(start),
            Some(busy) => start = busy + 1,
        }
    }

    None
}
