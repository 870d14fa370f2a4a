//! Heap
//!
//! An instance of the Heap is a complete, self-contained, allocator:
//!
//! -   It is lazily booted on first use, see `Heap::initialize`.
//! -   It serves any number of threads, each represented by its `ThreadState`.
//! -   It returns memory to its `Platform` only for huge allocations and surplus chunks, never for its own metadata.
//!
//! Typically, applications will use a single, global, Heap.

use core::{
    cell::UnsafeCell,
    cmp,
    ptr::{self, NonNull},
    sync::atomic::AtomicBool,
};

use crate::{
    configuration::{PROF, STATS, UTRACE, XMALLOC},
    AllocError, InitError, MallocxFlags, Options, Platform, PowerOf2, SizeClasses, ThreadState, UtraceRecord,
    LARGE_MINCLASS, PAGE, SMALL_MAXCLASS,
};
use crate::internals::{
    arena,
    arena_pool::ArenaPool,
    base::{Base, NodeKind},
    bins::BinInfos,
    chunk_map,
    chunks::Chunks,
    context::Context,
    diagnostics::diagnostic,
    huge::Huge,
    init::InitState,
    mutex::Mutex,
    prof::{ProfToken, Profiler},
    tcache::Tcache,
};

/// Immutable state, written once during boot.
pub(crate) struct Globals {
    pub(crate) options: Options,
    pub(crate) classes: SizeClasses,
    pub(crate) bins: BinInfos,
    pub(crate) tcache_nbins: usize,
}

/// Heap.
///
/// All allocation and deallocation methods take the `ThreadState` of the calling thread. A thread which has no state
/// available, for example while its thread-local slot is being set up, uses `ThreadState::transient`.
pub struct Heap<P> {
    pub(crate) platform: P,
    pub(crate) init: InitState,
    pub(crate) globals: UnsafeCell<Globals>,
    pub(crate) chunks: Chunks,
    pub(crate) base: Base,
    pub(crate) huge: Huge,
    pub(crate) pool: ArenaPool,
    pub(crate) prof: Profiler,
    pub(crate) ctl: Mutex<()>,
    pub(crate) exit_hook: AtomicBool,
    pub(crate) forking: AtomicBool,
}

//  Safety:
//  -   `globals` is only written during boot, under the init lock, and only read once initialized or by the booting
//      thread itself.
unsafe impl<P: Send> Send for Heap<P> {}

//  Safety:
//  -   See `Send`.
unsafe impl<P: Sync> Sync for Heap<P> {}

impl<P> Heap<P> {
    /// Creates a Heap, not booted yet.
    ///
    /// The Heap will reserve memory from the `platform`, and return it to the `platform`.
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            init: InitState::new(),
            globals: UnsafeCell::new(Globals {
                options: Options::DEFAULT,
                classes: SizeClasses::DEFAULT,
                bins: BinInfos::new(false),
                tcache_nbins: 0,
            }),
            chunks: Chunks::new(),
            base: Base::new(),
            huge: Huge::new(),
            pool: ArenaPool::new(),
            prof: Profiler::new(),
            ctl: Mutex::new(()),
            exit_hook: AtomicBool::new(false),
            forking: AtomicBool::new(false),
        }
    }

    /// Returns the platform.
    pub fn platform(&self) -> &P { &self.platform }
}

impl<P: Platform> Heap<P> {
    /// Boots the Heap, if not already done.
    ///
    /// Concurrent callers wait for the first one to complete boot. A recursive call from within boot, by the booting
    /// thread, returns immediately.
    ///
    /// A failure which left no trace is retried by the next call, any other failure is permanent.
    #[inline(always)]
    pub fn initialize(&self) -> Result<(), InitError> {
        self.init.ensure(&self.platform, |booting| self.boot(booting))
    }

    /// Returns whether the Heap is initialized.
    pub fn is_initialized(&self) -> bool { self.init.is_initialized() }

    /// Returns the options in effect, once initialized.
    pub fn options(&self) -> Option<&Options> {
        if self.is_initialized() { Some(&self.globals().options) } else { None }
    }

    /// Returns the size classes in effect, once initialized.
    pub fn size_classes(&self) -> Option<&SizeClasses> {
        if self.is_initialized() { Some(&self.globals().classes) } else { None }
    }

    /// Returns the number of arenas eligible for automatic assignment.
    pub fn narenas_auto(&self) -> usize { self.pool.narenas_auto() }

    /// Returns the number of arenas, including those created explicitly.
    pub fn narenas_total(&self) -> usize { self.pool.narenas_total() }

    /// Returns the number of threads bound to arena `index`, if it exists.
    pub fn arena_nthreads(&self, index: usize) -> Option<usize> {
        self.pool.get(index)?;
        self.pool.nthreads(index)
    }

    /// Returns the index of the arena of `thread`, binding it on first use.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn choose_arena(&self, thread: &mut ThreadState) -> Option<usize> {
        self.initialize().ok()?;

        let ctx = self.context();

        ctx.pool.choose(&ctx, thread).map(|arena| arena.index())
    }

    /// Acquires a fresh thread state, initializing the Heap if necessary.
    ///
    /// The state must be handed back to `release_thread_state` once the thread is done.
    pub fn acquire_thread_state(&self) -> Option<NonNull<ThreadState>> {
        self.initialize().ok()?;

        let state: NonNull<ThreadState> = self.base.alloc_node(&self.platform, NodeKind::ThreadState)?;

        //  Safety:
        //  -   `state` is suitably sized and aligned, and exclusively owned.
        unsafe { ptr::write(state.as_ptr(), ThreadState::new()) };

        Some(state)
    }

    /// Retires, then releases, a thread state.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `state` was acquired from `acquire_thread_state`, and is no longer used.
    pub unsafe fn release_thread_state(&self, state: NonNull<ThreadState>) {
        self.retire_thread(&mut *state.as_ptr());

        self.base.free_node(NodeKind::ThreadState, state);
    }

    /// Retires a thread: flushes its cache, drains its quarantine, and unbinds it from its arena.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, and is not accessed concurrently.
    pub unsafe fn retire_thread(&self, thread: &mut ThreadState) {
        if !self.is_initialized() {
            return;
        }

        let ctx = self.context();

        if let Some(mut tcache) = thread.tcache {
            tcache.as_mut().flush_all(&ctx);
        }

        ctx.drain_quarantine(thread, None);

        if let Some(tcache) = thread.tcache.take() {
            Tcache::destroy(&ctx, tcache);
        }

        ctx.pool.cleanup(thread);
    }

    /// Allocates `size` bytes.
    ///
    /// A zero-byte request is served as a one-byte request. On failure, `errno` is set.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn malloc(&self, thread: &mut ThreadState, size: usize) -> Result<NonNull<u8>, AllocError> {
        if let Err(error) = self.initialize() {
            return Err(self.fail("malloc", error.into(), true));
        }

        let ctx = self.context();

        let result = self.allocate(&ctx, thread, size, None, false, None);
        self.utrace(&ctx, None, size, result);

        result.ok_or_else(|| self.fail("malloc", AllocError::OutOfMemory, true))
    }

    /// Allocates `count * size` zero-filled bytes.
    ///
    /// Fails, without allocating, if the product overflows.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn calloc(&self, thread: &mut ThreadState, count: usize, size: usize)
        -> Result<NonNull<u8>, AllocError>
    {
        if let Err(error) = self.initialize() {
            return Err(self.fail("calloc", error.into(), true));
        }

        let total = match checked_calloc_size(count, size) {
            Some(total) => total,
            None => return Err(self.fail("calloc", AllocError::OutOfMemory, true)),
        };

        let ctx = self.context();

        let result = self.allocate(&ctx, thread, total, None, true, None);
        self.utrace(&ctx, None, total, result);

        result.ok_or_else(|| self.fail("calloc", AllocError::OutOfMemory, true))
    }

    /// Allocates `size` bytes aligned on `alignment`, which must be a power of 2 at least as large as a pointer.
    ///
    /// Fails with `InvalidArgument` on an invalid alignment, `errno` is left untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn posix_memalign(&self, thread: &mut ThreadState, alignment: usize, size: usize)
        -> Result<NonNull<u8>, AllocError>
    {
        self.allocate_aligned(thread, alignment, size, core::mem::size_of::<*mut u8>(), false)
    }

    /// Allocates `size` bytes aligned on `alignment`, which must be a power of 2.
    ///
    /// On failure, `errno` is set.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn aligned_alloc(&self, thread: &mut ThreadState, alignment: usize, size: usize)
        -> Result<NonNull<u8>, AllocError>
    {
        self.allocate_aligned(thread, alignment, size, 1, true)
    }

    /// Allocates `size` bytes aligned on `alignment`, which must be a power of 2.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn memalign(&self, thread: &mut ThreadState, alignment: usize, size: usize)
        -> Result<NonNull<u8>, AllocError>
    {
        self.allocate_aligned(thread, alignment, size, 1, false)
    }

    /// Allocates `size` bytes aligned on a page.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn valloc(&self, thread: &mut ThreadState, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(thread, PAGE.value(), size, 1, false)
    }

    /// Resizes `pointer` to `size` bytes.
    ///
    /// -   A null `pointer` is equivalent to `malloc(size)`.
    /// -   A zero `size` is equivalent to `free(pointer)`, and returns no memory.
    ///
    /// On failure, `pointer` is left untouched, and `errno` is set.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer`, if any, was allocated by this Heap and not freed yet.
    pub unsafe fn realloc(&self, thread: &mut ThreadState, pointer: Option<NonNull<u8>>, size: usize)
        -> Result<Option<NonNull<u8>>, AllocError>
    {
        let pointer = match pointer {
            Some(pointer) => pointer,
            None => return self.malloc(thread, size).map(Some),
        };

        if size == 0 {
            self.free(thread, Some(pointer));
            return Ok(None);
        }

        if let Err(error) = self.initialize() {
            return Err(self.fail("realloc", error.into(), true));
        }

        let ctx = self.context();

        let old_usable = ctx.isalloc(pointer, true);
        let usable = ctx.classes.s2u(size);

        let result = if usable == 0 {
            None
        } else {
            self.reallocate(&ctx, thread, pointer, old_usable, size, usable, None, false, None, true)
        };

        self.utrace(&ctx, Some(pointer), size, result);

        result.map(Some).ok_or_else(|| self.fail("realloc", AllocError::OutOfMemory, true))
    }

    /// Frees `pointer`, if not null.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer`, if any, was allocated by this Heap and not freed yet.
    pub unsafe fn free(&self, thread: &mut ThreadState, pointer: Option<NonNull<u8>>) {
        if let Some(pointer) = pointer {
            self.deallocate(thread, pointer, true);
        }
    }

    /// Allocates `size` bytes, as specified by `flags`.
    ///
    /// `errno` is left untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn mallocx(&self, thread: &mut ThreadState, size: usize, flags: MallocxFlags)
        -> Result<NonNull<u8>, AllocError>
    {
        let request = flags.decode().map_err(|error| self.fail("mallocx", error, false))?;

        if let Err(error) = self.initialize() {
            return Err(self.fail("mallocx", error.into(), false));
        }

        let ctx = self.context();

        let result = self.allocate(&ctx, thread, size, request.alignment, request.zero, request.arena);
        self.utrace(&ctx, None, size, result);

        result.ok_or_else(|| self.fail("mallocx", AllocError::OutOfMemory, false))
    }

    /// Resizes `pointer` to `size` bytes, as specified by `flags`, moving it if necessary.
    ///
    /// On failure, `pointer` is left untouched, and `errno` is left untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer` was allocated by this Heap and not freed yet.
    pub unsafe fn rallocx(&self, thread: &mut ThreadState, pointer: NonNull<u8>, size: usize, flags: MallocxFlags)
        -> Result<NonNull<u8>, AllocError>
    {
        let request = flags.decode().map_err(|error| self.fail("rallocx", error, false))?;

        if let Err(error) = self.initialize() {
            return Err(self.fail("rallocx", error.into(), false));
        }

        let ctx = self.context();

        let size = cmp::max(size, 1);
        let old_usable = ctx.isalloc(pointer, true);
        let usable = usable_for(&ctx.classes, size, request.alignment);
        let tcache = dalloc_tcache(&ctx, pointer, request.arena);

        let result = if usable == 0 {
            None
        } else {
            self.reallocate(
                &ctx, thread, pointer, old_usable, size, usable, request.alignment, request.zero, request.arena, tcache)
        };

        self.utrace(&ctx, Some(pointer), size, result);

        result.ok_or_else(|| self.fail("rallocx", AllocError::OutOfMemory, false))
    }

    /// Resizes `pointer` in place to at least `size` bytes, and up to `size + extra` bytes, as specified by `flags`.
    ///
    /// Returns the resulting usable size, which is the original usable size if the resize was not possible. Sampled
    /// allocations are never resized in place.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer` was allocated by this Heap and not freed yet.
    pub unsafe fn xallocx(
        &self,
        thread: &mut ThreadState,
        pointer: NonNull<u8>,
        size: usize,
        extra: usize,
        flags: MallocxFlags,
    )
        -> usize
    {
        let ctx = self.context();
        let old_usable = ctx.isalloc(pointer, true);

        let request = match flags.decode() {
            Ok(request) => request,
            Err(_) => return old_usable,
        };

        if let Some(alignment) = request.alignment {
            if !alignment.is_aligned(pointer.as_ptr() as usize) {
                return old_usable;
            }
        }

        let size = cmp::max(size, 1);
        let extra = cmp::min(extra, usize::MAX - size);

        let min = usable_for(&ctx.classes, size, request.alignment);
        let max = match usable_for(&ctx.classes, size + extra, request.alignment) {
            0 => min,
            max => max,
        };

        if min == 0 || (PROF && ctx.prof.is_sampled(&ctx, pointer)) {
            return old_usable;
        }

        let physical = ctx.isalloc(pointer, false);

        if ctx.ixalloc(pointer, physical, min, max, request.zero).is_none() {
            return old_usable;
        }

        let new_usable = ctx.isalloc(pointer, true);

        if STATS {
            thread.record_deallocation(old_usable);
            thread.record_allocation(new_usable);
        }

        self.utrace(&ctx, Some(pointer), size, Some(pointer));

        new_usable
    }

    /// Returns the usable size of `pointer`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer` was allocated by this Heap and not freed yet.
    pub unsafe fn sallocx(&self, pointer: NonNull<u8>, flags: MallocxFlags) -> usize {
        let _ = flags;

        self.context().isalloc(pointer, true)
    }

    /// Frees `pointer`, as specified by `flags`.
    ///
    /// With an explicit arena, the thread cache is only used if the arena owns `pointer`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer` was allocated by this Heap and not freed yet.
    pub unsafe fn dallocx(&self, thread: &mut ThreadState, pointer: NonNull<u8>, flags: MallocxFlags) {
        let explicit = flags.decode().ok().and_then(|request| request.arena);
        let tcache = dalloc_tcache(&self.context(), pointer, explicit);

        self.deallocate(thread, pointer, tcache);
    }

    /// Frees `pointer`, of `size` bytes, as specified by `flags`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    /// -   Assumes that `pointer` was allocated by this Heap and not freed yet, with a usable size of at least `size`.
    pub unsafe fn sdallocx(&self, thread: &mut ThreadState, pointer: NonNull<u8>, size: usize, flags: MallocxFlags) {
        debug_assert!(size <= self.context().isalloc(pointer, true));

        self.dallocx(thread, pointer, flags);
    }

    /// Returns the usable size an allocation of `size` bytes, as specified by `flags`, would have.
    ///
    /// Returns 0 if the Heap cannot be initialized, the flags are invalid, or the size overflows.
    pub fn nallocx(&self, size: usize, flags: MallocxFlags) -> usize {
        if self.initialize().is_err() {
            return 0;
        }

        match flags.decode() {
            Ok(request) => usable_for(&self.globals().classes, cmp::max(size, 1), request.alignment),
            Err(_) => 0,
        }
    }

    /// Returns the usable size of `pointer`, or 0 if null.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `pointer`, if any, was allocated by this Heap and not freed yet.
    pub unsafe fn usable_size(&self, pointer: Option<NonNull<u8>>) -> usize {
        match pointer {
            Some(pointer) => self.context().isalloc(pointer, true),
            None => 0,
        }
    }

    /// Returns the booted state, as seen by the internals.
    pub(crate) fn context(&self) -> Context<'_, P> {
        let globals = self.globals();

        Context {
            platform: &self.platform,
            options: &globals.options,
            classes: &globals.classes,
            bins: &globals.bins,
            tcache_nbins: globals.tcache_nbins,
            chunks: &self.chunks,
            base: &self.base,
            huge: &self.huge,
            pool: &self.pool,
            prof: &self.prof,
        }
    }

    pub(crate) fn globals(&self) -> &Globals {
        //  Safety:
        //  -   Only written during boot, by the booting thread, between reads.
        unsafe { &*self.globals.get() }
    }

    unsafe fn allocate_aligned(
        &self,
        thread: &mut ThreadState,
        alignment: usize,
        size: usize,
        min_alignment: usize,
        set_errno: bool,
    )
        -> Result<NonNull<u8>, AllocError>
    {
        if let Err(error) = self.initialize() {
            return Err(self.fail_aligned(error.into(), set_errno));
        }

        let alignment = match PowerOf2::new(alignment) {
            Some(alignment) if alignment.value() >= min_alignment => alignment,
            _ => return Err(self.fail_aligned(AllocError::InvalidArgument, set_errno)),
        };

        let ctx = self.context();

        let result = self.allocate(&ctx, thread, size, Some(alignment), false, None);
        self.utrace(&ctx, None, size, result);

        result.ok_or_else(|| self.fail_aligned(AllocError::OutOfMemory, set_errno))
    }

    //  Common path of all allocations, once initialized.
    unsafe fn allocate(
        &self,
        ctx: &Context<'_, P>,
        thread: &mut ThreadState,
        size: usize,
        alignment: Option<PowerOf2>,
        zero: bool,
        explicit: Option<usize>,
    )
        -> Option<NonNull<u8>>
    {
        let size = cmp::max(size, 1);
        let usable = usable_for(ctx.classes, size, alignment);

        if usable == 0 {
            return None;
        }

        let pointer = if PROF && ctx.prof.is_active() {
            self.allocate_sampled(ctx, thread, usable, alignment, zero, explicit)?
        } else {
            ctx.iallocate(thread, usable, alignment, zero, explicit)?
        };

        if STATS {
            thread.record_allocation(usable);
        }

        Some(pointer)
    }

    #[inline(never)]
    unsafe fn allocate_sampled(
        &self,
        ctx: &Context<'_, P>,
        thread: &mut ThreadState,
        usable: usize,
        alignment: Option<PowerOf2>,
        zero: bool,
        explicit: Option<usize>,
    )
        -> Option<NonNull<u8>>
    {
        let token = prof_prep(ctx, thread, usable);
        let physical = promoted_size(ctx, token, usable, alignment);

        match ctx.iallocate(thread, physical, alignment, zero, explicit) {
            Some(pointer) => {
                ctx.prof.malloc_record(ctx, pointer, usable, token);
                Some(pointer)
            },
            None => {
                ctx.prof.rollback(token);
                None
            },
        }
    }

    //  Common path of all reallocations, once initialized.
    #[allow(clippy::too_many_arguments)]
    unsafe fn reallocate(
        &self,
        ctx: &Context<'_, P>,
        thread: &mut ThreadState,
        pointer: NonNull<u8>,
        old_usable: usize,
        size: usize,
        usable: usize,
        alignment: Option<PowerOf2>,
        zero: bool,
        explicit: Option<usize>,
        tcache: bool,
    )
        -> Option<NonNull<u8>>
    {
        let old_sampled = PROF && ctx.prof.is_sampled(ctx, pointer);
        let token = if PROF && ctx.prof.is_active() { prof_prep(ctx, thread, usable) } else { ProfToken::Unsampled };
        let physical = promoted_size(ctx, token, usable, alignment);
        let copy = cmp::min(old_usable, size);

        let result = ctx.iralloc(thread, pointer, copy, physical, alignment, zero, explicit, tcache);

        let fresh = match result {
            Some(fresh) => fresh,
            None => {
                ctx.prof.rollback(token);
                return None;
            },
        };

        if PROF && (old_sampled || token.is_sampled()) {
            ctx.prof.realloc_record(ctx, fresh, usable, token, pointer, old_sampled);
        }

        if STATS {
            thread.record_deallocation(old_usable);
            thread.record_allocation(ctx.isalloc(fresh, true));
        }

        Some(fresh)
    }

    //  Common path of all deallocations.
    unsafe fn deallocate(&self, thread: &mut ThreadState, pointer: NonNull<u8>, tcache: bool) {
        let ctx = self.context();

        if PROF && ctx.prof.is_sampled(&ctx, pointer) {
            ctx.prof.free_record(pointer);
        }

        if STATS {
            thread.record_deallocation(ctx.isalloc(pointer, true));
        }

        self.utrace(&ctx, Some(pointer), 0, None);

        ctx.iqalloc(thread, pointer, tcache);
    }

    fn utrace(&self, ctx: &Context<'_, P>, pointer: Option<NonNull<u8>>, size: usize, result: Option<NonNull<u8>>) {
        if UTRACE && ctx.options.utrace {
            self.platform.utrace(&UtraceRecord { pointer, size, result });
        }
    }

    #[cold]
    #[inline(never)]
    fn fail(&self, name: &str, error: AllocError, set_errno: bool) -> AllocError {
        if XMALLOC && self.globals().options.xmalloc {
            diagnostic!(&self.platform, "Error in {}(): {}", name, error);
            self.platform.abort();
        }

        if set_errno {
            self.platform.set_errno(error);
        }

        error
    }

    #[cold]
    #[inline(never)]
    fn fail_aligned(&self, error: AllocError, set_errno: bool) -> AllocError {
        if XMALLOC && self.globals().options.xmalloc {
            let reason = match error {
                AllocError::InvalidArgument => "invalid alignment",
                AllocError::OutOfMemory => "out of memory",
            };

            diagnostic!(&self.platform, "Error allocating aligned memory: {}", reason);
            self.platform.abort();
        }

        if set_errno {
            self.platform.set_errno(error);
        }

        error
    }
}

/// Returns `count * size`, or `None` on overflow.
///
/// Both operands fitting in half a word is the common case, and cannot overflow.
fn checked_calloc_size(count: usize, size: usize) -> Option<usize> {
    const HIGH_HALF: usize = usize::MAX << (usize::BITS / 2);

    let total = count.wrapping_mul(size);

    if (count | size) & HIGH_HALF != 0 && size != 0 && total / size != count {
        return None;
    }

    Some(total)
}

fn usable_for(classes: &SizeClasses, size: usize, alignment: Option<PowerOf2>) -> usize {
    match alignment {
        None => classes.s2u(size),
        Some(alignment) => classes.sa2u(size, alignment),
    }
}

fn prof_prep<P: Platform>(ctx: &Context<'_, P>, thread: &mut ThreadState, usable: usize) -> ProfToken {
    if !thread.is_nominal() {
        return ProfToken::Unsampled;
    }

    ctx.prof.alloc_prep(&mut thread.prof, usable)
}

//  Sampled small allocations are promoted, so as to carry the sampled flag on a large run.
fn promoted_size<P: Platform>(ctx: &Context<'_, P>, token: ProfToken, usable: usize, alignment: Option<PowerOf2>)
    -> usize
{
    if !token.is_sampled() || usable > SMALL_MAXCLASS {
        return usable;
    }

    usable_for(ctx.classes, LARGE_MINCLASS, alignment)
}

//  With an explicit arena, the thread cache is only used if that arena owns `pointer`.
unsafe fn dalloc_tcache<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, explicit: Option<usize>) -> bool {
    let index = match explicit {
        Some(index) => index,
        None => return true,
    };

    let chunk = ctx.classes.chunk_size();

    if chunk_map::is_chunk_aligned(pointer, chunk) {
        return ctx.huge.arena_of(pointer) == Some(index);
    }

    arena::owner(pointer, chunk).index() == index
}
