//! Allocator

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use arenalloc_core::{
    self, AllocError, CtlError, CtlValue, InitError, MallocxFlags, PowerOf2, ThreadState, ThreadStatus, QUANTUM,
};

use crate::{ArPlatform, ArThreadLocal, Hooks, ThreadLocal};

/// Arena-based Allocator.
///
/// All instances share the same process-wide heap, and each thread keeps its own state in thread-local storage.
///
/// Failures set `errno` wherever the equivalent C function does.
#[derive(Clone, Copy, Default)]
pub struct Arenalloc;

impl Arenalloc {
    /// Creates an instance.
    pub const fn new() -> Self { Self }

    /// Initializes the heap, if not already done, and the state of the calling thread.
    ///
    /// Returns an error if the heap cannot be initialized.
    #[cold]
    pub fn warm_up(&self) -> Result<(), InitError> {
        HEAP.initialize()?;

        Thread::with(|_| ());

        Ok(())
    }

    /// Allocates `size` bytes.
    pub fn malloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.malloc(thread, size) })
    }

    /// Allocates `count * size` zero-filled bytes.
    pub fn calloc(&self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.calloc(thread, count, size) })
    }

    /// Allocates `size` bytes aligned on `alignment`, a power of 2 multiple of the size of a pointer.
    pub fn posix_memalign(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.posix_memalign(thread, alignment, size) })
    }

    /// Allocates `size` bytes aligned on `alignment`, a power of 2.
    pub fn aligned_alloc(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.aligned_alloc(thread, alignment, size) })
    }

    /// Allocates `size` bytes aligned on `alignment`, a power of 2.
    pub fn memalign(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.memalign(thread, alignment, size) })
    }

    /// Allocates `size` bytes aligned on a page.
    pub fn valloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.valloc(thread, size) })
    }

    /// Resizes `pointer` to `size` bytes, see `Heap::realloc`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer`, if any, has been returned by this allocator and not deallocated since.
    pub unsafe fn realloc(&self, pointer: Option<NonNull<u8>>, size: usize)
        -> Result<Option<NonNull<u8>>, AllocError>
    {
        Thread::with(|thread| HEAP.realloc(thread, pointer, size))
    }

    /// Deallocates `pointer`, if any.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer`, if any, has been returned by this allocator and not deallocated since.
    /// -   Assumes the memory pointed by `pointer` is no longer in use.
    pub unsafe fn free(&self, pointer: Option<NonNull<u8>>) {
        Thread::with(|thread| HEAP.free(thread, pointer))
    }

    /// Allocates `size` bytes, as specified by `flags`.
    pub fn mallocx(&self, size: usize, flags: MallocxFlags) -> Result<NonNull<u8>, AllocError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.mallocx(thread, size, flags) })
    }

    /// Resizes `pointer` to `size` bytes, as specified by `flags`, moving it if necessary.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by this allocator and not deallocated since.
    pub unsafe fn rallocx(&self, pointer: NonNull<u8>, size: usize, flags: MallocxFlags)
        -> Result<NonNull<u8>, AllocError>
    {
        Thread::with(|thread| HEAP.rallocx(thread, pointer, size, flags))
    }

    /// Resizes `pointer` in place, returning its resulting usable size.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by this allocator and not deallocated since.
    pub unsafe fn xallocx(&self, pointer: NonNull<u8>, size: usize, extra: usize, flags: MallocxFlags) -> usize {
        Thread::with(|thread| HEAP.xallocx(thread, pointer, size, extra, flags))
    }

    /// Returns the usable size of `pointer`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by this allocator and not deallocated since.
    pub unsafe fn sallocx(&self, pointer: NonNull<u8>, flags: MallocxFlags) -> usize { HEAP.sallocx(pointer, flags) }

    /// Deallocates `pointer`, as specified by `flags`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by this allocator and not deallocated since.
    /// -   Assumes the memory pointed by `pointer` is no longer in use.
    pub unsafe fn dallocx(&self, pointer: NonNull<u8>, flags: MallocxFlags) {
        Thread::with(|thread| HEAP.dallocx(thread, pointer, flags))
    }

    /// Deallocates `pointer`, of `size` bytes, as specified by `flags`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer` has been returned by this allocator, for at least `size` bytes, and not deallocated
    ///     since.
    /// -   Assumes the memory pointed by `pointer` is no longer in use.
    pub unsafe fn sdallocx(&self, pointer: NonNull<u8>, size: usize, flags: MallocxFlags) {
        Thread::with(|thread| HEAP.sdallocx(thread, pointer, size, flags))
    }

    /// Returns the usable size an allocation of `size` bytes, as specified by `flags`, would have; 0 if invalid.
    pub fn nallocx(&self, size: usize, flags: MallocxFlags) -> usize { HEAP.nallocx(size, flags) }

    /// Returns the usable size of `pointer`, or 0 if none.
    ///
    /// #   Safety
    ///
    /// -   Assumes `pointer`, if any, has been returned by this allocator and not deallocated since.
    pub unsafe fn usable_size(&self, pointer: Option<NonNull<u8>>) -> usize { HEAP.usable_size(pointer) }

    /// Reads the control `name`, and writes `new` if any, see `Heap::mallctl`.
    pub fn mallctl(&self, name: &[u8], new: Option<CtlValue<'_>>) -> Result<CtlValue<'static>, CtlError> {
        //  Safety:
        //  -   The thread state is that of the calling thread.
        Thread::with(|thread| unsafe { HEAP.mallctl(thread, name, new) })
    }

    /// Prints the statistics summary to the standard error.
    #[cold]
    pub fn stats_print(&self) { HEAP.stats_print(); }
}

unsafe impl GlobalAlloc for Arenalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let result = if layout.align() <= QUANTUM.value() && layout.align() <= layout.size() {
            self.malloc(layout.size())
        } else {
            self.mallocx(layout.size(), flags_of(&layout))
        };

        into_raw(result)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let result = if layout.align() <= QUANTUM.value() && layout.align() <= layout.size() {
            self.calloc(1, layout.size())
        } else {
            self.mallocx(layout.size(), flags_of(&layout) | MallocxFlags::ZERO)
        };

        into_raw(result)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.sdallocx(ptr, layout.size(), flags_of(&layout));
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return self.alloc(Layout::from_size_align_unchecked(new_size, layout.align())),
        };

        into_raw(self.rallocx(ptr, new_size, flags_of(&layout)))
    }
}

//
//  Integration test backdoors.
//
//  Unfortunately the backdoors have to be exposed as part of the public API for use in integration tests.
//

impl Arenalloc {
    /// Exposes the index of the arena the calling thread is bound to, if any.
    #[cold]
    #[doc(hidden)]
    pub fn thread_arena(&self) -> Option<usize> { Thread::with(|thread| thread.arena()) }

    /// Exposes the number of threads bound to arena `index`.
    #[cold]
    #[doc(hidden)]
    pub fn arena_nthreads(&self, index: usize) -> Option<usize> { HEAP.arena_nthreads(index) }

    /// Exposes the number of arenas eligible for automatic assignment.
    #[cold]
    #[doc(hidden)]
    pub fn narenas_auto(&self) -> usize { HEAP.narenas_auto() }
}

//
//  Implementation
//

type Heap = arenalloc_core::Heap<ArPlatform>;

//  Sentinel values of the thread-local slot, see `Thread`.
const REENTRANT: *mut ThreadState = 1 as *mut ThreadState;
const PURGATORY: *mut ThreadState = 2 as *mut ThreadState;

static HEAP: Heap = Heap::new(ArPlatform::new(Hooks {
    at_exit: at_exit_hook,
    prefork: prefork_hook,
    postfork_parent: postfork_parent_hook,
    postfork_child: postfork_child_hook,
}));

static THREAD_LOCAL: ArThreadLocal<ThreadState> = ArThreadLocal::new(release_thread);

extern "C" fn at_exit_hook() { HEAP.at_exit(); }

unsafe extern "C" fn prefork_hook() { HEAP.prefork(); }

unsafe extern "C" fn postfork_parent_hook() { HEAP.postfork_parent(); }

unsafe extern "C" fn postfork_child_hook() { HEAP.postfork_child(); }

//  Thread-exit destructor.
//
//  The slot was cleared prior to the call, and is set to PURGATORY so that any later allocation by another destructor
//  uses a transient state, rather than re-creating one.
#[cold]
unsafe extern "C" fn release_thread(slot: *mut libc::c_void) {
    let state = slot as *mut ThreadState;

    if state == REENTRANT {
        return;
    }

    THREAD_LOCAL.set(PURGATORY);

    if let Some(state) = NonNull::new(state).filter(|state| state.as_ptr() != PURGATORY) {
        HEAP.release_thread_state(state);
    }
}

//  The thread-local slot of a thread follows `null -> REENTRANT -> state -> PURGATORY`.
//
//  While REENTRANT or PURGATORY, and whenever the state cannot be set up, calls use a transient state.
struct Thread;

impl Thread {
    #[inline(always)]
    fn with<R, F>(fun: F) -> R
        where
            F: FnOnce(&mut ThreadState) -> R,
    {
        let slot = THREAD_LOCAL.get();

        if slot as usize > PURGATORY as usize {
            //  Safety:
            //  -   A non-sentinel slot points to the live state of this thread, only ever accessed from it.
            return fun(unsafe { &mut *slot });
        }

        Self::with_cold(slot, fun)
    }

    #[cold]
    #[inline(never)]
    fn with_cold<R, F>(slot: *mut ThreadState, fun: F) -> R
        where
            F: FnOnce(&mut ThreadState) -> R,
    {
        let status = if slot.is_null() {
            match Self::initialize() {
                //  Safety:
                //  -   The state was just installed for this thread, only ever accessed from it.
                Some(state) => return fun(unsafe { &mut *state.as_ptr() }),
                None => ThreadStatus::Reentrant,
            }
        } else if slot == REENTRANT {
            ThreadStatus::Reentrant
        } else {
            ThreadStatus::Purgatory
        };

        fun(&mut ThreadState::transient(status))
    }

    //  Installs a fresh state for this thread.
    //
    //  Any allocation performed while setting up, by the heap or libc, sees the REENTRANT sentinel.
    fn initialize() -> Option<NonNull<ThreadState>> {
        if !THREAD_LOCAL.set(REENTRANT) {
            return None;
        }

        let state = match HEAP.acquire_thread_state() {
            Some(state) => state,
            None => {
                THREAD_LOCAL.set(ptr::null_mut());
                return None;
            },
        };

        if !THREAD_LOCAL.set(state.as_ptr()) {
            //  Safety:
            //  -   `state` was never handed out.
            unsafe { HEAP.release_thread_state(state) };
            return None;
        }

        Some(state)
    }
}

fn flags_of(layout: &Layout) -> MallocxFlags {
    match PowerOf2::new(layout.align()) {
        Some(alignment) if alignment.value() > QUANTUM.value() => MallocxFlags::align(alignment),
        _ => MallocxFlags::NONE,
    }
}

fn into_raw(result: Result<NonNull<u8>, AllocError>) -> *mut u8 {
    result.map(NonNull::as_ptr).unwrap_or(ptr::null_mut())
}
