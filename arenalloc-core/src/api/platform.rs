//! Platform
//!
//! The Platform trait is used to request memory directly from the Platform, and to reach the few process-wide
//! services the heap depends on: diagnostics, `errno`, configuration sources, process hooks. By abstracting the
//! underlying platform, it becomes possible to easily port the code to a different OS, or to test it in isolation.

use core::{
    num::NonZeroUsize,
    ptr::NonNull,
};

use crate::{AllocError, PowerOf2};

/// Identity of an OS thread, as seen by the platform.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    /// Creates an instance.
    pub const fn new(value: NonZeroUsize) -> Self { Self(value) }

    /// Returns the inner value.
    pub const fn value(&self) -> usize { self.0.get() }
}

/// A trace record, `(old pointer, requested size, result pointer)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UtraceRecord {
    /// The pointer passed in, if any.
    pub pointer: Option<NonNull<u8>>,
    /// The size requested, 0 for deallocations.
    pub size: usize,
    /// The pointer returned, if any.
    pub result: Option<NonNull<u8>>,
}

/// Abstraction of platform specific services.
pub trait Platform: Sync {
    /// Whether chunks may be obtained from the data segment.
    const SUPPORTS_DSS: bool = false;

    /// Prepares the platform for reserving chunks, returns false on failure.
    fn boot(&self) -> bool { true }

    /// Reserves a fresh, zero-filled, chunk of memory.
    ///
    /// May return `None` if the request cannot be satisfied.
    ///
    /// #   Safety
    ///
    /// The caller may assume that if the returned pointer is not null then:
    /// -   The number of usable bytes is _greater than or equal_ to `size`.
    /// -   The pointer is _at least_ aligned to `alignment`.
    /// -   The memory is zero-filled.
    ///
    /// `reserve_chunk` assumes that:
    /// -   `size` is non-zero, and a multiple of the page size.
    unsafe fn reserve_chunk(&self, size: usize, alignment: PowerOf2) -> Option<NonNull<u8>>;

    /// Releases a chunk of memory.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory after calling this function.
    ///
    /// `release_chunk` assumes that:
    /// -   `pointer` was reserved by this instance of `Platform`, with `size` as argument.
    unsafe fn release_chunk(&self, pointer: NonNull<u8>, size: usize);

    /// Returns the number of online CPUs.
    ///
    /// May allocate, through the heap.
    fn ncpus(&self) -> usize;

    /// Returns the identity of the calling thread.
    fn current_thread(&self) -> ThreadId;

    /// Yields the calling thread to the OS scheduler.
    fn yield_now(&self);

    /// Writes a diagnostic message, verbatim.
    ///
    /// Must not allocate.
    fn write_diagnostic(&self, message: &str);

    /// Aborts the process.
    fn abort(&self) -> !;

    /// Sets the standard error indicator of the calling thread.
    fn set_errno(&self, error: AllocError);

    /// Returns the compiled-in configuration string.
    fn default_conf(&self) -> &[u8] { b"" }

    /// Returns the configuration string encoded in the name of a symbolic link, stored in `buffer`.
    ///
    /// Must preserve the standard error indicator.
    fn conf_link<'a>(&self, buffer: &'a mut [u8]) -> &'a [u8] { &buffer[..0] }

    /// Returns the configuration string of the environment.
    fn conf_env(&self) -> &[u8] { b"" }

    /// Registers the exit-time hook of the heap, returns false on failure.
    fn register_exit_hook(&self) -> bool;

    /// Registers the fork hooks of the heap, returns false on failure.
    ///
    /// May allocate, through the heap.
    fn register_fork_handlers(&self) -> bool;

    /// Emits a trace record.
    fn utrace(&self, record: &UtraceRecord) { let _ = record; }
}
