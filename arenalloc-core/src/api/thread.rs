//! Thread State
//!
//! The Thread State is the per-thread record of the heap: the arena the thread is bound to, its cumulative
//! allocated and deallocated byte counters, its thread cache, its sampling state and its quarantine.
//!
//! The user is expected to keep one for each of the threads they use, and on each call to refer to the thread-local
//! state. A state is acquired from `Heap::acquire_thread_state` and must be handed back to
//! `Heap::release_thread_state` when the thread exits.
//!
//! Whenever no such state is available yet, or any longer, for example while the thread-local slot is being set up
//! or after the thread-exit destructor ran, a _transient_ state is used for the duration of the call instead. A
//! transient state never persists an arena binding, never counts towards the load of an arena, never uses a thread
//! cache and never quarantines.
//!
//! #   Safety
//!
//! A Thread State _assumes_ it is only used from a single thread, and makes no attempt at synchronizing memory
//! accesses.

use core::ptr::NonNull;

use crate::internals::{prof::ProfThread, quarantine::Quarantine, tcache::Tcache};

/// Status of a thread state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThreadStatus {
    /// A persistent state.
    Nominal,
    /// A transient state, used while the persistent state is being set up.
    Reentrant,
    /// A transient state, used after the persistent state was released.
    Purgatory,
}

/// Per-thread state of the heap.
pub struct ThreadState {
    status: ThreadStatus,
    pub(crate) arena: Option<usize>,
    pub(crate) allocated: u64,
    pub(crate) deallocated: u64,
    pub(crate) tcache: Option<NonNull<Tcache>>,
    pub(crate) prof: ProfThread,
    pub(crate) quarantine: Quarantine,
}

impl ThreadState {
    /// Creates a nominal state, not bound to any arena yet.
    ///
    /// Only states handed out by `Heap::acquire_thread_state` should be nominal.
    pub(crate) const fn new() -> Self { Self::with_status(ThreadStatus::Nominal) }

    /// Creates a transient state, for the duration of one call.
    ///
    /// A `Nominal` status is demoted to `Reentrant`.
    pub const fn transient(status: ThreadStatus) -> Self {
        match status {
            ThreadStatus::Nominal => Self::with_status(ThreadStatus::Reentrant),
            _ => Self::with_status(status),
        }
    }

    /// Returns the status.
    pub fn status(&self) -> ThreadStatus { self.status }

    /// Returns whether the state is persistent.
    pub fn is_nominal(&self) -> bool { self.status == ThreadStatus::Nominal }

    /// Returns the index of the arena the thread is bound to, if any.
    pub fn arena(&self) -> Option<usize> { self.arena }

    /// Returns the cumulative number of bytes allocated.
    pub fn allocated(&self) -> u64 { self.allocated }

    /// Returns the cumulative number of bytes deallocated.
    pub fn deallocated(&self) -> u64 { self.deallocated }

    /// Binds the thread to `arena`, unless transient.
    pub(crate) fn bind(&mut self, arena: usize) {
        if self.is_nominal() {
            self.arena = Some(arena);
        }
    }

    pub(crate) fn record_allocation(&mut self, usable: usize) {
        self.allocated = self.allocated.wrapping_add(usable as u64);
    }

    pub(crate) fn record_deallocation(&mut self, usable: usize) {
        self.deallocated = self.deallocated.wrapping_add(usable as u64);
    }

    const fn with_status(status: ThreadStatus) -> Self {
        Self {
            status,
            arena: None,
            allocated: 0,
            deallocated: 0,
            tcache: None,
            prof: ProfThread::new(),
            quarantine: Quarantine::new(),
        }
    }
}
