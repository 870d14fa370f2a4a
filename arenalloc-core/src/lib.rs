#![cfg_attr(not(test), no_std)]

#![deny(missing_docs)]

//! Building blocks for an arena-based, jemalloc-style, allocator.
//!
//! arenalloc-core contains the whole of the allocator, save for the OS services it needs:
//! -   A platform trait, used to reserve chunks of memory, to report diagnostics, and to reach the process hooks.
//! -   A `Heap`, the process context: lazily booted, configured from text, dispatching allocations to arenas.
//! -   A `ThreadState` per thread, leaving it up to the user to store it in thread-local storage.

mod api;
mod internals;
mod utils;

pub use api::*;
pub use utils::PowerOf2;
