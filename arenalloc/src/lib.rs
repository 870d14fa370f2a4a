#![no_std]
#![deny(missing_docs)]

//! An arena-based, jemalloc-style, Memory Allocator library.
//!
//! The type `Arenalloc` provides a general-purpose memory allocator, as a drop-in replacement for regular allocators.
//!
//! Threads are spread over a number of arenas, 4 per CPU by default, to reduce contention; small allocations are
//! further served from per-thread caches.
//!
//! #   Configuration
//!
//! The heap is configured, on first use, from up to three `key:value,...` strings, later ones taking precedence:
//!
//! 1.  The `ARENALLOC_MALLOC_CONF` environment variable, at compile-time.
//! 2.  The target of the `/etc/malloc.conf` symbolic link.
//! 3.  The `MALLOC_CONF` environment variable, at run-time.
//!
//! For example: `MALLOC_CONF=narenas:4,stats_print:true`.

mod allocator;
mod platform;

pub use allocator::Arenalloc;

pub use arenalloc_core::{AllocError, CtlError, CtlKind, CtlName, CtlValue, InitError, MallocxFlags};

use platform::{ArPlatform, ArThreadLocal, Hooks, ThreadLocal};
