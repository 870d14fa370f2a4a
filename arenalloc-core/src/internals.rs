//! The internals of arenalloc-core.
//!
//! The internals provide all the heavy-lifting: the collaborators of the heap, and the machinery tying them.

pub(crate) mod arena;
pub(crate) mod arena_pool;
pub(crate) mod base;
pub(crate) mod bins;
pub(crate) mod chunk_map;
pub(crate) mod chunks;
pub(crate) mod context;
pub(crate) mod diagnostics;
pub(crate) mod fill;
pub(crate) mod huge;
pub(crate) mod init;
pub(crate) mod mutex;
pub(crate) mod pipeline;
pub(crate) mod prof;
pub(crate) mod quarantine;
pub(crate) mod stats;
pub(crate) mod tcache;
