//! The booted state of a heap, as seen by its internals.

use crate::{Options, Platform, SizeClasses};
use crate::internals::{
    arena_pool::ArenaPool,
    base::Base,
    bins::BinInfos,
    chunks::Chunks,
    huge::Huge,
    prof::Profiler,
};

/// References to the booted state of a heap.
///
/// The options, size classes and bin layouts are immutable once built.
pub(crate) struct Context<'a, P> {
    pub(crate) platform: &'a P,
    pub(crate) options: &'a Options,
    pub(crate) classes: &'a SizeClasses,
    pub(crate) bins: &'a BinInfos,
    /// Number of small classes served by thread caches.
    pub(crate) tcache_nbins: usize,
    pub(crate) chunks: &'a Chunks,
    pub(crate) base: &'a Base,
    pub(crate) huge: &'a Huge,
    pub(crate) pool: &'a ArenaPool,
    pub(crate) prof: &'a Profiler,
}

impl<'a, P: Platform> Context<'a, P> {
    /// Reports a warning, aborting if so configured.
    #[cold]
    pub(crate) fn warn(&self, args: core::fmt::Arguments<'_>) {
        super::diagnostics::report(self.platform, args);

        if self.options.abort {
            self.platform.abort();
        }
    }
}
