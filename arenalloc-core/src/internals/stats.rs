//! Human-readable statistics report.
//!
//! The report is written line by line through the diagnostics of the platform, so that it never allocates.

use crate::{configuration::PROF, BinIndex, Opt, Platform};
use crate::api::{allocated, version};
use crate::internals::{
    arena::ArenaStats,
    context::Context,
    diagnostics::{self, Bytes},
};

macro_rules! emit {
    ($ctx:expr, $($arg:tt)*) => {
        diagnostics::line($ctx.platform, format_args!($($arg)*))
    };
}

/// Prints the report.
///
/// Takes the arena and huge locks, in turn, to snapshot their counters.
pub(crate) fn print<P: Platform>(ctx: &Context<'_, P>) {
    emit!(ctx, "___ Begin arenalloc statistics ___");
    emit!(ctx, "Version: {}", Bytes(version().to_bytes()));

    print_options(ctx);

    let chunk = ctx.classes.chunk_size();
    let (base_mapped, base_allocated) = ctx.base.usage();

    emit!(ctx, "Arenas: {} (automatic: {})", ctx.pool.narenas_total(), ctx.pool.narenas_auto());
    emit!(ctx, "Chunk size: {} (2^{})", chunk.value(), chunk.value().trailing_zeros());
    emit!(ctx, "Allocated: {}, mapped: {}, base: {}/{}",
        allocated(ctx), ctx.chunks.mapped() + base_mapped, base_allocated, base_mapped);

    for arena in ctx.pool.arenas() {
        let nthreads = ctx.pool.nthreads(arena.index()).unwrap_or(0);

        print_arena(ctx, arena.index(), nthreads, &arena.stats());
    }

    let huge = ctx.huge.stats();

    emit!(ctx, "huge: {:>12} {:>12} {:>12}", "allocated", "nmalloc", "ndalloc");
    emit!(ctx, "      {:>12} {:>12} {:>12}", huge.allocated, huge.nmalloc, huge.ndalloc);

    if PROF && ctx.prof.is_enabled() {
        let prof = ctx.prof.stats();

        emit!(ctx, "Profile: {} object(s), {} byte(s) live; {} object(s), {} byte(s) sampled",
            prof.curobjs, prof.curbytes, prof.accumobjs, prof.accumbytes);
    }

    emit!(ctx, "--- End arenalloc statistics ---");
}

fn print_options<P: Platform>(ctx: &Context<'_, P>) {
    emit!(ctx, "Run-time option settings:");

    for opt in Opt::ALL.iter().filter(|opt| opt.is_available()) {
        emit!(ctx, "  opt.{}: {}", opt.name(), opt.read(ctx.options));
    }
}

fn print_arena<P: Platform>(ctx: &Context<'_, P>, index: usize, nthreads: usize, stats: &ArenaStats) {
    emit!(ctx, "arenas[{}]:", index);
    emit!(ctx, "assigned threads: {}", nthreads);
    emit!(ctx, "chunks: {}", stats.nchunks);

    emit!(ctx, "        {:>12} {:>12} {:>12} {:>12}", "allocated", "nmalloc", "ndalloc", "nrequests");
    emit!(ctx, "small:  {:>12} {:>12} {:>12} {:>12}",
        stats.allocated_small, stats.nmalloc_small(), stats.ndalloc_small(), stats.nrequests_small());
    emit!(ctx, "large:  {:>12} {:>12} {:>12}", stats.allocated_large, stats.nmalloc_large, stats.ndalloc_large);

    emit!(ctx, "bins: {:>8} {:>4} {:>12} {:>12} {:>12} {:>12} {:>8}",
        "size", "ind", "allocated", "nmalloc", "ndalloc", "nrequests", "curregs");

    for (bin, counters) in stats.bins.iter().enumerate() {
        if counters.nrequests == 0 && counters.curregs == 0 {
            continue;
        }

        let size = BinIndex::new(bin).map(|b| b.size()).unwrap_or(0);

        emit!(ctx, "      {:>8} {:>4} {:>12} {:>12} {:>12} {:>12} {:>8}",
            size, bin, size * counters.curregs, counters.nmalloc, counters.ndalloc, counters.nrequests,
            counters.curregs);
    }
}
