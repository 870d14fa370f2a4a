//! Control
//!
//! A small, hierarchical, name space of values which can be read, and for some written, at run-time:
//!
//! -   `version`
//! -   `opt.<option>`, the options in effect.
//! -   `arenas.narenas`, `arenas.extend` and `arena.<i>.nthreads`.
//! -   `thread.arena`, `thread.allocated`, `thread.deallocated` and `thread.tcache.flush`.
//! -   `prof.active`.
//! -   `stats.allocated` and `stats.mapped`.
//!
//! Requests are serialized by the ctl lock, the outermost lock of the heap.

use core::{ffi::CStr, fmt};

use crate::{
    configuration::{FILL, PROF, STATS, TCACHE, UTRACE, XMALLOC},
    CtlError, Heap, Options, Platform, ThreadState,
};
use crate::internals::{context::Context, diagnostics::Bytes, tcache::Tcache};

/// Type of a control value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CtlKind {
    /// No value, the control is an action.
    Void,
    /// `bool`.
    Bool,
    /// `unsigned`.
    U32,
    /// `uint64_t`.
    U64,
    /// `size_t`.
    Size,
    /// `ssize_t`.
    SSize,
    /// `const char*`.
    Str,
}

/// A control value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CtlValue<'a> {
    /// No value.
    Void,
    /// A boolean.
    Bool(bool),
    /// An index or count.
    U32(u32),
    /// A cumulative counter.
    U64(u64),
    /// A size.
    Size(usize),
    /// A signed size, typically a base-2 logarithm where -1 stands for "none".
    SSize(isize),
    /// A string.
    Str(&'a CStr),
}

impl CtlValue<'_> {
    /// Returns the type of the value.
    pub fn kind(&self) -> CtlKind {
        match self {
            CtlValue::Void => CtlKind::Void,
            CtlValue::Bool(_) => CtlKind::Bool,
            CtlValue::U32(_) => CtlKind::U32,
            CtlValue::U64(_) => CtlKind::U64,
            CtlValue::Size(_) => CtlKind::Size,
            CtlValue::SSize(_) => CtlKind::SSize,
            CtlValue::Str(_) => CtlKind::Str,
        }
    }
}

impl fmt::Display for CtlValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtlValue::Void => Ok(()),
            CtlValue::Bool(value) => write!(f, "{}", value),
            CtlValue::U32(value) => write!(f, "{}", value),
            CtlValue::U64(value) => write!(f, "{}", value),
            CtlValue::Size(value) => write!(f, "{}", value),
            CtlValue::SSize(value) => write!(f, "{}", value),
            CtlValue::Str(value) => write!(f, "\"{}\"", Bytes(value.to_bytes())),
        }
    }
}

/// An option, as exposed under `opt.`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Opt {
    Abort,
    LgChunk,
    Dss,
    Narenas,
    LgDirtyMult,
    StatsPrint,
    Junk,
    Quarantine,
    Redzone,
    Zero,
    Utrace,
    Xmalloc,
    Tcache,
    LgTcacheMax,
    Prof,
    ProfPrefix,
    ProfActive,
    ProfThreadActiveInit,
    LgProfSample,
    ProfAccum,
    LgProfInterval,
    ProfGdump,
    ProfFinal,
    ProfLeak,
}

impl Opt {
    /// All options, in the order they are listed by the statistics.
    pub const ALL: [Opt; 24] = [
        Opt::Abort, Opt::LgChunk, Opt::Dss, Opt::Narenas, Opt::LgDirtyMult, Opt::StatsPrint,
        Opt::Junk, Opt::Quarantine, Opt::Redzone, Opt::Zero, Opt::Utrace, Opt::Xmalloc,
        Opt::Tcache, Opt::LgTcacheMax,
        Opt::Prof, Opt::ProfPrefix, Opt::ProfActive, Opt::ProfThreadActiveInit, Opt::LgProfSample, Opt::ProfAccum,
        Opt::LgProfInterval, Opt::ProfGdump, Opt::ProfFinal, Opt::ProfLeak,
    ];

    /// Returns the name of the option, as used in configuration strings.
    pub fn name(&self) -> &'static str {
        match self {
            Opt::Abort => "abort",
            Opt::LgChunk => "lg_chunk",
            Opt::Dss => "dss",
            Opt::Narenas => "narenas",
            Opt::LgDirtyMult => "lg_dirty_mult",
            Opt::StatsPrint => "stats_print",
            Opt::Junk => "junk",
            Opt::Quarantine => "quarantine",
            Opt::Redzone => "redzone",
            Opt::Zero => "zero",
            Opt::Utrace => "utrace",
            Opt::Xmalloc => "xmalloc",
            Opt::Tcache => "tcache",
            Opt::LgTcacheMax => "lg_tcache_max",
            Opt::Prof => "prof",
            Opt::ProfPrefix => "prof_prefix",
            Opt::ProfActive => "prof_active",
            Opt::ProfThreadActiveInit => "prof_thread_active_init",
            Opt::LgProfSample => "lg_prof_sample",
            Opt::ProfAccum => "prof_accum",
            Opt::LgProfInterval => "lg_prof_interval",
            Opt::ProfGdump => "prof_gdump",
            Opt::ProfFinal => "prof_final",
            Opt::ProfLeak => "prof_leak",
        }
    }

    /// Looks up an option by name, only if built in.
    pub fn from_name(name: &[u8]) -> Option<Opt> {
        Self::ALL.iter().copied().find(|opt| opt.is_available() && opt.name().as_bytes() == name)
    }

    /// Returns whether the option is built in.
    pub fn is_available(&self) -> bool {
        match self {
            Opt::Junk | Opt::Quarantine | Opt::Redzone | Opt::Zero => FILL,
            Opt::Utrace => UTRACE,
            Opt::Xmalloc => XMALLOC,
            Opt::Tcache | Opt::LgTcacheMax => TCACHE,
            Opt::Prof | Opt::ProfPrefix | Opt::ProfActive | Opt::ProfThreadActiveInit | Opt::LgProfSample |
            Opt::ProfAccum | Opt::LgProfInterval | Opt::ProfGdump | Opt::ProfFinal | Opt::ProfLeak => PROF,
            _ => true,
        }
    }

    /// Reads the value of the option.
    pub fn read<'a>(&self, options: &'a Options) -> CtlValue<'a> {
        match self {
            Opt::Abort => CtlValue::Bool(options.abort),
            Opt::LgChunk => CtlValue::Size(options.lg_chunk),
            Opt::Dss => CtlValue::Str(options.dss.name()),
            Opt::Narenas => CtlValue::Size(options.narenas),
            Opt::LgDirtyMult => CtlValue::SSize(options.lg_dirty_mult),
            Opt::StatsPrint => CtlValue::Bool(options.stats_print),
            Opt::Junk => CtlValue::Bool(options.junk),
            Opt::Quarantine => CtlValue::Size(options.quarantine),
            Opt::Redzone => CtlValue::Bool(options.redzone),
            Opt::Zero => CtlValue::Bool(options.zero),
            Opt::Utrace => CtlValue::Bool(options.utrace),
            Opt::Xmalloc => CtlValue::Bool(options.xmalloc),
            Opt::Tcache => CtlValue::Bool(options.tcache),
            Opt::LgTcacheMax => CtlValue::SSize(options.lg_tcache_max),
            Opt::Prof => CtlValue::Bool(options.prof),
            Opt::ProfPrefix => CtlValue::Str(options.prof_prefix.as_c_str()),
            Opt::ProfActive => CtlValue::Bool(options.prof_active),
            Opt::ProfThreadActiveInit => CtlValue::Bool(options.prof_thread_active_init),
            Opt::LgProfSample => CtlValue::Size(options.lg_prof_sample),
            Opt::ProfAccum => CtlValue::Bool(options.prof_accum),
            Opt::LgProfInterval => CtlValue::SSize(options.lg_prof_interval),
            Opt::ProfGdump => CtlValue::Bool(options.prof_gdump),
            Opt::ProfFinal => CtlValue::Bool(options.prof_final),
            Opt::ProfLeak => CtlValue::Bool(options.prof_leak),
        }
    }
}

/// A parsed control name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CtlName {
    /// `version`.
    Version,
    /// `opt.<option>`.
    Opt(Opt),
    /// `arenas.narenas`.
    ArenasNarenas,
    /// `arenas.extend`.
    ArenasExtend,
    /// `arena.<i>.nthreads`.
    ArenaNthreads(usize),
    /// `thread.arena`.
    ThreadArena,
    /// `thread.allocated`.
    ThreadAllocated,
    /// `thread.deallocated`.
    ThreadDeallocated,
    /// `thread.tcache.flush`.
    ThreadTcacheFlush,
    /// `prof.active`.
    ProfActive,
    /// `stats.allocated`.
    StatsAllocated,
    /// `stats.mapped`.
    StatsMapped,
}

impl CtlName {
    /// Parses a dotted name, without terminating NUL.
    pub fn parse(name: &[u8]) -> Result<CtlName, CtlError> {
        let mut parts = name.split(|b| *b == b'.');

        let first = parts.next().ok_or(CtlError::NotFound)?;
        let second = parts.next();
        let third = parts.next();

        if parts.next().is_some() {
            return Err(CtlError::NotFound);
        }

        let result = match (first, second, third) {
            (b"version", None, None) => CtlName::Version,
            (b"opt", Some(option), None) => CtlName::Opt(Opt::from_name(option).ok_or(CtlError::NotFound)?),
            (b"arenas", Some(b"narenas"), None) => CtlName::ArenasNarenas,
            (b"arenas", Some(b"extend"), None) => CtlName::ArenasExtend,
            (b"arena", Some(index), Some(b"nthreads")) => CtlName::ArenaNthreads(parse_index(index)?),
            (b"thread", Some(b"arena"), None) => CtlName::ThreadArena,
            (b"thread", Some(b"allocated"), None) if STATS => CtlName::ThreadAllocated,
            (b"thread", Some(b"deallocated"), None) if STATS => CtlName::ThreadDeallocated,
            (b"thread", Some(b"tcache"), Some(b"flush")) if TCACHE => CtlName::ThreadTcacheFlush,
            (b"prof", Some(b"active"), None) if PROF => CtlName::ProfActive,
            (b"stats", Some(b"allocated"), None) if STATS => CtlName::StatsAllocated,
            (b"stats", Some(b"mapped"), None) if STATS => CtlName::StatsMapped,
            _ => return Err(CtlError::NotFound),
        };

        Ok(result)
    }

    /// Returns the type of the value.
    pub fn kind(&self) -> CtlKind {
        match self {
            CtlName::Version => CtlKind::Str,
            CtlName::Opt(opt) => opt.read(&Options::DEFAULT).kind(),
            CtlName::ArenasNarenas | CtlName::ArenasExtend | CtlName::ArenaNthreads(_) | CtlName::ThreadArena =>
                CtlKind::U32,
            CtlName::ThreadAllocated | CtlName::ThreadDeallocated => CtlKind::U64,
            CtlName::ThreadTcacheFlush => CtlKind::Void,
            CtlName::ProfActive => CtlKind::Bool,
            CtlName::StatsAllocated | CtlName::StatsMapped => CtlKind::Size,
        }
    }

    /// Returns whether a new value may be written.
    pub fn is_writable(&self) -> bool { matches!(self, CtlName::ThreadArena | CtlName::ProfActive) }
}

impl<P: Platform> Heap<P> {
    /// Looks up `name`, then reads it, and writes `new` if any.
    ///
    /// See `ctl`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn mallctl(&self, thread: &mut ThreadState, name: &[u8], new: Option<CtlValue<'_>>)
        -> Result<CtlValue<'_>, CtlError>
    {
        self.ctl(thread, CtlName::parse(name)?, new)
    }

    /// Reads the value of `name`, then writes `new`, if any. Returns the value read.
    ///
    /// Fails with `Again` if the heap cannot be initialized, `Permission` if `name` is read-only, and
    /// `InvalidValue` if `new` is not of the expected type or out of range.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `thread` belongs to this Heap, or is transient, and is not accessed concurrently.
    pub unsafe fn ctl(&self, thread: &mut ThreadState, name: CtlName, new: Option<CtlValue<'_>>)
        -> Result<CtlValue<'_>, CtlError>
    {
        self.initialize().map_err(|_| CtlError::Again)?;

        if let Some(new) = new {
            if !name.is_writable() {
                return Err(CtlError::Permission);
            }

            if new.kind() != name.kind() {
                return Err(CtlError::InvalidValue);
            }
        }

        let _guard = self.ctl.lock();
        let ctx = self.context();

        let value = match name {
            CtlName::Version => CtlValue::Str(version()),
            CtlName::Opt(opt) => opt.read(&self.globals().options),
            CtlName::ArenasNarenas => CtlValue::U32(ctx.pool.narenas_total() as u32),
            CtlName::ArenasExtend => CtlValue::U32(ctx.pool.extend(&ctx).ok_or(CtlError::Again)? as u32),
            CtlName::ArenaNthreads(index) => {
                if index >= ctx.pool.narenas_total() {
                    return Err(CtlError::NotFound);
                }

                CtlValue::U32(ctx.pool.nthreads(index).unwrap_or(0) as u32)
            },
            CtlName::ThreadArena => self.ctl_thread_arena(&ctx, thread, new)?,
            CtlName::ThreadAllocated => CtlValue::U64(thread.allocated()),
            CtlName::ThreadDeallocated => CtlValue::U64(thread.deallocated()),
            CtlName::ThreadTcacheFlush => {
                if let Some(mut tcache) = thread.tcache {
                    tcache.as_mut().flush_all(&ctx);
                }

                CtlValue::Void
            },
            CtlName::ProfActive => {
                let old = ctx.prof.is_active();

                if let Some(CtlValue::Bool(active)) = new {
                    if !ctx.prof.is_enabled() {
                        return Err(CtlError::Permission);
                    }

                    ctx.prof.set_active(active);
                }

                CtlValue::Bool(old)
            },
            CtlName::StatsAllocated => CtlValue::Size(allocated(&ctx)),
            CtlName::StatsMapped => CtlValue::Size(ctx.chunks.mapped() + ctx.base.usage().0),
        };

        Ok(value)
    }

    unsafe fn ctl_thread_arena(&self, ctx: &Context<'_, P>, thread: &mut ThreadState, new: Option<CtlValue<'_>>)
        -> Result<CtlValue<'static>, CtlError>
    {
        let old = ctx.pool.choose(ctx, thread).map(|arena| arena.index()).ok_or(CtlError::Again)?;

        if let Some(CtlValue::U32(index)) = new {
            let index = index as usize;

            if index >= ctx.pool.narenas_total() {
                return Err(CtlError::InvalidValue);
            }

            ctx.pool.rebind(ctx, thread, index).ok_or(CtlError::Again)?;

            if let Some(tcache) = thread.tcache {
                Tcache::reassociate(ctx, tcache, index);
            }
        }

        Ok(CtlValue::U32(old as u32))
    }
}

/// Returns the version of the library.
pub(crate) fn version() -> &'static CStr {
    CStr::from_bytes_with_nul(concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes()).unwrap_or_default()
}

/// Returns the number of bytes handed out, across all arenas.
pub(crate) fn allocated<P: Platform>(ctx: &Context<'_, P>) -> usize {
    let arenas: usize = ctx.pool.arenas()
        .map(|arena| arena.stats())
        .map(|stats| stats.allocated_small + stats.allocated_large)
        .sum();

    arenas + ctx.huge.stats().allocated
}

fn parse_index(digits: &[u8]) -> Result<usize, CtlError> {
    if digits.is_empty() {
        return Err(CtlError::NotFound);
    }

    digits.iter().try_fold(0usize, |index, digit| {
        if !digit.is_ascii_digit() {
            return Err(CtlError::NotFound);
        }

        index.checked_mul(10)
            .and_then(|index| index.checked_add((digit - b'0') as usize))
            .ok_or(CtlError::NotFound)
    })
}

#[cfg(test)]
mod tests {

use super::*;
use crate::internals::{tcache::TCACHE_FILL, test::TestHeap};
use crate::MallocxFlags;

#[test]
fn ctl_parse_names() {
    assert_eq!(Ok(CtlName::Version), CtlName::parse(b"version"));
    assert_eq!(Ok(CtlName::Opt(Opt::LgChunk)), CtlName::parse(b"opt.lg_chunk"));
    assert_eq!(Ok(CtlName::ArenaNthreads(12)), CtlName::parse(b"arena.12.nthreads"));
    assert_eq!(Ok(CtlName::ThreadTcacheFlush), CtlName::parse(b"thread.tcache.flush"));

    for name in &[&b""[..], b"opt", b"opt.nope", b"arena.x.nthreads", b"arena..nthreads", b"version.x", b"a.b.c.d"] {
        assert_eq!(Err(CtlError::NotFound), CtlName::parse(name), "{:?}", name);
    }
}

#[test]
fn ctl_kinds() {
    assert_eq!(CtlKind::Str, CtlName::Opt(Opt::Dss).kind());
    assert_eq!(CtlKind::SSize, CtlName::Opt(Opt::LgDirtyMult).kind());
    assert_eq!(CtlKind::Size, CtlName::Opt(Opt::Narenas).kind());
    assert_eq!(CtlKind::U32, CtlName::ThreadArena.kind());
    assert_eq!(CtlKind::Void, CtlName::ThreadTcacheFlush.kind());
}

#[test]
fn ctl_read_options() {
    let heap = TestHeap::with_conf("narenas:3,lg_chunk:20,junk:true,abort:false");
    let mut thread = ThreadState::new();

    unsafe {
        assert_eq!(Ok(CtlValue::Size(3)), heap.mallctl(&mut thread, b"opt.narenas", None));
        assert_eq!(Ok(CtlValue::Size(20)), heap.mallctl(&mut thread, b"opt.lg_chunk", None));
        assert_eq!(Ok(CtlValue::Bool(true)), heap.mallctl(&mut thread, b"opt.junk", None));

        let dss = heap.mallctl(&mut thread, b"opt.dss", None).unwrap();
        assert_eq!("\"disabled\"", dss.to_string());

        let current = heap.mallctl(&mut thread, b"version", None).unwrap();
        assert_eq!(CtlValue::Str(version()), current);

        assert_eq!(Err(CtlError::Permission), heap.mallctl(&mut thread, b"opt.junk", Some(CtlValue::Bool(false))));
    }
}

#[test]
fn ctl_arenas() {
    let heap = TestHeap::with_conf("narenas:2");
    let mut thread = ThreadState::new();

    unsafe {
        assert_eq!(Ok(CtlValue::U32(2)), heap.mallctl(&mut thread, b"arenas.narenas", None));
        assert_eq!(Ok(CtlValue::U32(0)), heap.mallctl(&mut thread, b"thread.arena", None));
        assert_eq!(Ok(CtlValue::U32(1)), heap.mallctl(&mut thread, b"arena.0.nthreads", None));
        assert_eq!(Err(CtlError::NotFound), heap.mallctl(&mut thread, b"arena.2.nthreads", None));

        assert_eq!(Ok(CtlValue::U32(2)), heap.mallctl(&mut thread, b"arenas.extend", None));
        assert_eq!(Ok(CtlValue::U32(3)), heap.mallctl(&mut thread, b"arenas.narenas", None));
        assert_eq!(2, heap.narenas_auto());

        //  Warm up the thread cache, then move the thread to the new arena.
        let pointer = heap.malloc(&mut thread, 32).unwrap();
        heap.free(&mut thread, Some(pointer));

        assert_eq!(Ok(CtlValue::U32(0)), heap.mallctl(&mut thread, b"thread.arena", Some(CtlValue::U32(2))));
        assert_eq!(Ok(CtlValue::U32(2)), heap.mallctl(&mut thread, b"thread.arena", None));
        assert_eq!(Ok(CtlValue::U32(0)), heap.mallctl(&mut thread, b"arena.0.nthreads", None));
        assert_eq!(Ok(CtlValue::U32(1)), heap.mallctl(&mut thread, b"arena.2.nthreads", None));

        assert_eq!(Err(CtlError::InvalidValue), heap.mallctl(&mut thread, b"thread.arena", Some(CtlValue::U32(9))));
        assert_eq!(Err(CtlError::InvalidValue), heap.mallctl(&mut thread, b"thread.arena", Some(CtlValue::Size(1))));

        heap.retire_thread(&mut thread);
    }
}

#[test]
fn ctl_thread_counters_and_flush() {
    let heap = TestHeap::with_conf("");
    let mut thread = ThreadState::new();

    unsafe {
        let pointer = heap.malloc(&mut thread, 100).unwrap();
        let usable = heap.usable_size(Some(pointer)) as u64;

        assert_eq!(Ok(CtlValue::U64(usable)), heap.mallctl(&mut thread, b"thread.allocated", None));

        //  The thread cache was filled from the arena.
        let filled = TCACHE_FILL * usable as usize;
        assert_eq!(Ok(CtlValue::Size(filled)), heap.mallctl(&mut thread, b"stats.allocated", None));

        heap.free(&mut thread, Some(pointer));

        assert_eq!(Ok(CtlValue::U64(usable)), heap.mallctl(&mut thread, b"thread.deallocated", None));

        //  The region sits in the thread cache until flushed.
        assert_eq!(Ok(CtlValue::Void), heap.mallctl(&mut thread, b"thread.tcache.flush", None));
        assert_eq!(Ok(CtlValue::Size(0)), heap.mallctl(&mut thread, b"stats.allocated", None));

        assert_eq!(
            Err(CtlError::Permission),
            heap.mallctl(&mut thread, b"thread.tcache.flush", Some(CtlValue::Void))
        );

        match heap.mallctl(&mut thread, b"stats.mapped", None) {
            Ok(CtlValue::Size(mapped)) => assert!(mapped >= heap.size_classes().unwrap().chunk_size().value()),
            other => panic!("Unexpected {:?}", other),
        }

        heap.retire_thread(&mut thread);
    }
}

#[test]
fn ctl_prof_active() {
    let heap = TestHeap::with_conf("prof:true,prof_active:false,lg_prof_sample:0");
    let mut thread = ThreadState::new();

    unsafe {
        assert_eq!(Ok(CtlValue::Bool(false)), heap.mallctl(&mut thread, b"prof.active", Some(CtlValue::Bool(true))));
        assert_eq!(Ok(CtlValue::Bool(true)), heap.mallctl(&mut thread, b"prof.active", None));

        let pointer = heap.mallocx(&mut thread, 64, MallocxFlags::NONE).unwrap();
        assert_eq!(1, heap.context().prof.stats().curobjs);

        heap.dallocx(&mut thread, pointer, MallocxFlags::NONE);
        heap.retire_thread(&mut thread);
    }

    let heap = TestHeap::with_conf("");
    let mut thread = ThreadState::new();

    unsafe {
        assert_eq!(Err(CtlError::Permission), heap.mallctl(&mut thread, b"prof.active", Some(CtlValue::Bool(true))));
    }
}

#[test]
fn ctl_again_when_boot_fails() {
    let heap = TestHeap::new(crate::internals::test::TestPlatform::default());
    heap.platform().fail_boot(true);

    let mut thread = ThreadState::transient(crate::ThreadStatus::Reentrant);

    assert_eq!(Err(CtlError::Again), unsafe { heap.mallctl(&mut thread, b"version", None) });
}

}
