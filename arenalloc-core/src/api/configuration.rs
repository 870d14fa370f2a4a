//! Configuration of the heap.
//!
//! Compile-time features select which subsystems are built in, while `Options` holds the run-time options, set once
//! during initialization from the configuration strings.

use core::{ffi::CStr, fmt};

use crate::description::LG_CHUNK_DEFAULT;

/// Whether per-thread and per-arena statistics are maintained.
pub const STATS: bool = cfg!(feature = "stats");

/// Whether the junk, zero, redzone and quarantine debugging options are available.
pub const FILL: bool = cfg!(feature = "fill");

/// Whether thread caches are available.
pub const TCACHE: bool = cfg!(feature = "tcache");

/// Whether heap profiling is available.
pub const PROF: bool = cfg!(feature = "prof");

/// Whether allocation tracing is available.
pub const UTRACE: bool = cfg!(feature = "utrace");

/// Whether aborting on out-of-memory is available.
pub const XMALLOC: bool = cfg!(feature = "xmalloc");

/// Precedence of the data segment, relative to mappings, for obtaining chunks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DssPrecedence {
    /// Never use the data segment.
    Disabled,
    /// Prefer the data segment.
    Primary,
    /// Prefer mappings.
    Secondary,
}

impl DssPrecedence {
    const NAMES: [(&'static [u8], DssPrecedence); 3] = [
        (b"disabled\0", DssPrecedence::Disabled),
        (b"primary\0", DssPrecedence::Primary),
        (b"secondary\0", DssPrecedence::Secondary),
    ];

    /// Looks up a precedence by name.
    pub fn from_name(name: &[u8]) -> Option<DssPrecedence> {
        Self::NAMES.iter()
            .find(|(candidate, _)| &candidate[..candidate.len() - 1] == name)
            .map(|(_, dss)| *dss)
    }

    /// Returns the name of the precedence.
    pub fn name(&self) -> &'static CStr {
        let (name, _) = Self::NAMES.iter()
            .find(|(_, dss)| dss == self)
            .copied()
            .unwrap_or((b"disabled\0", DssPrecedence::Disabled));

        CStr::from_bytes_with_nul(name).unwrap_or_default()
    }
}

/// Capacity of the profile prefix, including its terminating NUL.
pub const PROF_PREFIX_CAPACITY: usize = 256;

/// A bounded NUL-terminated string.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Prefix([u8; PROF_PREFIX_CAPACITY]);

impl Prefix {
    /// Creates a prefix from `value`, truncated to fit.
    pub const fn new(value: &[u8]) -> Self {
        let mut buffer = [0; PROF_PREFIX_CAPACITY];

        let mut index = 0;
        while index < value.len() && index < PROF_PREFIX_CAPACITY - 1 && value[index] != 0 {
            buffer[index] = value[index];
            index += 1;
        }

        Self(buffer)
    }

    /// Returns the bytes of the prefix, without the terminating NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let length = self.0.iter().position(|b| *b == 0).unwrap_or(PROF_PREFIX_CAPACITY - 1);
        &self.0[..length]
    }

    /// Returns the prefix as a C string.
    pub fn as_c_str(&self) -> &CStr { CStr::from_bytes_until_nul(&self.0).unwrap_or_default() }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self.as_c_str()) }
}

/// Run-time options.
///
/// Set once, by the initializing thread, and read-only afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    /// Abort on warnings, such as an arena creation failure or a corrupt redzone.
    pub abort: bool,
    /// Base-2 logarithm of the chunk size.
    pub lg_chunk: usize,
    /// Precedence of the data segment.
    pub dss: DssPrecedence,
    /// Number of automatic arenas, 0 to derive from the number of CPUs.
    pub narenas: usize,
    /// Base-2 logarithm of the ratio of active to dirty pages, -1 to retain all empty chunks.
    pub lg_dirty_mult: isize,
    /// Print statistics at exit.
    pub stats_print: bool,
    /// Fill allocations with 0xa5 and deallocations with 0x5a.
    pub junk: bool,
    /// Bytes of recently freed memory each thread keeps in quarantine.
    pub quarantine: usize,
    /// Surround small regions with redzones.
    pub redzone: bool,
    /// Zero all allocations.
    pub zero: bool,
    /// Trace all allocations.
    pub utrace: bool,
    /// Abort on out-of-memory.
    pub xmalloc: bool,
    /// Enable thread caches.
    pub tcache: bool,
    /// Base-2 logarithm of the largest cached size, -1 for all small classes.
    pub lg_tcache_max: isize,
    /// Enable heap profiling.
    pub prof: bool,
    /// Prefix of profile dumps.
    pub prof_prefix: Prefix,
    /// Whether sampling is initially active.
    pub prof_active: bool,
    /// Whether sampling is initially active for new threads.
    pub prof_thread_active_init: bool,
    /// Base-2 logarithm of the mean number of bytes between samples.
    pub lg_prof_sample: usize,
    /// Accumulate profiles across the program lifetime.
    pub prof_accum: bool,
    /// Base-2 logarithm of the number of bytes between dumps, -1 to disable.
    pub lg_prof_interval: isize,
    /// Dump on reaching a new high-water mark.
    pub prof_gdump: bool,
    /// Dump at exit.
    pub prof_final: bool,
    /// Report leaks at exit.
    pub prof_leak: bool,
}

impl Options {
    /// The defaults, prior to reading any configuration.
    pub const DEFAULT: Options = Options {
        abort: cfg!(debug_assertions),
        lg_chunk: LG_CHUNK_DEFAULT as usize,
        dss: DssPrecedence::Disabled,
        narenas: 0,
        lg_dirty_mult: 3,
        stats_print: false,
        junk: false,
        quarantine: 0,
        redzone: false,
        zero: false,
        utrace: false,
        xmalloc: false,
        tcache: TCACHE,
        lg_tcache_max: 15,
        prof: false,
        prof_prefix: Prefix::new(b"jeprof"),
        prof_active: true,
        prof_thread_active_init: true,
        lg_prof_sample: 19,
        prof_accum: false,
        lg_prof_interval: -1,
        prof_gdump: false,
        prof_final: false,
        prof_leak: false,
    };
}

impl Default for Options {
    fn default() -> Self { Self::DEFAULT }
}
