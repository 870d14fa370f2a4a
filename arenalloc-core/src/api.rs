//! The API of arenalloc-core.

pub mod configuration;
pub mod description;

mod conf;
mod ctl;
mod errors;
mod flags;
mod heap;
mod lifecycle;
mod platform;
mod thread;

pub use conf::{ConfDiagnostic, ConfErrorKind, ConfPairs};
pub use configuration::{DssPrecedence, Options, Prefix};
pub use ctl::{CtlKind, CtlName, CtlValue, Opt};
pub use description::{
    BinIndex, Category, SizeClasses, LARGE_MINCLASS, LG_CHUNK_DEFAULT, LG_PAGE, LG_QUANTUM, NBINS, PAGE, QUANTUM,
    SMALL_MAXCLASS,
};
pub use errors::{AllocError, BootError, CtlError, InitError};
pub use flags::{MallocxFlags, Request};
pub use heap::Heap;
pub use platform::{Platform, ThreadId, UtraceRecord};
pub use thread::{ThreadState, ThreadStatus};

pub use crate::internals::diagnostics::Message;

pub(crate) use ctl::{allocated, version};
