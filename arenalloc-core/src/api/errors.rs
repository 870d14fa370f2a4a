//! Errors surfaced by the heap.

use thiserror::Error;

/// Outcome of a failed allocation request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum AllocError {
    /// The backing memory could not be obtained, or the heap could not be initialized.
    #[error("out of memory")]
    OutOfMemory,
    /// The alignment is not a power of 2, is too small, or the size computation overflowed.
    #[error("invalid argument")]
    InvalidArgument,
}

/// The boot step that failed during initialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum BootError {
    /// The platform refused to provide backing chunks.
    #[error("error initializing chunks")]
    Chunks,
    /// Arena 0 could not be created.
    #[error("error initializing arena 0")]
    Arena,
    /// The profiler could not allocate its sample table.
    #[error("error initializing profiler")]
    Profiler,
    /// The arena array could not be allocated.
    #[error("error allocating arena array")]
    ArenaArray,
}

impl BootError {
    /// Returns whether the failure left global state untouched, so that a later call may retry.
    ///
    /// Steps which ran before any backing memory was reserved are recoverable, the others are not.
    pub fn is_recoverable(&self) -> bool { matches!(self, BootError::Chunks) }
}

/// Failure to bring up the heap.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum InitError {
    /// A boot step failed during this call.
    #[error("initialization failed: {0}")]
    Boot(BootError),
    /// A prior initialization failed unrecoverably.
    #[error("initialization previously failed")]
    Failed,
}

impl From<InitError> for AllocError {
    fn from(_: InitError) -> Self { AllocError::OutOfMemory }
}

/// Failure of a control request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum CtlError {
    /// No such name.
    #[error("no such control")]
    NotFound,
    /// The supplied value has the wrong type, or is out of range.
    #[error("invalid control value")]
    InvalidValue,
    /// The name is read-only, or cannot be read.
    #[error("control not permitted")]
    Permission,
    /// The heap could not be initialized, or the request could not be served right now.
    #[error("control temporarily unavailable")]
    Again,
}
