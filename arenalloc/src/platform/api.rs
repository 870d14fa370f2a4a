//! API of OS required services.

/// Abstraction over thread-local storage.
pub(crate) trait ThreadLocal<T> {
    /// Returns the pointer associated to this instance, for the calling thread.
    ///
    /// Returns a null pointer if no prior value was set, or the thread-exit destructor already cleared it.
    fn get(&self) -> *mut T;

    /// Sets the pointer associated to this instance, for the calling thread.
    ///
    /// Returns false if the underlying OS facility failed.
    fn set(&self, value: *mut T) -> bool;
}

/// Process-wide hooks of the heap, registered by the platform during boot.
#[derive(Clone, Copy)]
pub(crate) struct Hooks {
    /// Invoked at process exit.
    pub(crate) at_exit: extern "C" fn(),
    /// Invoked in the forking thread, prior to `fork`.
    pub(crate) prefork: unsafe extern "C" fn(),
    /// Invoked in the parent, after `fork`.
    pub(crate) postfork_parent: unsafe extern "C" fn(),
    /// Invoked in the child, after `fork`.
    pub(crate) postfork_child: unsafe extern "C" fn(),
}
