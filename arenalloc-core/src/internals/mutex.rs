//! Spin-lock with fork hooks.
//!
//! `prefork` acquires the lock and leaks the guard, `postfork_parent` and `postfork_child` release it. The fork
//! coordinator is responsible for calling them in a consistent order.

use spin::mutex::{SpinMutex, SpinMutexGuard};

/// Mutex, with fork hooks.
pub(crate) struct Mutex<T>(SpinMutex<T>);

/// Guard of a `Mutex`.
pub(crate) type MutexGuard<'a, T> = SpinMutexGuard<'a, T>;

impl<T> Mutex<T> {
    /// Creates an unlocked instance.
    pub(crate) const fn new(value: T) -> Self { Self(SpinMutex::new(value)) }

    /// Locks the mutex, spinning until available.
    #[inline(always)]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> { self.0.lock() }

    /// Returns whether the mutex is currently locked, by anyone.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool { self.0.is_locked() }

    /// Acquires the lock ahead of a fork, leaking the guard.
    pub(crate) fn prefork(&self) { core::mem::forget(self.0.lock()); }

    /// Releases the lock acquired by `prefork`, in the parent.
    ///
    /// #   Safety
    ///
    /// -   Assumes the lock was acquired by `prefork`, and not released since.
    pub(crate) unsafe fn postfork_parent(&self) { self.0.force_unlock(); }

    /// Releases the lock acquired by `prefork`, in the child.
    ///
    /// The child only has one thread, the one which forked, and therefore it owns the lock.
    ///
    /// #   Safety
    ///
    /// -   Assumes the lock was acquired by `prefork`, and not released since.
    pub(crate) unsafe fn postfork_child(&self) { self.0.force_unlock(); }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn mutex_fork_hooks() {
    let mutex = Mutex::new(3);

    mutex.prefork();
    assert!(mutex.is_locked());

    unsafe { mutex.postfork_parent() };
    assert!(!mutex.is_locked());

    mutex.prefork();
    unsafe { mutex.postfork_child() };

    assert_eq!(3, *mutex.lock());
}

}
