//! Initialization state machine.
//!
//! `UNINITIALIZED -> INITIALIZING -> INITIALIZED`, or `FAILED` if a boot step failed in a way that cannot be retried.
//!
//! The initializing thread is recorded as owner, and its recursive calls are treated as initialized, so that boot
//! itself may allocate. Other threads wait, releasing and re-acquiring the init lock with an exponential backoff,
//! until the owner is done.

use core::{
    hint,
    sync::atomic::{AtomicU8, AtomicUsize, Ordering},
};

use crate::{BootError, InitError, Platform};
use crate::internals::mutex::{Mutex, MutexGuard};

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;
const FAILED: u8 = 3;

//  Number of doublings of the spin count before yielding instead.
const SPIN_LIMIT: u32 = 6;

/// Initialization state.
pub(crate) struct InitState {
    state: AtomicU8,
    owner: AtomicUsize,
    lock: Mutex<()>,
}

/// Handle on the init lock, for the duration of boot.
pub(crate) struct Booting<'a> {
    lock: &'a Mutex<()>,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> Booting<'a> {
    /// Runs `fun` with the init lock released.
    ///
    /// Other threads still observe the state as initializing, and keep waiting.
    pub(crate) fn unlocked<R, F>(&mut self, fun: F) -> R
        where
            F: FnOnce() -> R,
    {
        self.guard = None;

        let result = fun();

        self.guard = Some(self.lock.lock());

        result
    }
}

impl InitState {
    /// Creates an uninitialized instance.
    pub(crate) const fn new() -> Self {
        Self { state: AtomicU8::new(UNINITIALIZED), owner: AtomicUsize::new(0), lock: Mutex::new(()) }
    }

    /// Returns whether initialization completed.
    #[inline(always)]
    pub(crate) fn is_initialized(&self) -> bool { self.state.load(Ordering::Acquire) == INITIALIZED }

    /// Ensures the heap is initialized, running `boot` if nobody did yet.
    #[inline(always)]
    pub(crate) fn ensure<P, F>(&self, platform: &P, boot: F) -> Result<(), InitError>
        where
            P: Platform,
            F: FnOnce(&mut Booting<'_>) -> Result<(), BootError>,
    {
        if self.is_initialized() {
            return Ok(());
        }

        self.ensure_hard(platform, boot)
    }

    #[cold]
    #[inline(never)]
    fn ensure_hard<P, F>(&self, platform: &P, boot: F) -> Result<(), InitError>
        where
            P: Platform,
            F: FnOnce(&mut Booting<'_>) -> Result<(), BootError>,
    {
        let me = platform.current_thread().value();

        //  Recursive call from within boot, the lock is held by the caller, or released on purpose.
        if self.state.load(Ordering::Acquire) == INITIALIZING && self.owner.load(Ordering::Relaxed) == me {
            return Ok(());
        }

        let mut guard = self.lock.lock();
        let mut round = 0;

        loop {
            match self.state.load(Ordering::Acquire) {
                INITIALIZED => return Ok(()),
                FAILED => return Err(InitError::Failed),
                UNINITIALIZED => break,
                _ => {
                    drop(guard);
                    backoff(platform, round);
                    round += 1;
                    guard = self.lock.lock();
                },
            }
        }

        self.owner.store(me, Ordering::Relaxed);
        self.state.store(INITIALIZING, Ordering::Release);

        let mut booting = Booting { lock: &self.lock, guard: Some(guard) };

        let result = boot(&mut booting);

        self.owner.store(0, Ordering::Relaxed);

        let state = match result {
            Ok(()) => INITIALIZED,
            Err(error) if error.is_recoverable() => UNINITIALIZED,
            Err(_) => FAILED,
        };

        self.state.store(state, Ordering::Release);

        drop(booting);

        result.map_err(InitError::Boot)
    }
}

fn backoff<P: Platform>(platform: &P, round: u32) {
    if round < SPIN_LIMIT {
        for _ in 0..(1u32 << round) {
            hint::spin_loop();
        }
    } else {
        platform.yield_now();
    }
}

#[cfg(test)]
mod tests {

use std::{
    sync::{atomic::AtomicUsize, Arc, Barrier},
    thread,
};

use super::*;
use crate::internals::test::TestPlatform;

#[test]
fn init_once() {
    let platform = TestPlatform::default();
    let init = InitState::new();
    let mut boots = 0;

    assert_eq!(Ok(()), init.ensure(&platform, |_| { boots += 1; Ok(()) }));
    assert_eq!(Ok(()), init.ensure(&platform, |_| { boots += 1; Ok(()) }));

    assert!(init.is_initialized());
    assert_eq!(1, boots);
}

#[test]
fn init_recursive_call_from_owner() {
    let platform = TestPlatform::default();
    let init = InitState::new();

    let result = init.ensure(&platform, |booting| {
        assert_eq!(Ok(()), init.ensure(&platform, |_| panic!("Recursive boot")));

        booting.unlocked(|| assert_eq!(Ok(()), init.ensure(&platform, |_| panic!("Recursive boot"))));

        Ok(())
    });

    assert_eq!(Ok(()), result);
}

#[test]
fn init_recoverable_failure_retries() {
    let platform = TestPlatform::default();
    let init = InitState::new();

    assert_eq!(Err(InitError::Boot(BootError::Chunks)), init.ensure(&platform, |_| Err(BootError::Chunks)));
    assert!(!init.is_initialized());

    assert_eq!(Ok(()), init.ensure(&platform, |_| Ok(())));
    assert!(init.is_initialized());
}

#[test]
fn init_fatal_failure_sticks() {
    let platform = TestPlatform::default();
    let init = InitState::new();

    assert_eq!(Err(InitError::Boot(BootError::Arena)), init.ensure(&platform, |_| Err(BootError::Arena)));
    assert_eq!(Err(InitError::Failed), init.ensure(&platform, |_| panic!("Retried boot")));
}

#[test]
fn init_concurrent_single_boot() {
    const THREADS: usize = 8;

    let platform = Arc::new(TestPlatform::default());
    let init = Arc::new(InitState::new());
    let boots = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS).map(|_| {
        let (platform, init, boots, barrier) = (platform.clone(), init.clone(), boots.clone(), barrier.clone());

        thread::spawn(move || {
            barrier.wait();

            init.ensure(&*platform, |booting| {
                booting.unlocked(thread::yield_now);
                boots.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        })
    }).collect();

    for handle in handles {
        assert_eq!(Ok(()), handle.join().unwrap());
    }

    assert_eq!(1, boots.load(Ordering::Relaxed));
}

}
