//! Reusable spinning barrier.

use std::{
    hint,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

/// A reusable barrier, for a fixed number of participants.
///
/// Unlike `std::sync::Barrier`, waiters spin rather than sleep, so that they are released as simultaneously as
/// possible, and the barrier may be poisoned, releasing all current and future waiters with a panic.
#[derive(Clone, Debug)]
pub struct Barrier(Arc<State>);

#[derive(Debug)]
struct State {
    participants: usize,
    arrived: AtomicUsize,
    generation: AtomicUsize,
    poisoned: AtomicBool,
}

impl Barrier {
    /// Creates a barrier for `participants` threads.
    ///
    /// #   Panics
    ///
    /// If `participants` is 0.
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "A barrier requires at least one participant");

        Self(Arc::new(State {
            participants,
            arrived: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
        }))
    }

    /// Returns the number of participants.
    pub fn participants(&self) -> usize { self.0.participants }

    /// Waits until all participants arrived, then returns whether this thread arrived last.
    ///
    /// The barrier is immediately reusable.
    ///
    /// #   Panics
    ///
    /// If the barrier is, or becomes, poisoned.
    pub fn wait(&self) -> bool {
        let state = &*self.0;

        let generation = state.generation.load(Ordering::Acquire);

        if state.arrived.fetch_add(1, Ordering::AcqRel) + 1 == state.participants {
            state.arrived.store(0, Ordering::Relaxed);
            state.generation.fetch_add(1, Ordering::Release);
            return true;
        }

        while state.generation.load(Ordering::Acquire) == generation {
            self.check_poison();
            hint::spin_loop();
        }

        false
    }

    /// Poisons the barrier.
    pub fn poison(&self) { self.0.poisoned.store(true, Ordering::Release); }

    fn check_poison(&self) {
        if self.0.poisoned.load(Ordering::Acquire) {
            abandon();
        }
    }
}

#[cold]
#[inline(never)]
fn abandon() -> ! { panic!("Barrier poisoned by a failing participant") }

#[cfg(test)]
mod tests {

use std::thread;

use super::*;

#[test]
fn barrier_single_participant() {
    let barrier = Barrier::new(1);

    assert!(barrier.wait());
    assert!(barrier.wait());
}

#[test]
fn barrier_single_leader_per_round() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 100;

    let barrier = Barrier::new(THREADS);
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS).map(|_| {
        let (barrier, counter) = (barrier.clone(), counter.clone());

        thread::spawn(move || {
            let mut leaders = 0;

            for round in 0..ROUNDS {
                counter.fetch_add(1, Ordering::Relaxed);

                if barrier.wait() {
                    leaders += 1;
                }

                //  Everybody arrived before anybody left.
                assert!(counter.load(Ordering::Relaxed) >= (round + 1) * THREADS);

                barrier.wait();
            }

            leaders
        })
    }).collect();

    let leaders: usize = handles.into_iter().map(|handle| handle.join().unwrap()).sum();

    assert_eq!(ROUNDS, leaders);
}

#[test]
fn barrier_poison_releases_waiters() {
    let barrier = Barrier::new(2);

    let waiter = {
        let barrier = barrier.clone();
        thread::spawn(move || barrier.wait())
    };

    barrier.poison();

    assert!(waiter.join().is_err());
}

}
