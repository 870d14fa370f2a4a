//! Lockstep runner.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use crate::Barrier;

type Step<G, L> = Arc<dyn Fn(&G, &mut L) + Send + Sync>;

/// Lockstep is a test-runner to run a series of steps, in lockstep, across multiple threads.
///
/// Each thread owns a Local state, and all threads share a Global state. On each iteration, every thread runs every
/// step in order; no thread starts step N+1 before all threads completed step N.
///
/// A step may have a preparatory phase, run before waiting for the other threads, to keep expensive set up out of the
/// synchronized part.
///
/// #   Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use arenalloc_test::Lockstep;
///
/// let (global, locals) = Lockstep::new(AtomicUsize::new(0), vec!(1, 10))
///     .step(|global: &AtomicUsize, local: &mut usize| { global.fetch_add(*local, Ordering::Relaxed); })
///     .run(4);
///
/// assert_eq!(44, global.load(Ordering::Relaxed));
/// assert_eq!(vec!(1, 10), locals);
/// ```
pub struct Lockstep<G, L> {
    global: Arc<G>,
    locals: Vec<L>,
    steps: Vec<Step<G, L>>,
    barriers: Vec<Barrier>,
}

impl<G, L> Lockstep<G, L>
    where
        G: Send + Sync + 'static,
        L: Send + 'static,
{
    /// Creates a runner, for as many threads as `locals`.
    pub fn new(global: G, locals: Vec<L>) -> Self {
        Self { global: Arc::new(global), locals, steps: Vec::new(), barriers: Vec::new() }
    }

    /// Appends a step.
    pub fn step<F>(self, step: F) -> Self
        where
            F: Fn(&G, &mut L) + Send + Sync + 'static,
    {
        self.prepared_step(|_: &G, _: &mut L| (), move |global: &G, local: &mut L, ()| step(global, local))
    }

    /// Appends a step, with a preparatory phase whose result is passed to the step.
    pub fn prepared_step<P, R, F>(mut self, prepare: P, step: F) -> Self
        where
            P: Fn(&G, &mut L) -> R + Send + Sync + 'static,
            F: Fn(&G, &mut L, R) + Send + Sync + 'static,
    {
        let barrier = Barrier::new(self.locals.len());
        self.barriers.push(barrier.clone());

        self.steps.push(Arc::new(move |global: &G, local: &mut L| {
            let prepared = prepare(global, local);

            barrier.wait();

            step(global, local, prepared);
        }));

        self
    }

    /// Runs all steps `iterations` times, then returns the Global state and the Local states, in order.
    ///
    /// #   Panics
    ///
    /// If any step panicked on any thread; the other threads are released at their next synchronization point.
    pub fn run(self, iterations: usize) -> (Arc<G>, Vec<L>) {
        let Lockstep { global, locals, steps, mut barriers } = self;

        assert!(!locals.is_empty(), "Cannot run in lockstep without a single thread");

        let finish = Barrier::new(locals.len());
        barriers.push(finish.clone());

        let steps: Arc<[Step<G, L>]> = steps.into();
        let barriers: Arc<[Barrier]> = barriers.into();

        let handles: Vec<_> = locals.into_iter().map(|mut local| {
            let (global, steps, barriers, finish) = (global.clone(), steps.clone(), barriers.clone(), finish.clone());

            thread::spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    for _ in 0..iterations {
                        for step in steps.iter() {
                            step(&global, &mut local);
                        }

                        finish.wait();
                    }
                }));

                //  Release the other threads, wherever they wait.
                if let Err(payload) = outcome {
                    barriers.iter().for_each(Barrier::poison);
                    panic::resume_unwind(payload);
                }

                local
            })
        }).collect();

        let results: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();

        let locals = results.into_iter()
            .map(|result| result.unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect();

        (global, locals)
    }
}
