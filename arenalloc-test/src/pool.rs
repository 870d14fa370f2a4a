//! Pool of threads.

use std::{mem, thread};

/// A pool of threads, joined on drop.
pub struct Pool<T>(Vec<thread::JoinHandle<T>>);

impl<T> Pool<T>
    where
        T: Send + 'static,
{
    /// Spawns `count` threads, running the functions created by `factory` from the index of each thread.
    pub fn new<F, G>(count: usize, mut factory: F) -> Self
        where
            F: FnMut(usize) -> G,
            G: FnOnce() -> T + Send + 'static,
    {
        Self((0..count).map(|index| thread::spawn(factory(index))).collect())
    }

    /// Joins all threads, and returns their results in order.
    ///
    /// #   Panics
    ///
    /// If any thread panicked, once all threads are joined.
    pub fn join(mut self) -> Vec<T> { Self::join_all(mem::take(&mut self.0)) }

    fn join_all(handles: Vec<thread::JoinHandle<T>>) -> Vec<T> {
        //  First join _all_ threads, then report.
        let results: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();

        results.into_iter()
            .map(|result| result.unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
            .collect()
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        for handle in mem::take(&mut self.0) {
            let _ = handle.join();
        }
    }
}
