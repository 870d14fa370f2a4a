#![deny(missing_docs)]

//! Multi-threaded test harness for arenalloc.
//!
//! The harness runs the same series of steps on a number of threads, in lockstep, so that each step starts as
//! simultaneously as possible on every thread. This maximizes contention on the allocator's locks, and the chances of
//! flushing out data-races.

mod barrier;
mod lockstep;
mod pool;

pub use barrier::Barrier;
pub use lockstep::Lockstep;
pub use pool::Pool;

/// Reads a number from the environment variable `name`, or returns `default` if absent or unparsable.
pub fn number_from_env(name: &str, default: usize) -> usize {
    match std::env::var(name).ok().and_then(|value| value.parse().ok()) {
        Some(number) => {
            println!("number_from_env - {}: {}", name, number);
            number
        },
        None => {
            println!("number_from_env - {}: {} (default)", name, default);
            default
        },
    }
}
