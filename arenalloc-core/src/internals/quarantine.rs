//! Quarantine
//!
//! A per-thread FIFO of freed regions, delaying their actual release so that use-after-free accesses hit junk
//! rather than live data. It holds at most `QUARANTINE_CAPACITY` regions, and at most `quarantine` bytes.

use core::ptr::NonNull;

/// Maximum number of regions held.
pub(crate) const QUARANTINE_CAPACITY: usize = 64;

/// Quarantine of a thread.
pub(crate) struct Quarantine {
    entries: [Option<(NonNull<u8>, usize)>; QUARANTINE_CAPACITY],
    head: usize,
    length: usize,
    bytes: usize,
}

impl Quarantine {
    /// Creates an empty instance.
    pub(crate) const fn new() -> Self {
        Self { entries: [None; QUARANTINE_CAPACITY], head: 0, length: 0, bytes: 0 }
    }

    /// Returns the number of regions held.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.length }

    /// Returns the number of bytes held.
    #[cfg(test)]
    pub(crate) fn bytes(&self) -> usize { self.bytes }

    /// Admits `pointer`, of `usable` bytes, evicting through `release` as necessary to stay within `budget` bytes.
    ///
    /// A region larger than `budget` is released immediately.
    pub(crate) fn admit<F>(&mut self, pointer: NonNull<u8>, usable: usize, budget: usize, mut release: F)
        where
            F: FnMut(NonNull<u8>),
    {
        if usable > budget {
            release(pointer);
            return;
        }

        while self.length == QUARANTINE_CAPACITY || self.bytes + usable > budget {
            match self.pop() {
                Some(evicted) => release(evicted),
                None => break,
            }
        }

        let tail = (self.head + self.length) % QUARANTINE_CAPACITY;

        self.entries[tail] = Some((pointer, usable));
        self.length += 1;
        self.bytes += usable;
    }

    /// Releases all regions held, oldest first.
    pub(crate) fn drain<F>(&mut self, mut release: F)
        where
            F: FnMut(NonNull<u8>),
    {
        while let Some(evicted) = self.pop() {
            release(evicted);
        }
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        if self.length == 0 {
            return None;
        }

        let (pointer, usable) = self.entries[self.head].take()?;

        self.head = (self.head + 1) % QUARANTINE_CAPACITY;
        self.length -= 1;
        self.bytes -= usable;

        Some(pointer)
    }
}

#[cfg(test)]
mod tests {

use super::*;

fn pointer(index: usize) -> NonNull<u8> { NonNull::new(((index + 1) * 16) as *mut u8).unwrap() }

#[test]
fn quarantine_budget() {
    let mut quarantine = Quarantine::new();
    let mut released = Vec::new();

    quarantine.admit(pointer(0), 64, 128, |p| released.push(p));
    quarantine.admit(pointer(1), 64, 128, |p| released.push(p));

    assert!(released.is_empty());
    assert_eq!((2, 128), (quarantine.len(), quarantine.bytes()));

    quarantine.admit(pointer(2), 32, 128, |p| released.push(p));
    assert_eq!(vec![pointer(0)], released);
    assert_eq!((2, 96), (quarantine.len(), quarantine.bytes()));

    quarantine.admit(pointer(3), 256, 128, |p| released.push(p));
    assert_eq!(vec![pointer(0), pointer(3)], released);

    quarantine.drain(|p| released.push(p));
    assert_eq!(vec![pointer(0), pointer(3), pointer(1), pointer(2)], released);
    assert_eq!((0, 0), (quarantine.len(), quarantine.bytes()));
}

#[test]
fn quarantine_capacity() {
    let mut quarantine = Quarantine::new();
    let mut released = Vec::new();

    for index in 0..=QUARANTINE_CAPACITY {
        quarantine.admit(pointer(index), 16, usize::MAX, |p| released.push(p));
    }

    assert_eq!(vec![pointer(0)], released);
    assert_eq!(QUARANTINE_CAPACITY, quarantine.len());

    released.clear();
    quarantine.drain(|p| released.push(p));

    assert_eq!(QUARANTINE_CAPACITY, released.len());
    assert_eq!(pointer(1), released[0]);
    assert_eq!(pointer(QUARANTINE_CAPACITY), released[QUARANTINE_CAPACITY - 1]);
}

}
