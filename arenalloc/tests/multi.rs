use std::{
    alloc::{GlobalAlloc, Layout},
    collections::BTreeSet,
    mem, ops, ptr,
    sync::Mutex,
};

use serial_test::serial;

use arenalloc::{Arenalloc, MallocxFlags};
use arenalloc_test::{number_from_env, Barrier, Lockstep, Pool};

static ALLOCATOR: Arenalloc = Arenalloc::new();

//
//  Tests
//

#[serial]
#[test]
fn thread_states_are_released() {
    //  Threads bind to arenas on first allocation, and unbind on exit.

    let number_iterations = number_iterations();
    let number_threads = number_threads();

    for _ in 0..number_iterations {
        let start = Barrier::new(number_threads);

        let pool = Pool::new(number_threads, |i| {
            let start = start.clone();

            move || {
                start.wait();

                let pointer = Pointer::new(i);

                //  Sanity check, to ensure no other thread allocated the same pointer.
                assert_eq!(i, *pointer);

                ALLOCATOR.thread_arena().expect("Bound")
            }
        });

        let arenas = pool.join();
        assert_eq!(number_threads, arenas.len());

        for index in 0..ALLOCATOR.narenas_auto() {
            //  Arenas are created lazily, hence may not exist.
            let nthreads = ALLOCATOR.arena_nthreads(index);
            assert!(nthreads.unwrap_or(0) == 0, "arena {}: {:?}", index, nthreads);
        }

        for arena in arenas {
            assert_eq!(Some(0), ALLOCATOR.arena_nthreads(arena), "arena {}", arena);
        }
    }
}

#[serial]
#[test]
fn threads_spread_over_arenas() {
    //  As long as there are enough arenas, concurrent threads each get their own.

    initialize_heap();

    let number_threads = std::cmp::min(number_threads(), ALLOCATOR.narenas_auto());

    let bound = Barrier::new(number_threads);

    let pool = Pool::new(number_threads, |i| {
        let bound = bound.clone();

        move || {
            let pointer = Pointer::new(i);
            let arena = ALLOCATOR.thread_arena().expect("Bound");

            //  Keep all threads alive, and bound, until all are bound.
            bound.wait();

            drop(pointer);

            arena
        }
    });

    let arenas: BTreeSet<_> = pool.join().into_iter().collect();

    assert_eq!(number_threads, arenas.len(), "{:?}", arenas);
}

#[serial]
#[test]
fn free_only_threads_stay_unbound() {
    //  A thread which only frees memory allocated by another is never bound to an arena.

    initialize_heap();

    //  Allocate from a short-lived thread, so as not to bind the test thread.
    let producer = Pool::new(1, |_| || -> Vec<usize> {
        (0..16).map(|i| ALLOCATOR.malloc(64 + i).expect("Allocated").as_ptr() as usize).collect()
    });

    let pointers = producer.join().pop().expect("One producer");

    let consumer = Pool::new(1, |_| {
        let pointers = pointers.clone();

        move || {
            for pointer in pointers {
                unsafe { ALLOCATOR.free(std::ptr::NonNull::new(pointer as *mut u8)) };
            }

            ALLOCATOR.thread_arena()
        }
    });

    assert_eq!(vec!(None), consumer.join());
}

#[serial]
#[test]
fn producer_consumer_ring() {
    //  Blocks are concurrently allocated, then deallocated on another thread than the one which allocated them:
    //
    //  1.  Each thread moves its "victims", the numbers 0 to N made into `String`, into `Pointer`s.
    //  2.  The pointers are shuffled, so that each thread's vector contains pointers allocated by all threads.
    //  3.  Each thread frees its pointers, recovering the victims, and checks that no corruption occurred.

    const NUMBER_VICTIMS: usize = 256;

    struct Ring(Vec<Mutex<Vec<Pointer<String>>>>);

    fn shuffle(ring: &Ring) {
        let mut guards: Vec<_> = ring.0.iter().map(|mutex| mutex.lock().unwrap()).collect();
        let number_threads = guards.len();

        //  Rotate the i-th pointers of all threads by `i % number_threads`.
        for i in 0..NUMBER_VICTIMS {
            let mut layer: Vec<_> = guards.iter_mut().map(|guard| mem::take(&mut guard[i])).collect();
            layer.rotate_right(i % number_threads);

            for (guard, pointer) in guards.iter_mut().zip(layer) {
                guard[i] = pointer;
            }
        }
    }

    let number_iterations = number_iterations();
    let number_threads = number_threads();

    assert!(number_threads >= 2, "number_threads: {} < 2", number_threads);

    let ring = Ring((0..number_threads).map(|_| Mutex::new(Vec::new())).collect());

    Lockstep::new(ring, (0..number_threads).collect())
        .prepared_step(
            |_: &Ring, _: &mut usize| (0..NUMBER_VICTIMS).map(|i| i.to_string()).collect::<Vec<_>>(),
            |ring: &Ring, thread: &mut usize, victims| {
                ring.0[*thread].lock().unwrap().extend(victims.into_iter().map(Pointer::new));
            })
        .step(|ring: &Ring, thread: &mut usize| {
            if *thread == 0 {
                shuffle(ring);
            }
        })
        .step(|ring: &Ring, thread: &mut usize| {
            let victims: Vec<String> = ring.0[*thread].lock().unwrap()
                .drain(..)
                .map(|mut pointer| mem::take(&mut *pointer))
                .collect();

            for (index, victim) in victims.into_iter().enumerate() {
                assert_eq!(Ok(index), victim.parse(), "thread {}, index {}, victim {:?}", thread, index, victim);
            }
        })
        .run(number_iterations);
}

//
//  Implementation Details
//

//  Initializes the heap, without binding the calling thread to an arena.
fn initialize_heap() { assert_ne!(0, ALLOCATOR.nallocx(1, MallocxFlags::NONE)); }

fn number_iterations() -> usize { number_from_env("ARENALLOC_MULTI_NUMBER_ITERATIONS", 10) }

fn number_threads() -> usize { number_from_env("ARENALLOC_MULTI_NUMBER_THREADS", 4) }

//  A Box, allocated by ALLOCATOR.
struct Pointer<T> {
    pointer: *mut T,
}

impl<T> Pointer<T> {
    fn new(value: T) -> Self {
        let layout = Layout::new::<T>();

        let pointer = unsafe { ALLOCATOR.alloc(layout) } as *mut T;
        assert!(!pointer.is_null(), "Allocated");

        unsafe { ptr::write(pointer, value) }

        Pointer { pointer }
    }
}

impl<T> Default for Pointer<T>
    where
        T: Default
{
    fn default() -> Self { Self::new(T::default()) }
}

impl<T> Drop for Pointer<T> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.pointer);
            ALLOCATOR.dealloc(self.pointer as *mut u8, Layout::new::<T>());
        }
    }
}

impl<T> ops::Deref for Pointer<T> {
    type Target = T;

    fn deref(&self) -> &T { unsafe { &*self.pointer } }
}

impl<T> ops::DerefMut for Pointer<T> {
    fn deref_mut(&mut self) -> &mut T { unsafe { &mut *self.pointer } }
}

unsafe impl<T> Send for Pointer<T>
    where
        T: Send
{}

unsafe impl<T> Sync for Pointer<T>
    where
        T: Sync
{}
