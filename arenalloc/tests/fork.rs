#![cfg(target_os = "linux")]

use std::{
    ptr::NonNull,
    sync::{atomic::{AtomicBool, Ordering}, Arc},
};

use serial_test::serial;

use arenalloc::Arenalloc;
use arenalloc_test::{number_from_env, Pool};

static ALLOCATOR: Arenalloc = Arenalloc::new();

#[serial]
#[test]
fn fork_while_allocating() {
    //  Other threads hammer the allocator while the main thread forks; the child must still be able to allocate.

    let number_forks = number_from_env("ARENALLOC_FORK_NUMBER_FORKS", 20);
    let number_threads = number_from_env("ARENALLOC_FORK_NUMBER_THREADS", 3);

    ALLOCATOR.warm_up().expect("Warmed up");

    let stop = Arc::new(AtomicBool::new(false));

    let pool = Pool::new(number_threads, |i| {
        let stop = stop.clone();

        move || {
            let mut iterations = 0usize;

            while !stop.load(Ordering::Relaxed) {
                let size = 16 << (iterations % 12);
                let pointer = ALLOCATOR.malloc(size + i).expect("Allocated");

                unsafe {
                    pointer.as_ptr().write_bytes(0xa5, size);
                    ALLOCATOR.free(Some(pointer));
                }

                iterations += 1;
            }

            iterations
        }
    });

    for _ in 0..number_forks {
        let child = unsafe { libc::fork() };
        assert!(child >= 0, "fork failed: {}", std::io::Error::last_os_error());

        if child == 0 {
            //  Only async-signal-safe calls from here, bar the allocator itself.
            let status = if allocate_in_child() { 0 } else { 1 };
            unsafe { libc::_exit(status) };
        }

        let mut status = 0;
        let result = unsafe { libc::waitpid(child, &mut status as *mut _, 0) };

        assert_eq!(child, result);
        assert!(libc::WIFEXITED(status), "child did not exit: {}", status);
        assert_eq!(0, libc::WEXITSTATUS(status));
    }

    stop.store(true, Ordering::Relaxed);

    let iterations = pool.join();
    assert!(iterations.iter().all(|n| *n > 0), "{:?}", iterations);
}

#[serial]
#[test]
fn fork_keeps_parent_allocations() {
    //  Memory allocated by the parent remains valid, and can be freed, in the child.

    let pointer = ALLOCATOR.calloc(4, 64).expect("Allocated");
    unsafe { pointer.as_ptr().write_bytes(0x42, 256) };

    let child = unsafe { libc::fork() };
    assert!(child >= 0, "fork failed: {}", std::io::Error::last_os_error());

    if child == 0 {
        let intact = unsafe { std::slice::from_raw_parts(pointer.as_ptr(), 256) }.iter().all(|b| *b == 0x42);

        unsafe { ALLOCATOR.free(Some(pointer)) };

        let status = if intact && allocate_in_child() { 0 } else { 1 };
        unsafe { libc::_exit(status) };
    }

    let mut status = 0;
    let result = unsafe { libc::waitpid(child, &mut status as *mut _, 0) };

    assert_eq!(child, result);
    assert!(libc::WIFEXITED(status), "child did not exit: {}", status);
    assert_eq!(0, libc::WEXITSTATUS(status));

    unsafe { ALLOCATOR.free(Some(pointer)) };
}

//
//  Implementation Details
//

//  Allocates and frees a spread of sizes, from small to huge, reporting whether all succeeded.
fn allocate_in_child() -> bool {
    let sizes = [1, 16, 100, 4096, 40_000, 1 << 20, 8 << 20];

    let pointers: Vec<Option<NonNull<u8>>> = sizes.iter().map(|size| ALLOCATOR.malloc(*size).ok()).collect();

    let success = pointers.iter().all(Option::is_some);

    for pointer in pointers {
        unsafe { ALLOCATOR.free(pointer) };
    }

    success
}
