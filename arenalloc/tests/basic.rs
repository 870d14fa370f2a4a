use std::{ffi::CStr, ptr::NonNull};

use arenalloc::{AllocError, Arenalloc, CtlError, CtlValue, MallocxFlags};

static ALLOCATOR: Arenalloc = Arenalloc::new();

#[test]
fn warm_up() {
    ALLOCATOR.warm_up().expect("Warmed up!");

    //  Threads bind to an arena on their first allocation, not before.
    let pointer = ALLOCATOR.malloc(8).expect("Allocated");

    assert!(ALLOCATOR.thread_arena().is_some());

    unsafe { ALLOCATOR.free(Some(pointer)) };
}

#[test]
fn malloc_free() {
    let pointer = ALLOCATOR.malloc(100).expect("Allocated");

    unsafe {
        assert_eq!(112, ALLOCATOR.usable_size(Some(pointer)));

        pointer.as_ptr().write_bytes(0x42, 100);

        ALLOCATOR.free(Some(pointer));
        ALLOCATOR.free(None);

        assert_eq!(0, ALLOCATOR.usable_size(None));
    }
}

#[test]
fn calloc_zeroed_and_overflow() {
    let pointer = ALLOCATOR.calloc(16, 1000).expect("Allocated");

    unsafe {
        let bytes = std::slice::from_raw_parts(pointer.as_ptr(), 16_000);
        assert!(bytes.iter().all(|b| *b == 0));

        ALLOCATOR.free(Some(pointer));
    }

    assert_eq!(Err(AllocError::OutOfMemory), ALLOCATOR.calloc(usize::MAX, 2));
    assert_eq!(Some(libc::ENOMEM), std::io::Error::last_os_error().raw_os_error());
}

#[test]
fn aligned_entry_points() {
    for &alignment in &[8usize, 64, 4096, 1 << 21] {
        let pointer = ALLOCATOR.posix_memalign(alignment, 10).expect("Allocated");
        assert_eq!(0, pointer.as_ptr() as usize % alignment);

        unsafe { ALLOCATOR.free(Some(pointer)) };
    }

    assert_eq!(Err(AllocError::InvalidArgument), ALLOCATOR.posix_memalign(3, 10));
    assert_eq!(Err(AllocError::InvalidArgument), ALLOCATOR.aligned_alloc(48, 10));

    let pointer = ALLOCATOR.valloc(1).expect("Allocated");
    assert_eq!(0, pointer.as_ptr() as usize % 4096);

    unsafe { ALLOCATOR.free(Some(pointer)) };
}

#[test]
fn realloc_preserves_contents() {
    unsafe {
        let pointer = ALLOCATOR.realloc(None, 10).expect("Allocated").expect("Non-null");
        pointer.as_ptr().copy_from_nonoverlapping(b"0123456789".as_ptr(), 10);

        let mut current = pointer;

        for &size in &[100, 10_000, 100_000, 10_000_000, 50] {
            current = ALLOCATOR.realloc(Some(current), size).expect("Reallocated").expect("Non-null");

            assert_eq!(b"0123456789", std::slice::from_raw_parts(current.as_ptr(), 10));
        }

        assert_eq!(Ok(None), ALLOCATOR.realloc(Some(current), 0));
    }
}

#[test]
fn extended_entry_points() {
    let flags = MallocxFlags::ZERO | MallocxFlags::lg_align(6);

    assert_eq!(64, ALLOCATOR.nallocx(1, flags));
    assert_eq!(0, ALLOCATOR.nallocx(1, MallocxFlags::lg_align(63)));

    let pointer = ALLOCATOR.mallocx(1000, flags).expect("Allocated");

    unsafe {
        assert_eq!(0, pointer.as_ptr() as usize % 64);
        assert_eq!(1024, ALLOCATOR.sallocx(pointer, flags));

        let pointer = ALLOCATOR.rallocx(pointer, 5000, flags).expect("Reallocated");
        let usable = ALLOCATOR.xallocx(pointer, 5000, 0, flags);

        assert_eq!(ALLOCATOR.nallocx(5000, flags), usable);

        ALLOCATOR.sdallocx(pointer, 5000, flags);
    }
}

#[test]
fn mallctl_names() {
    match ALLOCATOR.mallctl(b"version", None) {
        Ok(CtlValue::Str(version)) => assert_eq!(env!("CARGO_PKG_VERSION").as_bytes(), version.to_bytes()),
        other => panic!("Unexpected: {:?}", other),
    }

    assert_eq!(Ok(CtlValue::Size(22)), ALLOCATOR.mallctl(b"opt.lg_chunk", None));
    assert_eq!(Err(CtlError::NotFound), ALLOCATOR.mallctl(b"opt.nonsense", None));
    assert_eq!(Err(CtlError::Permission), ALLOCATOR.mallctl(b"opt.narenas", Some(CtlValue::Size(3))));

    let narenas = ALLOCATOR.narenas_auto();
    assert_eq!(Ok(CtlValue::U32(narenas as u32)), ALLOCATOR.mallctl(b"arenas.narenas", None));

    let dss = CStr::from_bytes_with_nul(b"disabled\0").unwrap();
    assert_eq!(Ok(CtlValue::Str(dss)), ALLOCATOR.mallctl(b"opt.dss", None));
}

#[test]
fn global_alloc() {
    use std::alloc::{GlobalAlloc, Layout};

    unsafe {
        for &(size, align) in &[(1, 1), (24, 8), (3, 16), (100, 128), (8192, 4096), (1 << 20, 1 << 20)] {
            let layout = Layout::from_size_align(size, align).unwrap();

            let pointer = NonNull::new(ALLOCATOR.alloc_zeroed(layout)).expect("Allocated");
            assert_eq!(0, pointer.as_ptr() as usize % align);
            assert!(std::slice::from_raw_parts(pointer.as_ptr(), size).iter().all(|b| *b == 0));

            let grown = GlobalAlloc::realloc(&ALLOCATOR, pointer.as_ptr(), layout, size * 2);
            assert!(!grown.is_null());
            assert_eq!(0, grown as usize % align);

            ALLOCATOR.dealloc(grown, Layout::from_size_align(size * 2, align).unwrap());
        }
    }
}
