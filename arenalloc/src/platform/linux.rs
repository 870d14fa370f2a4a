//! Implementation of Linux specific calls.

use core::{
    ffi::CStr,
    fmt::Write,
    marker,
    num::NonZeroUsize,
    ptr::{self, NonNull},
    sync::atomic,
};

use arenalloc_core::{self, AllocError, Message, PowerOf2, ThreadId, UtraceRecord};

use super::{Hooks, ThreadLocal};

/// Implementation of the Platform trait, for Linux.
pub(crate) struct ArPlatform {
    hooks: Hooks,
}

impl ArPlatform {
    /// Creates an instance, which registers `hooks` on behalf of the heap.
    pub(crate) const fn new(hooks: Hooks) -> Self { Self { hooks } }
}

impl arenalloc_core::Platform for ArPlatform {
    unsafe fn reserve_chunk(&self, size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
        debug_assert!(size > 0);

        let candidate = mmap_exact(size, alignment).or_else(|| mmap_over(size, alignment));

        debug_assert!(candidate.map_or(true, |pointer| alignment.is_aligned(pointer.as_ptr() as usize)),
            "Incorrect alignment of chunk: {:?} % {:x} != 0", candidate, alignment.value());

        candidate
    }

    unsafe fn release_chunk(&self, pointer: NonNull<u8>, size: usize) {
        munmap_deallocate(pointer.as_ptr(), size);
    }

    fn ncpus(&self) -> usize { num_cpus::get() }

    fn current_thread(&self) -> ThreadId {
        //  Safety:
        //  -   Always safe to call.
        let id = unsafe { libc::pthread_self() } as usize;

        ThreadId::new(NonZeroUsize::new(id).unwrap_or(NonZeroUsize::MIN))
    }

    fn yield_now(&self) {
        //  Safety:
        //  -   Always safe to call.
        unsafe { libc::sched_yield() };
    }

    fn write_diagnostic(&self, message: &str) {
        let mut bytes = message.as_bytes();

        while !bytes.is_empty() {
            //  Safety:
            //  -   `bytes` is valid for `bytes.len()` bytes.
            let written = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const libc::c_void, bytes.len()) };

            if written <= 0 {
                return;
            }

            bytes = &bytes[written as usize..];
        }
    }

    fn abort(&self) -> ! {
        //  Safety:
        //  -   Always safe to call.
        unsafe { libc::abort() }
    }

    fn set_errno(&self, error: AllocError) {
        let value = match error {
            AllocError::OutOfMemory => libc::ENOMEM,
            AllocError::InvalidArgument => libc::EINVAL,
        };

        //  Safety:
        //  -   `__errno_location` returns the address of the errno of the calling thread.
        unsafe { *libc::__errno_location() = value };
    }

    fn default_conf(&self) -> &[u8] { option_env!("ARENALLOC_MALLOC_CONF").unwrap_or("").as_bytes() }

    fn conf_link<'a>(&self, buffer: &'a mut [u8]) -> &'a [u8] {
        const LINK: &[u8] = b"/etc/malloc.conf\0";

        //  Safety:
        //  -   `__errno_location` returns the address of the errno of the calling thread.
        //  -   `LINK` is NUL-terminated, and `buffer` is valid for `buffer.len()` bytes.
        unsafe {
            let errno = *libc::__errno_location();

            let length = libc::readlink(
                LINK.as_ptr() as *const libc::c_char, buffer.as_mut_ptr() as *mut libc::c_char, buffer.len());

            *libc::__errno_location() = errno;

            if length <= 0 {
                return &buffer[..0];
            }

            &buffer[..length as usize]
        }
    }

    fn conf_env(&self) -> &[u8] {
        const NAME: &[u8] = b"MALLOC_CONF\0";

        //  Safety:
        //  -   `NAME` is NUL-terminated.
        //  -   The environment is not modified concurrently with initialization.
        unsafe {
            let value = libc::getenv(NAME.as_ptr() as *const libc::c_char);

            if value.is_null() { b"" } else { CStr::from_ptr(value).to_bytes() }
        }
    }

    fn register_exit_hook(&self) -> bool {
        //  Safety:
        //  -   The hook is a plain function, callable at any time.
        unsafe { libc::atexit(self.hooks.at_exit) == 0 }
    }

    fn register_fork_handlers(&self) -> bool {
        let hooks = &self.hooks;

        //  Safety:
        //  -   The hooks are plain functions, callable at any time.
        let result = unsafe {
            libc::pthread_atfork(Some(hooks.prefork), Some(hooks.postfork_parent), Some(hooks.postfork_child))
        };

        result == 0
    }

    fn utrace(&self, record: &UtraceRecord) {
        let address = |pointer: Option<NonNull<u8>>| pointer.map_or(ptr::null_mut(), NonNull::as_ptr);

        let mut message = Message::new();

        //  Writing into a `Message` never fails, it truncates.
        let _ = writeln!(message, "<arenalloc>: utrace {:p} {} {:p}",
            address(record.pointer), record.size, address(record.result));

        self.write_diagnostic(message.as_str());
    }
}

/// Implementation of the ThreadLocal trait, for Linux.
pub(crate) struct ArThreadLocal<T> {
    key: atomic::AtomicI64,
    destructor: Destructor,
    _marker: marker::PhantomData<*const T>,
}

impl<T> ArThreadLocal<T> {
    const UNINITIALIZED: i64 = -1;
    const UNDER_INITIALIZATION: i64 = -2;
    const FAILED: i64 = -3;

    /// Creates an uninitialized instance.
    ///
    /// `destructor` is invoked, at thread exit, with the value of any thread whose pointer is non-null.
    pub(crate) const fn new(destructor: Destructor) -> Self {
        let key = atomic::AtomicI64::new(Self::UNINITIALIZED);
        let _marker = marker::PhantomData;

        ArThreadLocal { key, destructor, _marker }
    }

    #[inline(always)]
    fn get_key(&self) -> Option<libc::pthread_key_t> {
        let key = self.key.load(atomic::Ordering::Acquire);
        let key = if key >= 0 { key } else { self.initialize() };

        if key >= 0 { Some(key as libc::pthread_key_t) } else { None }
    }

    #[cold]
    #[inline(never)]
    fn initialize(&self) -> i64 {
        const ACQUIRE: atomic::Ordering = atomic::Ordering::Acquire;
        const RELAXED: atomic::Ordering = atomic::Ordering::Relaxed;

        if self.key.compare_exchange(Self::UNINITIALIZED, Self::UNDER_INITIALIZATION, ACQUIRE, RELAXED).is_ok() {
            let key = self.create_key();
            self.key.store(key, atomic::Ordering::Release);
            return key;
        }

        let mut key = self.key.load(ACQUIRE);

        while key == Self::UNDER_INITIALIZATION {
            //  Safety:
            //  -   Always safe to call.
            unsafe { libc::sched_yield() };
            key = self.key.load(ACQUIRE);
        }

        key
    }

    #[cold]
    fn create_key(&self) -> i64 {
        let mut key: libc::pthread_key_t = 0;

        //  Safety:
        //  -   `key` is a valid location.
        let result = unsafe { libc::pthread_key_create(&mut key as *mut _, Some(self.destructor)) };

        if result == 0 { key as i64 } else { Self::FAILED }
    }
}

impl<T> ThreadLocal<T> for ArThreadLocal<T> {
    #[inline(always)]
    fn get(&self) -> *mut T {
        let key = self.key.load(atomic::Ordering::Acquire);

        if key < 0 {
            return ptr::null_mut();
        }

        //  Safety:
        //  -   `key` was created by `pthread_key_create`.
        unsafe { libc::pthread_getspecific(key as libc::pthread_key_t) as *mut T }
    }

    #[cold]
    #[inline(never)]
    fn set(&self, value: *mut T) -> bool {
        let key = match self.get_key() {
            Some(key) => key,
            None => return false,
        };

        //  Safety:
        //  -   `key` was created by `pthread_key_create`.
        unsafe { libc::pthread_setspecific(key, value as *const libc::c_void) == 0 }
    }
}

//  Safety:
//  -   The key is only ever accessed atomically, and the values are per-thread.
unsafe impl<T> Sync for ArThreadLocal<T> {}

/// Thread-exit destructor of a thread-local.
pub(crate) type Destructor = unsafe extern "C" fn(*mut libc::c_void);

//  Attempts to map `size` bytes, in the hope that they happen to be aligned on `alignment`.
fn mmap_exact(size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
    let pointer = mmap_allocate(size)?;

    if alignment.is_aligned(pointer.as_ptr() as usize) {
        return Some(pointer);
    }

    //  Safety:
    //  -   `pointer` points to a `mmap`ed area of `size` bytes, not in use.
    unsafe { munmap_deallocate(pointer.as_ptr(), size) };

    None
}

//  Maps `size` bytes aligned on `alignment`, by over-allocating then trimming front and back.
fn mmap_over(size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
    let over_size = size.checked_add(alignment.value())?;
    let front_pointer = mmap_allocate(over_size)?;

    let front_size = alignment.round_up(front_pointer.as_ptr() as usize) - front_pointer.as_ptr() as usize;
    let back_size = over_size - front_size - size;

    debug_assert!(front_size < alignment.value(), "{} >= {}", front_size, alignment.value());

    //  Safety:
    //  -   `front_size` is less than `over_size`, hence the result is within the mapped area.
    let aligned_pointer = unsafe { front_pointer.as_ptr().add(front_size) };

    //  Safety:
    //  -   `front_size + size` is at most `over_size`, hence the result is within the mapped area, or at its end.
    let back_pointer = unsafe { aligned_pointer.add(size) };

    if front_size > 0 {
        //  Safety:
        //  -   `[front_pointer, front_pointer + front_size)` is mapped, and not in use.
        unsafe { munmap_deallocate(front_pointer.as_ptr(), front_size) };
    }

    if back_size > 0 {
        //  Safety:
        //  -   `[back_pointer, back_pointer + back_size)` is mapped, and not in use.
        unsafe { munmap_deallocate(back_pointer, back_size) };
    }

    NonNull::new(aligned_pointer)
}

//  Wrapper around `mmap`.
//
//  Returns a pointer to `size` zero-filled bytes of memory; does not guarantee any alignment beyond a page.
fn mmap_allocate(size: usize) -> Option<NonNull<u8>> {
    let length = size;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    //  No specific address hint.
    let addr = ptr::null_mut();
    //  When used in conjunction with MAP_ANONYMOUS, fd is mandated to be -1 on some implementations.
    let fd = -1;
    //  When used in conjunction with MAP_ANONYMOUS, offset is mandated to be 0 on some implementations.
    let offset = 0;

    //  Safety:
    //  -   `addr`, `fd`, and `offset` are suitable for MAP_ANONYMOUS.
    let result = unsafe { libc::mmap(addr, length, prot, flags, fd, offset) };

    let result = if result != libc::MAP_FAILED { result as *mut u8 } else { ptr::null_mut() };
    NonNull::new(result)
}

//  Wrapper around `munmap`.
//
//  A failure is ignored: the range is leaked.
//
//  #   Safety
//
//  -   Assumes that `addr` points to a `mmap`ed area of at least `size` bytes.
//  -   Assumes that the range `[addr, addr + size)` is no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = libc::munmap(addr as *mut libc::c_void, size);
    debug_assert!(result == 0, "Could not munmap {:x}, {}: {}", addr as usize, size, result);
}
