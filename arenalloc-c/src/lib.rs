#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

//! Exposition of the Arenalloc API via a C ABI.
//!
//! The functions mirror their C library counterparts, prefixed with `ar_`, and set `errno` likewise.

use core::{
    ffi::CStr,
    mem,
    ptr::{self, NonNull},
};

use libc::{c_char, c_int, c_void};

use arenalloc::{AllocError, Arenalloc, CtlError, CtlKind, CtlName, CtlValue, MallocxFlags};

/// Initializes the heap and the state of the calling thread.
///
/// Returns 0 on success, and a negative value otherwise.
#[cold]
#[no_mangle]
pub extern "C" fn ar_warm_up() -> c_int { if ALLOCATOR.warm_up().is_ok() { 0 } else { -1 } }

/// Allocates `size` bytes of memory.
///
/// Returns NULL, and sets `errno` to ENOMEM, on failure.
#[no_mangle]
pub extern "C" fn ar_malloc(size: usize) -> *mut c_void { into_raw(ALLOCATOR.malloc(size)) }

/// Allocates `count * size` zero-filled bytes of memory.
///
/// Returns NULL, and sets `errno` to ENOMEM, on failure or overflow.
#[no_mangle]
pub extern "C" fn ar_calloc(count: usize, size: usize) -> *mut c_void { into_raw(ALLOCATOR.calloc(count, size)) }

/// Allocates `size` bytes of memory aligned on `alignment`, and stores the pointer in `result`.
///
/// Returns 0 on success, EINVAL if `alignment` is not a power of 2 multiple of `sizeof(void*)`, and ENOMEM if out of
/// memory; `errno` is left untouched.
///
/// #   Safety
///
/// -   Assumes `result` is valid for writes.
#[no_mangle]
pub unsafe extern "C" fn ar_posix_memalign(result: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    match ALLOCATOR.posix_memalign(alignment, size) {
        Ok(pointer) => {
            *result = pointer.as_ptr() as *mut c_void;
            0
        },
        Err(error) => error_code(error),
    }
}

/// Allocates `size` bytes of memory aligned on `alignment`, a power of 2.
///
/// Returns NULL, and sets `errno`, on failure.
#[no_mangle]
pub extern "C" fn ar_aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    into_raw(ALLOCATOR.aligned_alloc(alignment, size))
}

/// Allocates `size` bytes of memory aligned on `alignment`, a power of 2.
///
/// Returns NULL on failure.
#[no_mangle]
pub extern "C" fn ar_memalign(alignment: usize, size: usize) -> *mut c_void {
    into_raw(ALLOCATOR.memalign(alignment, size))
}

/// Allocates `size` bytes of memory aligned on a page.
///
/// Returns NULL on failure.
#[no_mangle]
pub extern "C" fn ar_valloc(size: usize) -> *mut c_void { into_raw(ALLOCATOR.valloc(size)) }

/// Resizes the memory located at `pointer` to `size` bytes.
///
/// A NULL `pointer` allocates, a 0 `size` frees and returns NULL. On failure, returns NULL and the original memory is
/// left untouched.
///
/// #   Safety
///
/// -   Assumes `pointer` is NULL, or has been returned by a prior allocation and not deallocated since.
#[no_mangle]
pub unsafe extern "C" fn ar_realloc(pointer: *mut c_void, size: usize) -> *mut c_void {
    match ALLOCATOR.realloc(NonNull::new(pointer as *mut u8), size) {
        Ok(Some(pointer)) => pointer.as_ptr() as *mut c_void,
        Ok(None) | Err(_) => ptr::null_mut(),
    }
}

/// Deallocates the memory located at `pointer`, if not NULL.
///
/// #   Safety
///
/// -   Assumes `pointer` is NULL, or has been returned by a prior allocation and not deallocated since.
/// -   Assumes the memory pointed by `pointer` is no longer in use.
#[no_mangle]
pub unsafe extern "C" fn ar_free(pointer: *mut c_void) { ALLOCATOR.free(NonNull::new(pointer as *mut u8)) }

/// Allocates `size` bytes of memory, as specified by `flags`.
///
/// Returns NULL on failure.
#[no_mangle]
pub extern "C" fn ar_mallocx(size: usize, flags: c_int) -> *mut c_void {
    into_raw(ALLOCATOR.mallocx(size, MallocxFlags::from_bits(flags)))
}

/// Resizes the memory located at `pointer` to `size` bytes, as specified by `flags`, moving it if necessary.
///
/// Returns NULL on failure, in which case the original memory is left untouched.
///
/// #   Safety
///
/// -   Assumes `pointer` has been returned by a prior allocation and not deallocated since.
#[no_mangle]
pub unsafe extern "C" fn ar_rallocx(pointer: *mut c_void, size: usize, flags: c_int) -> *mut c_void {
    let pointer = match NonNull::new(pointer as *mut u8) {
        Some(pointer) => pointer,
        None => return ptr::null_mut(),
    };

    into_raw(ALLOCATOR.rallocx(pointer, size, MallocxFlags::from_bits(flags)))
}

/// Resizes the memory located at `pointer` in place, to between `size` and `size + extra` bytes.
///
/// Returns the resulting usable size.
///
/// #   Safety
///
/// -   Assumes `pointer` has been returned by a prior allocation and not deallocated since.
#[no_mangle]
pub unsafe extern "C" fn ar_xallocx(pointer: *mut c_void, size: usize, extra: usize, flags: c_int) -> usize {
    match NonNull::new(pointer as *mut u8) {
        Some(pointer) => ALLOCATOR.xallocx(pointer, size, extra, MallocxFlags::from_bits(flags)),
        None => 0,
    }
}

/// Returns the usable size of the memory located at `pointer`.
///
/// #   Safety
///
/// -   Assumes `pointer` has been returned by a prior allocation and not deallocated since.
#[no_mangle]
pub unsafe extern "C" fn ar_sallocx(pointer: *const c_void, flags: c_int) -> usize {
    match NonNull::new(pointer as *mut u8) {
        Some(pointer) => ALLOCATOR.sallocx(pointer, MallocxFlags::from_bits(flags)),
        None => 0,
    }
}

/// Deallocates the memory located at `pointer`, as specified by `flags`.
///
/// #   Safety
///
/// -   Assumes `pointer` has been returned by a prior allocation and not deallocated since.
/// -   Assumes the memory pointed by `pointer` is no longer in use.
#[no_mangle]
pub unsafe extern "C" fn ar_dallocx(pointer: *mut c_void, flags: c_int) {
    if let Some(pointer) = NonNull::new(pointer as *mut u8) {
        ALLOCATOR.dallocx(pointer, MallocxFlags::from_bits(flags));
    }
}

/// Deallocates the memory located at `pointer`, of `size` bytes, as specified by `flags`.
///
/// #   Safety
///
/// -   Assumes `pointer` has been returned by a prior allocation of `size` bytes and not deallocated since.
/// -   Assumes the memory pointed by `pointer` is no longer in use.
#[no_mangle]
pub unsafe extern "C" fn ar_sdallocx(pointer: *mut c_void, size: usize, flags: c_int) {
    if let Some(pointer) = NonNull::new(pointer as *mut u8) {
        ALLOCATOR.sdallocx(pointer, size, MallocxFlags::from_bits(flags));
    }
}

/// Returns the usable size an allocation of `size` bytes, as specified by `flags`, would have, or 0 if invalid.
#[no_mangle]
pub extern "C" fn ar_nallocx(size: usize, flags: c_int) -> usize {
    ALLOCATOR.nallocx(size, MallocxFlags::from_bits(flags))
}

/// Returns the usable size of the memory located at `pointer`, or 0 if NULL.
///
/// #   Safety
///
/// -   Assumes `pointer` is NULL, or has been returned by a prior allocation and not deallocated since.
#[no_mangle]
pub unsafe extern "C" fn ar_malloc_usable_size(pointer: *const c_void) -> usize {
    ALLOCATOR.usable_size(NonNull::new(pointer as *mut u8))
}

/// Prints the statistics summary to the standard error.
#[cold]
#[no_mangle]
pub extern "C" fn ar_malloc_stats_print() { ALLOCATOR.stats_print() }

/// Reads, and optionally writes, the control `name`.
///
/// -   If `oldp` is not NULL, the current value is copied into it, `*oldlenp` being its size.
/// -   If `newp` is not NULL, the value it points to, of `newlen` bytes, is written.
///
/// Returns 0 on success, ENOENT for an unknown name, EINVAL for a size mismatch or invalid value, EPERM for a
/// read-only or write-only name, and EAGAIN if the heap cannot be initialized.
///
/// #   Safety
///
/// -   Assumes `name` is a NUL-terminated string.
/// -   Assumes `oldp`, if not NULL, is valid for writes of `*oldlenp` bytes, and `oldlenp` is valid.
/// -   Assumes `newp`, if not NULL, is valid for reads of `newlen` bytes.
#[no_mangle]
pub unsafe extern "C" fn ar_mallctl(
    name: *const c_char,
    oldp: *mut c_void,
    oldlenp: *mut usize,
    newp: *const c_void,
    newlen: usize,
) -> c_int
{
    if name.is_null() {
        return libc::ENOENT;
    }

    let name = CStr::from_ptr(name).to_bytes();

    match mallctl(name, oldp, oldlenp, newp, newlen) {
        Ok(()) => 0,
        Err(error) => ctl_error_code(error),
    }
}

//
//  Implementation
//

static ALLOCATOR: Arenalloc = Arenalloc::new();

fn into_raw(result: Result<NonNull<u8>, AllocError>) -> *mut c_void {
    result.map_or(ptr::null_mut(), |pointer| pointer.as_ptr() as *mut c_void)
}

fn error_code(error: AllocError) -> c_int {
    match error {
        AllocError::OutOfMemory => libc::ENOMEM,
        AllocError::InvalidArgument => libc::EINVAL,
    }
}

fn ctl_error_code(error: CtlError) -> c_int {
    match error {
        CtlError::NotFound => libc::ENOENT,
        CtlError::InvalidValue => libc::EINVAL,
        CtlError::Permission => libc::EPERM,
        CtlError::Again => libc::EAGAIN,
    }
}

//  Size, in bytes, of the C type of the values of `kind`.
fn c_size_of(kind: CtlKind) -> usize {
    match kind {
        CtlKind::Void => 0,
        CtlKind::Bool => mem::size_of::<bool>(),
        CtlKind::U32 => mem::size_of::<u32>(),
        CtlKind::U64 => mem::size_of::<u64>(),
        CtlKind::Size => mem::size_of::<usize>(),
        CtlKind::SSize => mem::size_of::<isize>(),
        CtlKind::Str => mem::size_of::<*const c_char>(),
    }
}

//  #   Safety
//
//  -   Same as `ar_mallctl`.
unsafe fn mallctl(name: &[u8], oldp: *mut c_void, oldlenp: *mut usize, newp: *const c_void, newlen: usize)
    -> Result<(), CtlError>
{
    let kind = CtlName::parse(name)?.kind();
    let size = c_size_of(kind);

    //  Actions neither produce nor consume a value.
    if kind == CtlKind::Void && (!oldp.is_null() || !newp.is_null()) {
        return Err(CtlError::Permission);
    }

    let new = if newp.is_null() {
        None
    } else {
        if newlen != size {
            return Err(CtlError::InvalidValue);
        }

        Some(read_value(kind, newp)?)
    };

    let old = ALLOCATOR.mallctl(name, new)?;

    if oldp.is_null() || oldlenp.is_null() {
        return Ok(());
    }

    //  On a size mismatch, copy as much as fits, and report the mismatch.
    let copied = core::cmp::min(*oldlenp, size);
    write_value(old, oldp as *mut u8, copied);

    if *oldlenp != size {
        *oldlenp = copied;
        return Err(CtlError::InvalidValue);
    }

    Ok(())
}

//  #   Safety
//
//  -   Assumes `newp` is valid for reads of the C type of `kind`.
unsafe fn read_value(kind: CtlKind, newp: *const c_void) -> Result<CtlValue<'static>, CtlError> {
    let value = match kind {
        CtlKind::Void => CtlValue::Void,
        CtlKind::Bool => CtlValue::Bool(ptr::read_unaligned(newp as *const u8) != 0),
        CtlKind::U32 => CtlValue::U32(ptr::read_unaligned(newp as *const u32)),
        CtlKind::U64 => CtlValue::U64(ptr::read_unaligned(newp as *const u64)),
        CtlKind::Size => CtlValue::Size(ptr::read_unaligned(newp as *const usize)),
        CtlKind::SSize => CtlValue::SSize(ptr::read_unaligned(newp as *const isize)),
        //  No string control is writable.
        CtlKind::Str => return Err(CtlError::Permission),
    };

    Ok(value)
}

//  #   Safety
//
//  -   Assumes `oldp` is valid for writes of `length` bytes.
unsafe fn write_value(value: CtlValue<'static>, oldp: *mut u8, length: usize) {
    let mut buffer = [0u8; 8];

    let bytes: &[u8] = match value {
        CtlValue::Void => &[],
        CtlValue::Bool(value) => { buffer[0] = value as u8; &buffer[..1] },
        CtlValue::U32(value) => { buffer[..4].copy_from_slice(&value.to_ne_bytes()); &buffer[..4] },
        CtlValue::U64(value) => { buffer.copy_from_slice(&value.to_ne_bytes()); &buffer[..] },
        CtlValue::Size(value) => {
            let bytes = value.to_ne_bytes();
            buffer[..bytes.len()].copy_from_slice(&bytes);
            &buffer[..bytes.len()]
        },
        CtlValue::SSize(value) => {
            let bytes = value.to_ne_bytes();
            buffer[..bytes.len()].copy_from_slice(&bytes);
            &buffer[..bytes.len()]
        },
        CtlValue::Str(value) => {
            let bytes = (value.as_ptr() as usize).to_ne_bytes();
            buffer[..bytes.len()].copy_from_slice(&bytes);
            &buffer[..bytes.len()]
        },
    };

    let length = core::cmp::min(length, bytes.len());
    ptr::copy_nonoverlapping(bytes.as_ptr(), oldp, length);
}

#[cfg(test)]
mod tests {

use super::*;

fn read<T: Default>(name: &[u8]) -> (c_int, T, usize) {
    let mut value = T::default();
    let mut length = mem::size_of::<T>();

    let result = unsafe {
        ar_mallctl(name.as_ptr() as *const c_char, &mut value as *mut T as *mut c_void, &mut length, ptr::null(), 0)
    };

    (result, value, length)
}

#[test]
fn mallctl_reads() {
    let (result, narenas, length) = read::<u32>(b"arenas.narenas\0");
    assert_eq!(0, result);
    assert!(narenas >= 1);
    assert_eq!(4, length);

    let (result, lg_chunk, _) = read::<usize>(b"opt.lg_chunk\0");
    assert_eq!(0, result);
    assert_eq!(22, lg_chunk);

    let (result, version, _) = read::<usize>(b"version\0");
    assert_eq!(0, result);

    let version = unsafe { CStr::from_ptr(version as *const c_char) };
    assert_eq!(env!("CARGO_PKG_VERSION").as_bytes(), version.to_bytes());
}

#[test]
fn mallctl_errors() {
    assert_eq!(libc::ENOENT, read::<u32>(b"arenas.nope\0").0);
    assert_eq!(libc::ENOENT, ar_mallctl_null_name());

    //  Size mismatch: as much as fits is copied.
    let (result, _, length) = read::<u16>(b"arenas.narenas\0");
    assert_eq!(libc::EINVAL, result);
    assert_eq!(2, length);

    //  Read-only.
    let lg_chunk = 20usize;
    let result = unsafe {
        ar_mallctl(b"opt.lg_chunk\0".as_ptr() as *const c_char, ptr::null_mut(), ptr::null_mut(),
            &lg_chunk as *const usize as *const c_void, mem::size_of::<usize>())
    };
    assert_eq!(libc::EPERM, result);

    //  Actions take no value.
    assert_eq!(libc::EPERM, read::<u32>(b"thread.tcache.flush\0").0);
}

fn ar_mallctl_null_name() -> c_int {
    unsafe { ar_mallctl(ptr::null(), ptr::null_mut(), ptr::null_mut(), ptr::null(), 0) }
}

#[test]
fn mallctl_thread_arena() {
    let (result, arena, _) = read::<u32>(b"thread.arena\0");
    assert_eq!(0, result);

    let target = arena;
    let mut old = u32::MAX;
    let mut length = mem::size_of::<u32>();

    let result = unsafe {
        ar_mallctl(b"thread.arena\0".as_ptr() as *const c_char, &mut old as *mut u32 as *mut c_void, &mut length,
            &target as *const u32 as *const c_void, mem::size_of::<u32>())
    };

    assert_eq!(0, result);
    assert_eq!(arena, old);
}

#[test]
fn allocation_round_trip() {
    let pointer = ar_malloc(100);
    assert!(!pointer.is_null());
    assert_eq!(112, unsafe { ar_malloc_usable_size(pointer) });

    let pointer = unsafe { ar_realloc(pointer, 1000) };
    assert!(!pointer.is_null());
    assert_eq!(1024, unsafe { ar_sallocx(pointer, 0) });

    unsafe { ar_free(pointer) };

    let mut aligned = ptr::null_mut();
    assert_eq!(libc::EINVAL, unsafe { ar_posix_memalign(&mut aligned, 3, 16) });
    assert_eq!(0, unsafe { ar_posix_memalign(&mut aligned, 256, 16) });
    assert_eq!(0, aligned as usize % 256);

    unsafe { ar_sdallocx(aligned, 16, MallocxFlags::lg_align(8).bits()) };
}

}
