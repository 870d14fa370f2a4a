//! Debug fill patterns: junk, zero and redzones.

use core::ptr::NonNull;

use crate::{configuration::FILL, BinIndex, Platform};
use crate::internals::{context::Context, diagnostics::diagnostic};
use crate::utils;

/// Byte written over fresh allocations when junk filling.
pub(crate) const JUNK_ALLOC: u8 = 0xa5;

/// Byte written over freed allocations when junk filling.
pub(crate) const JUNK_FREE: u8 = 0x5a;

/// Byte written over redzones.
pub(crate) const REDZONE: u8 = 0xa5;

/// Prepares a fresh small region.
///
/// #   Safety
///
/// -   Assumes that `pointer` is a region of `bin`, exclusively owned by the caller.
pub(crate) unsafe fn alloc_small<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, bin: BinIndex, zero: bool) {
    let info = ctx.bins.get(bin);

    if FILL && info.redzone > 0 {
        utils::fill(before(pointer, info.redzone), info.redzone, REDZONE);
        utils::fill(after(pointer, info.reg_size), info.redzone, REDZONE);
    }

    alloc_body(ctx, pointer, info.reg_size, zero);
}

/// Prepares a fresh large run.
///
/// #   Safety
///
/// -   Assumes that `pointer` is a run of `usable` bytes, exclusively owned by the caller.
pub(crate) unsafe fn alloc_large<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, usable: usize, zero: bool) {
    alloc_body(ctx, pointer, usable, zero);
}

/// Checks and junks a small region about to be freed.
///
/// #   Safety
///
/// -   Assumes that `pointer` is a live region of `bin`, exclusively owned by the caller.
pub(crate) unsafe fn dalloc_small<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, bin: BinIndex) {
    if !FILL {
        return;
    }

    let info = ctx.bins.get(bin);

    if info.redzone > 0 {
        validate_redzone(ctx, pointer, before(pointer, info.redzone), info.redzone, info.reg_size, "before");
        validate_redzone(ctx, pointer, after(pointer, info.reg_size), info.redzone, info.reg_size, "after");
    }

    if ctx.options.junk {
        utils::fill(before(pointer, info.redzone), info.interval, JUNK_FREE);
    }
}

/// Junks a large run, or any other allocation, about to be freed.
///
/// #   Safety
///
/// -   Assumes that `pointer` is a live allocation of `usable` bytes, exclusively owned by the caller.
pub(crate) unsafe fn dalloc_large<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, usable: usize) {
    if FILL && ctx.options.junk {
        utils::fill(pointer, usable, JUNK_FREE);
    }
}

unsafe fn alloc_body<P: Platform>(ctx: &Context<'_, P>, pointer: NonNull<u8>, usable: usize, zero: bool) {
    if zero {
        utils::fill(pointer, usable, 0);
    } else if FILL && ctx.options.junk {
        utils::fill(pointer, usable, JUNK_ALLOC);
    }
}

#[cold]
unsafe fn validate_redzone<P: Platform>(
    ctx: &Context<'_, P>,
    pointer: NonNull<u8>,
    redzone: NonNull<u8>,
    length: usize,
    reg_size: usize,
    side: &str,
)
{
    if utils::is_filled_with(redzone, length, REDZONE) {
        return;
    }

    let bytes = core::slice::from_raw_parts(redzone.as_ptr(), length);

    for (offset, byte) in bytes.iter().enumerate().filter(|(_, byte)| **byte != REDZONE) {
        let distance = if side == "before" { length - offset } else { offset + 1 };

        diagnostic!(ctx.platform, "Corrupt redzone {} byte{} {} {:p} (size {}), byte={:#x}",
            distance, if distance == 1 { "" } else { "s" }, side, pointer.as_ptr(), reg_size, byte);
    }

    if ctx.options.abort {
        ctx.platform.abort();
    }
}

unsafe fn before(pointer: NonNull<u8>, redzone: usize) -> NonNull<u8> {
    NonNull::new_unchecked(pointer.as_ptr().sub(redzone))
}

unsafe fn after(pointer: NonNull<u8>, reg_size: usize) -> NonNull<u8> {
    NonNull::new_unchecked(pointer.as_ptr().add(reg_size))
}
