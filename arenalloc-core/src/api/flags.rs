//! Flags of the extended allocation API.
//!
//! The flags are a bitfield:
//!
//! -   Bits 0 to 5: base-2 logarithm of the requested alignment, 0 for none.
//! -   Bit 6: zero-fill.
//! -   Bits 8 and above: explicit arena index, plus 1, 0 for none.

use core::ops;

use crate::{AllocError, PowerOf2};

const LG_ALIGN_MASK: i32 = 0x3f;
const ZERO: i32 = 0x40;
const ARENA_SHIFT: u32 = 8;

/// Flags of the extended allocation API, as passed by the caller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct MallocxFlags(i32);

impl MallocxFlags {
    /// No flags.
    pub const NONE: MallocxFlags = MallocxFlags(0);

    /// Zero-fill the allocation.
    pub const ZERO: MallocxFlags = MallocxFlags(ZERO);

    /// Creates an instance from raw bits.
    pub const fn from_bits(bits: i32) -> Self { Self(bits) }

    /// Returns the raw bits.
    pub const fn bits(&self) -> i32 { self.0 }

    /// Requests an alignment of `2^lg`.
    pub const fn lg_align(lg: u32) -> Self { Self(lg as i32 & LG_ALIGN_MASK) }

    /// Requests an alignment of `alignment`.
    pub const fn align(alignment: PowerOf2) -> Self { Self::lg_align(alignment.lg()) }

    /// Requests arena `index`.
    pub const fn arena(index: u32) -> Self { Self(((index as i32) + 1) << ARENA_SHIFT) }

    /// Decodes the flags.
    ///
    /// Fails with `InvalidArgument` if the requested alignment exceeds `isize::MAX`, the bound of a `Layout`.
    #[inline(always)]
    pub fn decode(&self) -> Result<Request, AllocError> {
        if self.0 == 0 {
            return Ok(Request::DEFAULT);
        }

        self.decode_hard()
    }

    #[cold]
    fn decode_hard(&self) -> Result<Request, AllocError> {
        let lg_align = (self.0 & LG_ALIGN_MASK) as u32;

        let alignment = if lg_align == 0 {
            None
        } else {
            let alignment = PowerOf2::from_lg(lg_align).filter(|a| a.value() <= isize::MAX as usize);

            Some(alignment.ok_or(AllocError::InvalidArgument)?)
        };

        let arena = match (self.0 as u32) >> ARENA_SHIFT {
            0 => None,
            n => Some(n as usize - 1),
        };

        Ok(Request { alignment, zero: self.0 & ZERO != 0, arena, tcache: arena.is_none() })
    }
}

impl ops::BitOr for MallocxFlags {
    type Output = MallocxFlags;

    fn bitor(self, rhs: MallocxFlags) -> MallocxFlags { MallocxFlags(self.0 | rhs.0) }
}

/// Decoded flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Request {
    /// Explicit alignment, if any.
    pub alignment: Option<PowerOf2>,
    /// Whether to zero-fill.
    pub zero: bool,
    /// Explicit arena, if any.
    pub arena: Option<usize>,
    /// Whether the thread cache may be used.
    pub tcache: bool,
}

impl Request {
    /// The request of an empty set of flags.
    pub const DEFAULT: Request = Request { alignment: None, zero: false, arena: None, tcache: true };
}

impl Default for Request {
    fn default() -> Self { Self::DEFAULT }
}
