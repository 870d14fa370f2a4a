//! An integer guaranteed to be a PowerOf2.

use core::{mem, num, ops};

/// PowerOf2
///
/// An integral guaranteed to be non-zero and a power of 2.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PowerOf2(num::NonZeroUsize);

impl PowerOf2 {
    /// 1 as a PowerOf2 instance.
    //  Safety:
    //  -   1 is a power of 2.
    pub const ONE: PowerOf2 = unsafe { PowerOf2::new_unchecked(1) };

    /// Creates a new instance of PowerOf2.
    ///
    /// Or nothing if the value is not a power of 2.
    pub const fn new(value: usize) -> Option<PowerOf2> {
        if value.count_ones() == 1 {
            //  Safety:
            //  -   Value is a power of 2, as per the if check.
            Some(unsafe { PowerOf2::new_unchecked(value) })
        } else {
            None
        }
    }

    /// Creates a new instance of PowerOf2.
    ///
    /// #   Safety
    ///
    /// Assumes that the value is a power of 2.
    pub const unsafe fn new_unchecked(value: usize) -> PowerOf2 {
        //  Safety:
        //  -   A power of 2 cannot be 0.
        PowerOf2(num::NonZeroUsize::new_unchecked(value))
    }

    /// Creates `2^lg`, or nothing if it does not fit in a `usize`.
    pub const fn from_lg(lg: u32) -> Option<PowerOf2> {
        if lg >= usize::BITS {
            return None;
        }

        //  Safety:
        //  -   `lg < usize::BITS`, hence the shift yields a non-zero power of 2.
        Some(unsafe { PowerOf2::new_unchecked(1usize << lg) })
    }

    /// Creates a PowerOf2 matching the alignment of a type.
    pub const fn align_of<T>() -> PowerOf2 {
        //  Safety:
        //  -   Alignment is always a power of 2, and never 0.
        unsafe { PowerOf2::new_unchecked(mem::align_of::<T>()) }
    }

    /// Returns the inner value.
    pub const fn value(&self) -> usize { self.0.get() }

    /// Returns the base-2 logarithm of the value.
    pub const fn lg(&self) -> u32 { self.value().trailing_zeros() }

    /// Rounds the value up to the nearest higher multiple of `self`.
    ///
    /// The caller guarantees that the result does not overflow, see `checked_round_up` otherwise.
    pub const fn round_up(&self, n: usize) -> usize {
        let mask = self.mask();

        (n + mask) & !mask
    }

    /// Rounds the value up to the nearest higher multiple of `self`, or nothing on overflow.
    pub const fn checked_round_up(&self, n: usize) -> Option<usize> {
        match n.checked_add(self.mask()) {
            Some(n) => Some(n & !self.mask()),
            None => None,
        }
    }

    /// Rounds the value down to the nearest lower multiple of `self`.
    pub const fn round_down(&self, n: usize) -> usize { n & !self.mask() }

    /// Returns whether `n` is a multiple of `self`.
    pub const fn is_aligned(&self, n: usize) -> bool { n & self.mask() == 0 }

    const fn mask(&self) -> usize { self.value() - 1 }
}

impl ops::Div<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: PowerOf2) -> usize { self >> rhs.lg() }
}

impl ops::Mul<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn mul(self, rhs: PowerOf2) -> usize { self << rhs.lg() }
}

impl ops::Rem<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn rem(self, rhs: PowerOf2) -> usize { self & rhs.mask() }
}
