//! Description of the size classes.
//!
//! Requests are rounded up to a size class, and serviced according to the category of that class:
//!
//! -   Small classes are quantum-spaced up to 128 bytes, then spaced 4 per doubling up to `SMALL_MAXCLASS`; they are
//!     carved out of runs of regions of identical size.
//! -   Large classes continue the 4 per doubling progression, starting at `LARGE_MINCLASS`, up to the largest class
//!     which fits in a chunk after its header; they are runs of pages.
//! -   Huge allocations are multiples of the chunk size, backed directly by chunks.

use crate::internals::chunk_map;
use crate::utils::lg_floor;

pub use crate::utils::PowerOf2;

/// Base-2 logarithm of the quantum, the minimum alignment of all allocations.
pub const LG_QUANTUM: u32 = 4;

/// The quantum, the minimum alignment of all allocations.
//  Safety:
//  -   16 is a power of 2.
pub const QUANTUM: PowerOf2 = unsafe { PowerOf2::new_unchecked(1 << LG_QUANTUM) };

/// Base-2 logarithm of the page size.
pub const LG_PAGE: u32 = 12;

/// The page size.
//  Safety:
//  -   4096 is a power of 2.
pub const PAGE: PowerOf2 = unsafe { PowerOf2::new_unchecked(1 << LG_PAGE) };

/// The largest small class.
pub const SMALL_MAXCLASS: usize = 14336;

/// The smallest large class, used to promote sampled small allocations.
pub const LARGE_MINCLASS: usize = 16384;

/// The number of small classes.
pub const NBINS: usize = 35;

/// The smallest accepted chunk size exponent.
pub const LG_CHUNK_MIN: u32 = LG_PAGE + 4;

/// The largest accepted chunk size exponent.
pub const LG_CHUNK_MAX: u32 = 30;

/// The default chunk size exponent, 4 MB.
pub const LG_CHUNK_DEFAULT: u32 = 22;

//  Classes up to this size are quantum-spaced.
const LOOKUP_MAXCLASS: usize = 128;

/// Category of an allocation, depending on its usable size.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    /// Region of a run, possibly cached per thread.
    Small,
    /// Run of pages, within a chunk.
    Large,
    /// One or more dedicated chunks.
    Huge,
}

/// Index of a small class.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BinIndex(u8);

impl BinIndex {
    /// The index of the smallest class.
    pub const SMALLEST: BinIndex = BinIndex(0);

    /// Returns the index of the small class `size` rounds up to, if small.
    pub const fn from_size(size: usize) -> Option<BinIndex> {
        if size == 0 || size > SMALL_MAXCLASS {
            return None;
        }

        if size <= LOOKUP_MAXCLASS {
            return Some(BinIndex(((size + QUANTUM.value() - 1) / QUANTUM.value() - 1) as u8));
        }

        let x = size - 1;
        let lg = lg_floor(x);
        let group = (lg - 7) as usize;
        let step = (x - (1 << lg)) >> (lg - 2);

        Some(BinIndex((8 + group * 4 + step) as u8))
    }

    /// Creates an index from its value, if in range.
    pub const fn new(value: usize) -> Option<BinIndex> {
        if value < NBINS { Some(BinIndex(value as u8)) } else { None }
    }

    /// Returns the inner value.
    pub const fn value(&self) -> usize { self.0 as usize }

    /// Returns the size of the class.
    pub const fn size(&self) -> usize {
        let index = self.value();

        if index < 8 {
            return (index + 1) * QUANTUM.value();
        }

        let lg = 7 + (index - 8) / 4;
        let step = (index - 8) % 4 + 1;

        (1 << lg) + step * (1 << (lg - 2))
    }
}

/// Rounds `size` up to the nearest class, regardless of category.
///
/// `size` is assumed to be no greater than the largest large class.
pub const fn class_ceiling(size: usize) -> usize {
    if size <= LOOKUP_MAXCLASS {
        return if size == 0 { QUANTUM.value() } else { QUANTUM.round_up(size) };
    }

    let x = size - 1;
    let delta_mask = (1usize << (lg_floor(x) - 2)) - 1;

    (x | delta_mask) + 1
}

/// Rounds `size` down to the nearest class, regardless of category.
///
/// `size` is assumed to be at least `QUANTUM`.
pub const fn class_floor(size: usize) -> usize {
    if size <= LOOKUP_MAXCLASS {
        return QUANTUM.round_down(size);
    }

    let delta_mask = (1usize << (lg_floor(size) - 2)) - 1;

    size & !delta_mask
}

/// Size classes, as determined by the chunk size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SizeClasses {
    chunk: PowerOf2,
    map_bias: usize,
    large_maxclass: usize,
}

impl SizeClasses {
    /// The size classes for the default chunk size.
    pub const DEFAULT: SizeClasses = match SizeClasses::new(LG_CHUNK_DEFAULT) {
        Some(classes) => classes,
        None => panic!("Invalid default chunk size"),
    };

    /// Creates the size classes for chunks of `2^lg_chunk` bytes, if in `[LG_CHUNK_MIN, LG_CHUNK_MAX]`.
    pub const fn new(lg_chunk: u32) -> Option<SizeClasses> {
        if lg_chunk < LG_CHUNK_MIN || lg_chunk > LG_CHUNK_MAX {
            return None;
        }

        let chunk = match PowerOf2::from_lg(lg_chunk) {
            Some(chunk) => chunk,
            None => return None,
        };

        let map_bias = chunk_map::header_pages(chunk);
        let large_maxclass = class_floor(chunk.value() - map_bias * PAGE.value());

        Some(SizeClasses { chunk, map_bias, large_maxclass })
    }

    /// Returns the chunk size.
    pub const fn chunk_size(&self) -> PowerOf2 { self.chunk }

    /// Returns the number of pages reserved at the start of each arena chunk for its header.
    pub const fn map_bias(&self) -> usize { self.map_bias }

    /// Returns the largest large class.
    pub const fn large_maxclass(&self) -> usize { self.large_maxclass }

    /// Returns the category of `usable`, a usable size.
    pub const fn category(&self, usable: usize) -> Category {
        if usable <= SMALL_MAXCLASS {
            Category::Small
        } else if usable <= self.large_maxclass {
            Category::Large
        } else {
            Category::Huge
        }
    }

    /// Rounds `size` up to a multiple of the chunk size, or nothing on overflow.
    pub const fn chunk_ceiling(&self, size: usize) -> Option<usize> { self.chunk.checked_round_up(size) }

    /// Returns the usable size of an allocation of `size` bytes, or 0 on overflow.
    pub const fn s2u(&self, size: usize) -> usize {
        if size <= self.large_maxclass {
            return class_ceiling(size);
        }

        match self.chunk_ceiling(size) {
            Some(usable) => usable,
            None => 0,
        }
    }

    /// Returns the usable size of an allocation of `size` bytes aligned on `alignment`, or 0 on overflow.
    pub const fn sa2u(&self, size: usize, alignment: PowerOf2) -> usize {
        //  Small classes are multiples of any alignment they were rounded up to, and runs are page-aligned.
        if alignment.value() <= PAGE.value() {
            match alignment.checked_round_up(size) {
                Some(rounded) if rounded <= SMALL_MAXCLASS => return class_ceiling(rounded),
                Some(_) => (),
                None => return 0,
            }
        }

        if alignment.value() < self.chunk.value() && size <= self.large_maxclass {
            let usable = class_ceiling(if size < LARGE_MINCLASS { LARGE_MINCLASS } else { size });
            let slack = if alignment.value() > PAGE.value() { alignment.value() - PAGE.value() } else { 0 };

            if usable + slack <= self.large_maxclass {
                return usable;
            }
        }

        let usable = match self.chunk_ceiling(size) {
            Some(usable) => usable,
            None => return 0,
        };

        //  Over-allocating by `alignment` must remain within the bounds of a `Layout`.
        match usable.checked_add(alignment.value()) {
            Some(total) if total <= isize::MAX as usize => usable,
            _ => 0,
        }
    }
}

impl Default for SizeClasses {
    fn default() -> Self { Self::DEFAULT }
}

#[cfg(test)]
mod tests {

use super::*;

fn pow2(value: usize) -> PowerOf2 { PowerOf2::new(value).expect("Power of 2") }

#[test]
fn bin_index_covers_small_classes() {
    let sizes: Vec<usize> = (0..NBINS).map(|i| BinIndex::new(i).unwrap().size()).collect();

    assert_eq!(&[16, 32, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320], &sizes[..13]);
    assert_eq!(SMALL_MAXCLASS, *sizes.last().unwrap());

    for (index, size) in sizes.iter().enumerate() {
        assert_eq!(Some(index), BinIndex::from_size(*size).map(|b| b.value()), "{}", size);

        if index > 0 {
            let previous = sizes[index - 1];
            assert_eq!(Some(index), BinIndex::from_size(previous + 1).map(|b| b.value()), "{}", size);
        }
    }

    assert_eq!(None, BinIndex::from_size(0));
    assert_eq!(None, BinIndex::from_size(SMALL_MAXCLASS + 1));
    assert_eq!(None, BinIndex::new(NBINS));
}

#[test]
fn class_ceiling_rounds_up() {
    assert_eq!(16, class_ceiling(0));
    assert_eq!(16, class_ceiling(1));
    assert_eq!(128, class_ceiling(113));
    assert_eq!(160, class_ceiling(129));
    assert_eq!(320, class_ceiling(257));
    assert_eq!(SMALL_MAXCLASS, class_ceiling(12289));
    assert_eq!(LARGE_MINCLASS, class_ceiling(SMALL_MAXCLASS + 1));
    assert_eq!(20480, class_ceiling(16385));
}

#[test]
fn class_floor_rounds_down() {
    assert_eq!(16, class_floor(31));
    assert_eq!(128, class_floor(159));
    assert_eq!(160, class_floor(191));
    assert_eq!(3 * 1024 * 1024 + 512 * 1024, class_floor(4 * 1024 * 1024 - 36 * 1024));
}

#[test]
fn size_classes_bounds() {
    assert!(SizeClasses::new(LG_CHUNK_MIN - 1).is_none());
    assert!(SizeClasses::new(LG_CHUNK_MAX + 1).is_none());

    for lg_chunk in LG_CHUNK_MIN..=LG_CHUNK_MAX {
        let classes = SizeClasses::new(lg_chunk).unwrap();

        assert!(classes.large_maxclass() >= LARGE_MINCLASS, "{}", lg_chunk);
        assert!(classes.large_maxclass() + classes.map_bias() * PAGE.value() <= classes.chunk_size().value());
        assert_eq!(classes.large_maxclass(), class_ceiling(classes.large_maxclass()));
    }
}

#[test]
fn s2u_is_idempotent_and_sufficient() {
    let classes = SizeClasses::DEFAULT;

    let mut size = 1;
    while size < 64 * 1024 * 1024 {
        for candidate in &[size, size + 1, size * 3 / 2] {
            let usable = classes.s2u(*candidate);

            assert!(usable >= *candidate, "{} -> {}", candidate, usable);
            assert_eq!(usable, classes.s2u(usable), "{}", candidate);
        }

        size *= 2;
    }

    assert_eq!(0, classes.s2u(usize::MAX));
    assert_eq!(8 * 1024 * 1024, classes.s2u(classes.large_maxclass() + 1 + 4 * 1024 * 1024));
}

#[test]
fn category_boundaries() {
    let classes = SizeClasses::DEFAULT;

    assert_eq!(Category::Small, classes.category(SMALL_MAXCLASS));
    assert_eq!(Category::Large, classes.category(LARGE_MINCLASS));
    assert_eq!(Category::Large, classes.category(classes.large_maxclass()));
    assert_eq!(Category::Huge, classes.category(classes.large_maxclass() + 1));
}

#[test]
fn sa2u_honours_alignment() {
    let classes = SizeClasses::DEFAULT;

    assert_eq!(128, classes.sa2u(100, pow2(64)));
    assert_eq!(192, classes.sa2u(129, pow2(64)));
    assert_eq!(4096, classes.sa2u(1, pow2(4096)));
    assert_eq!(LARGE_MINCLASS, classes.sa2u(SMALL_MAXCLASS, pow2(4096)));
    assert_eq!(LARGE_MINCLASS, classes.sa2u(16, pow2(8192)));
    assert_eq!(4 * 1024 * 1024, classes.sa2u(16, pow2(4 * 1024 * 1024)));
    assert_eq!(0, classes.sa2u(usize::MAX - 8, pow2(16)));

    //  Alignments beyond what a `Layout` can describe.
    assert_eq!(0, classes.sa2u(1, pow2(1 << 63)));
    assert_eq!(4 * 1024 * 1024, classes.sa2u(1, pow2(1 << 40)));

    //  Every small result is a multiple of the requested alignment.
    for lg in 0..=LG_PAGE {
        let alignment = pow2(1 << lg);

        for size in (1..SMALL_MAXCLASS).step_by(97) {
            let usable = classes.sa2u(size, alignment);

            assert!(usable >= size);
            if usable <= SMALL_MAXCLASS {
                assert!(alignment.is_aligned(usable), "{} @ {} -> {}", size, alignment.value(), usable);
            }
        }
    }
}

}
