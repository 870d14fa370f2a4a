//! Layout of an arena chunk.
//!
//! An arena chunk starts with a `ChunkHeader`, immediately followed by one `PageEntry` per page of the chunk. The
//! header and map occupy the first `map_bias` pages, the remaining pages are carved into runs:
//!
//! -   A small run is a sequence of pages holding regions of identical size. All its pages refer to its first page,
//!     whose entry holds the state of the run.
//! -   A large run is a sequence of pages holding a single allocation. All its pages refer to its first page, whose
//!     entry holds the length of the run.
//!
//! Any pointer within a chunk can thus be mapped back to its header by masking, and to its run in O(1).

use core::{mem, ptr::{self, NonNull}};

use crate::{BinIndex, PowerOf2, PAGE};
use crate::internals::arena::Arena;

/// State of a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum PageState {
    /// Unused.
    Free = 0,
    /// Part of the chunk header.
    Header,
    /// Part of a small run.
    Small,
    /// Part of a large run.
    Large,
}

/// Entry of the page map.
///
/// Only the entry of the first page of a run is authoritative, save for `state` and `run_page`.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct PageEntry {
    pub(crate) state: PageState,
    pub(crate) bin: u8,
    pub(crate) sampled: bool,
    pub(crate) run_page: u32,
    pub(crate) run_pages: u32,
    pub(crate) nfree: u32,
    pub(crate) next_region: u32,
    pub(crate) promoted: u32,
    pub(crate) free_list: *mut u8,
    pub(crate) next_run: *mut u8,
    pub(crate) prev_run: *mut u8,
}

impl PageEntry {
    pub(crate) const FREE: PageEntry = PageEntry {
        state: PageState::Free,
        bin: 0,
        sampled: false,
        run_page: 0,
        run_pages: 0,
        nfree: 0,
        next_region: 0,
        promoted: 0,
        free_list: ptr::null_mut(),
        next_run: ptr::null_mut(),
        prev_run: ptr::null_mut(),
    };

    /// Returns the bin of a small run.
    pub(crate) fn bin(&self) -> BinIndex {
        debug_assert_eq!(PageState::Small, self.state);

        //  `bin` is only ever set from a valid `BinIndex`.
        BinIndex::new(self.bin as usize).unwrap_or(BinIndex::SMALLEST)
    }
}

/// Header of an arena chunk.
#[repr(C)]
pub(crate) struct ChunkHeader {
    /// Owner.
    pub(crate) arena: *const Arena,
    /// Next chunk of the owner.
    pub(crate) next: *mut ChunkHeader,
    /// Previous chunk of the owner.
    pub(crate) prev: *mut ChunkHeader,
    /// Number of free pages.
    pub(crate) free_pages: usize,
}

/// Returns the number of pages occupied by the header and map of a chunk of size `chunk`.
pub(crate) const fn header_pages(chunk: PowerOf2) -> usize {
    let pages = chunk.value() / PAGE.value();
    let bytes = mem::size_of::<ChunkHeader>() + pages * mem::size_of::<PageEntry>();

    PAGE.round_up(bytes) / PAGE.value()
}

/// Returns the base of the chunk containing `pointer`.
pub(crate) fn chunk_base(pointer: NonNull<u8>, chunk: PowerOf2) -> usize { chunk.round_down(pointer.as_ptr() as usize) }

/// Returns whether `pointer` is the base of a chunk, that is a huge allocation.
pub(crate) fn is_chunk_aligned(pointer: NonNull<u8>, chunk: PowerOf2) -> bool {
    chunk.is_aligned(pointer.as_ptr() as usize)
}

/// Returns the header of the chunk containing `pointer`.
///
/// #   Safety
///
/// -   Assumes that `pointer` is within an arena chunk.
pub(crate) unsafe fn header_of(pointer: NonNull<u8>, chunk: PowerOf2) -> NonNull<ChunkHeader> {
    NonNull::new_unchecked(chunk_base(pointer, chunk) as *mut ChunkHeader)
}

/// Returns the index of the page containing `pointer`, within its chunk.
pub(crate) fn page_of(pointer: *mut u8, chunk: PowerOf2) -> usize { (pointer as usize % chunk) / PAGE }

impl ChunkHeader {
    /// Initializes the header and map of a chunk.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `chunk_base` points to a writable chunk of `chunk` bytes.
    pub(crate) unsafe fn initialize(
        chunk_base: NonNull<u8>,
        chunk: PowerOf2,
        map_bias: usize,
        arena: *const Arena,
    )
        -> NonNull<ChunkHeader>
    {
        let pages = chunk.value() / PAGE.value();
        let header: NonNull<ChunkHeader> = chunk_base.cast();

        ptr::write(header.as_ptr(), ChunkHeader {
            arena,
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
            free_pages: pages - map_bias,
        });

        //  Recycled chunks carry a stale map.
        let map = Self::map(header);

        for page in 0..pages {
            let mut entry = PageEntry::FREE;

            if page < map_bias {
                entry.state = PageState::Header;
            }

            ptr::write(map.as_ptr().add(page), entry);
        }

        header
    }

    /// Returns the entry of `page`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `page` is within the chunk.
    pub(crate) unsafe fn entry<'a>(header: NonNull<ChunkHeader>, page: usize) -> &'a mut PageEntry {
        &mut *Self::map(header).as_ptr().add(page)
    }

    /// Returns a raw pointer to the entry of `page`, for reading fields without asserting exclusivity.
    pub(crate) fn entry_ptr(header: NonNull<ChunkHeader>, page: usize) -> *mut PageEntry {
        Self::map(header).as_ptr().wrapping_add(page)
    }

    /// Returns the address of `page`.
    pub(crate) fn page_address(header: NonNull<ChunkHeader>, page: usize) -> *mut u8 {
        (header.as_ptr() as usize + page * PAGE) as *mut u8
    }

    fn map(header: NonNull<ChunkHeader>) -> NonNull<PageEntry> {
        let map = header.as_ptr() as usize + mem::size_of::<ChunkHeader>();
        debug_assert!(map % mem::align_of::<PageEntry>() == 0);

        //  Safety:
        //  -   `header` is not null, and neither is anything after it.
        unsafe { NonNull::new_unchecked(map as *mut PageEntry) }
    }
}

#[cfg(test)]
mod tests {

use std::alloc::{self, Layout};

use super::*;

#[test]
fn header_pages_fit() {
    let small = PowerOf2::new(64 * 1024).unwrap();
    assert_eq!(1, header_pages(small));

    let default = PowerOf2::new(4 * 1024 * 1024).unwrap();
    let pages = header_pages(default);

    assert!(pages * PAGE.value() >= mem::size_of::<ChunkHeader>() + 1024 * mem::size_of::<PageEntry>());
    assert!((pages - 1) * PAGE.value() < mem::size_of::<ChunkHeader>() + 1024 * mem::size_of::<PageEntry>());
}

#[test]
fn initialize_and_lookup() {
    let chunk = PowerOf2::new(64 * 1024).unwrap();
    let layout = Layout::from_size_align(chunk.value(), chunk.value()).unwrap();

    unsafe {
        let base = NonNull::new(alloc::alloc(layout)).unwrap();
        ptr::write_bytes(base.as_ptr(), 0xff, chunk.value());

        let header = ChunkHeader::initialize(base, chunk, 1, ptr::null());

        assert_eq!(15, header.as_ref().free_pages);
        assert_eq!(PageState::Header, ChunkHeader::entry(header, 0).state);
        assert_eq!(PageState::Free, ChunkHeader::entry(header, 15).state);
        assert!(ChunkHeader::entry(header, 15).free_list.is_null());

        let interior = NonNull::new(base.as_ptr().add(3 * PAGE.value() + 17)).unwrap();

        assert_eq!(header, header_of(interior, chunk));
        assert_eq!(3, page_of(interior.as_ptr(), chunk));
        assert_eq!(base.as_ptr().add(3 * PAGE.value()), ChunkHeader::page_address(header, 3));
        assert!(is_chunk_aligned(base, chunk));
        assert!(!is_chunk_aligned(interior, chunk));

        alloc::dealloc(base.as_ptr(), layout);
    }
}

}
