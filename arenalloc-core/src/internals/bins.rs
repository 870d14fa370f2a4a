//! Layout of the runs of each small class.

use crate::{BinIndex, NBINS, PAGE};

/// Maximum number of pages of a small run.
const RUN_MAX_PAGES: usize = 8;

/// Minimum number of regions a run aims for, if it fits within `RUN_MAX_PAGES`.
const RUN_MIN_REGIONS: usize = 8;

/// Minimum size of a redzone.
const REDZONE_MIN: usize = 16;

/// Layout of the runs of a small class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BinInfo {
    /// Size of a region, as seen by the user.
    pub(crate) reg_size: usize,
    /// Size of the redzone on either side of a region, 0 if disabled.
    pub(crate) redzone: usize,
    /// Distance between the starts of consecutive regions.
    pub(crate) interval: usize,
    /// Number of pages of a run.
    pub(crate) run_pages: usize,
    /// Number of regions of a run.
    pub(crate) nregs: usize,
}

impl BinInfo {
    /// Computes the layout of `bin`.
    pub(crate) const fn new(bin: BinIndex, redzone: bool) -> Self {
        let reg_size = bin.size();

        let redzone = if redzone {
            //  The redzone preserves the natural alignment of the region, up to a page.
            let natural = reg_size & reg_size.wrapping_neg();
            let natural = if natural < PAGE.value() { natural } else { PAGE.value() };

            if natural <= REDZONE_MIN { REDZONE_MIN } else { natural }
        } else {
            0
        };

        let interval = reg_size + 2 * redzone;

        let wanted = PAGE.round_up(interval * RUN_MIN_REGIONS) / PAGE.value();
        let run_pages = if wanted > RUN_MAX_PAGES { RUN_MAX_PAGES } else { wanted };

        let nregs = run_pages * PAGE.value() / interval;

        BinInfo { reg_size, redzone, interval, run_pages, nregs }
    }

    /// Returns the offset of region `index` within its run.
    pub(crate) const fn region_offset(&self, index: usize) -> usize { self.redzone + index * self.interval }

    /// Returns the index of the region at `offset` within its run.
    #[cfg(test)]
    pub(crate) const fn region_index(&self, offset: usize) -> usize { (offset - self.redzone) / self.interval }
}

/// Layout of the runs of all small classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BinInfos([BinInfo; NBINS]);

impl BinInfos {
    /// Computes the layout of all small classes.
    pub(crate) const fn new(redzone: bool) -> Self {
        let mut infos = [BinInfo::new(BinIndex::SMALLEST, redzone); NBINS];

        let mut index = 0;
        while index < NBINS {
            if let Some(bin) = BinIndex::new(index) {
                infos[index] = BinInfo::new(bin, redzone);
            }

            index += 1;
        }

        BinInfos(infos)
    }

    /// Returns the layout of `bin`.
    pub(crate) fn get(&self, bin: BinIndex) -> &BinInfo { &self.0[bin.value()] }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn bin_infos_without_redzone() {
    let infos = BinInfos::new(false);

    for index in 0..NBINS {
        let bin = BinIndex::new(index).unwrap();
        let info = infos.get(bin);

        assert_eq!(bin.size(), info.reg_size);
        assert_eq!(0, info.redzone);
        assert_eq!(info.reg_size, info.interval);
        assert!(info.nregs >= 1, "{:?}", info);
        assert!(info.nregs * info.interval <= info.run_pages * PAGE.value());
        assert!(info.run_pages <= RUN_MAX_PAGES);
    }

    let smallest = infos.get(BinIndex::SMALLEST);
    assert_eq!(1, smallest.run_pages);
    assert_eq!(256, smallest.nregs);
}

#[test]
fn bin_infos_with_redzone() {
    let infos = BinInfos::new(true);

    let smallest = infos.get(BinIndex::SMALLEST);
    assert_eq!(16, smallest.redzone);
    assert_eq!(48, smallest.interval);
    assert_eq!(16, smallest.region_offset(0));
    assert_eq!(64, smallest.region_offset(1));
    assert_eq!(1, smallest.region_index(64));

    let bin = BinIndex::from_size(256).unwrap();
    assert_eq!(256, infos.get(bin).redzone);

    let largest = infos.get(BinIndex::from_size(crate::SMALL_MAXCLASS).unwrap());
    assert_eq!(2048, largest.redzone);
    assert!(largest.nregs >= 1);
}

}
