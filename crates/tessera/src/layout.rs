//! Allocation granularity and size rounding policy.
//!
//! Every distinct piece of a multi-node array occupies a whole number of
//! allocation units, where the unit is the largest applicable of the page
//! size, the OS virtual-allocation granularity, and (in large-page mode)
//! the large-page minimum. Sizes round to the *nearest* unit, half up, so
//! a piece smaller than half a unit legitimately rounds to zero; the
//! multi-node engine extends the final piece to cover any shortfall.

use std::sync::OnceLock;

use crate::os;

/// Aggregate request size at or above which large pages are enabled
/// automatically (1 MiB).
pub const LARGE_PAGE_THRESHOLD: usize = 1_048_576;

/// Returns the allocation unit size for the given page regime.
///
/// Values are queried from the OS once and cached for the process lifetime.
#[must_use]
pub fn granularity(large_pages: bool) -> usize {
    static ORDINARY: OnceLock<usize> = OnceLock::new();
    static LARGE: OnceLock<usize> = OnceLock::new();

    if large_pages {
        *LARGE.get_or_init(|| os::granularity(true))
    } else {
        *ORDINARY.get_or_init(|| os::granularity(false))
    }
}

/// Rounds `unrounded` to the nearest multiple of the current allocation
/// unit, half up.
#[must_use]
pub fn round_size(unrounded: usize, large_pages: bool) -> usize {
    round_to(unrounded, granularity(large_pages))
}

/// Rounds `unrounded` to the nearest multiple of `unit`, half up.
///
/// An input below `unit / 2` rounds to zero. This is a legal intermediate
/// for multi-node planning, not a valid allocation size on its own.
#[must_use]
pub fn round_to(unrounded: usize, unit: usize) -> usize {
    let quotient = unrounded / unit;
    let remainder = unrounded % unit;

    if remainder >= unit / 2 {
        unit * (quotient + 1)
    } else {
        unit * quotient
    }
}

/// Whether a request of `size` bytes should automatically switch to large
/// pages.
#[must_use]
pub fn auto_large_pages(size: usize) -> bool {
    size >= LARGE_PAGE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: usize = 4096;

    #[test]
    fn round_exact_multiple_is_unchanged() {
        assert_eq!(round_to(0, UNIT), 0);
        assert_eq!(round_to(4096, UNIT), 4096);
        assert_eq!(round_to(8192, UNIT), 8192);
    }

    #[test]
    fn round_half_up_tie() {
        // Exactly half a unit rounds up.
        assert_eq!(round_to(2048, UNIT), 4096);
        assert_eq!(round_to(4096 + 2048, UNIT), 8192);
    }

    #[test]
    fn round_below_half_goes_down() {
        assert_eq!(round_to(2047, UNIT), 0);
        assert_eq!(round_to(4096 + 2047, UNIT), 4096);
    }

    #[test]
    fn round_is_idempotent() {
        for size in [0, 1, 2047, 2048, 4095, 4096, 6000, 10_000, 1 << 20] {
            let once = round_to(size, UNIT);
            assert_eq!(round_to(once, UNIT), once, "size {size}");
        }
    }

    #[test]
    fn auto_large_page_boundary() {
        assert!(!auto_large_pages(LARGE_PAGE_THRESHOLD - 1));
        assert!(auto_large_pages(LARGE_PAGE_THRESHOLD));
        assert!(auto_large_pages(LARGE_PAGE_THRESHOLD + 1));
    }

    #[test]
    fn granularity_is_positive_and_stable() {
        let g = granularity(false);
        assert!(g > 0);
        assert_eq!(granularity(false), g);
        // Large-page units are never smaller than ordinary units.
        assert!(granularity(true) >= g);
    }

    #[test]
    fn rounded_sizes_are_unit_multiples() {
        let g = granularity(false);
        for size in [1, g / 2, g, g + 1, 3 * g - 1] {
            assert_eq!(round_size(size, false) % g, 0);
        }
    }
}
