//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{ReassemblyPolicy, ZoomPercent};

/// Row at which an image of `height` rows is split.
///
/// TOP covers `[0, split_row)`, BOTTOM covers `[split_row, height)`. For odd
/// heights BOTTOM gets the extra row.
///
/// # Examples
/// ```
/// # use split_zoom::imaging::split_row;
/// assert_eq!(split_row(4), 2);
/// assert_eq!(split_row(5), 2);
/// ```
pub fn split_row(height: u32) -> u32 {
    height / 2
}

/// Heights of the TOP and BOTTOM halves, in that order.
pub fn half_heights(height: u32) -> (u32, u32) {
    let top = split_row(height);
    (top, height - top)
}

/// Calculate the output dimensions of a zoom.
///
/// Each edge is scaled by `percent / 100` with integer truncation, so a zoom
/// of 100 is always the identity. Computed in 64-bit to avoid overflow on
/// large zoom factors.
///
/// # Examples
/// ```
/// # use split_zoom::imaging::{zoom_dimensions, ZoomPercent};
/// let half = ZoomPercent::new(50).unwrap();
/// assert_eq!(zoom_dimensions((100, 100), half), (50, 50));
///
/// let odd = ZoomPercent::new(150).unwrap();
/// assert_eq!(zoom_dimensions((5, 3), odd), (7, 4));
/// ```
pub fn zoom_dimensions(source: (u32, u32), percent: ZoomPercent) -> (u32, u32) {
    let scale = |edge: u32| -> u32 {
        let scaled = u64::from(edge) * u64::from(percent.value()) / 100;
        u32::try_from(scaled).unwrap_or(u32::MAX)
    };
    (scale(source.0), scale(source.1))
}

/// Resolve the canvas width for composing two halves.
///
/// Returns `None` when the widths differ and the policy refuses to guess.
pub fn canvas_width(top_width: u32, bottom_width: u32, policy: ReassemblyPolicy) -> Option<u32> {
    if top_width == bottom_width {
        return Some(top_width);
    }
    match policy {
        ReassemblyPolicy::Reject => None,
        ReassemblyPolicy::Crop => Some(top_width.min(bottom_width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(value: u32) -> ZoomPercent {
        ZoomPercent::new(value).unwrap()
    }

    // =========================================================================
    // split_row / half_heights
    // =========================================================================

    #[test]
    fn split_even_height() {
        assert_eq!(half_heights(4), (2, 2));
    }

    #[test]
    fn split_odd_height_gives_bottom_the_extra_row() {
        assert_eq!(half_heights(5), (2, 3));
        assert_eq!(half_heights(1), (0, 1));
    }

    #[test]
    fn halves_always_sum_to_height() {
        for height in 0..200 {
            let (top, bottom) = half_heights(height);
            assert_eq!(top + bottom, height);
            assert_eq!(top, height / 2);
        }
    }

    // =========================================================================
    // zoom_dimensions
    // =========================================================================

    #[test]
    fn zoom_100_is_identity() {
        for dims in [(1, 1), (3, 7), (640, 480), (4095, 1)] {
            assert_eq!(zoom_dimensions(dims, pct(100)), dims);
        }
    }

    #[test]
    fn zoom_50_halves_square() {
        assert_eq!(zoom_dimensions((100, 100), pct(50)), (50, 50));
    }

    #[test]
    fn zoom_200_doubles() {
        assert_eq!(zoom_dimensions((4, 2), pct(200)), (8, 4));
    }

    #[test]
    fn zoom_truncates() {
        // 3 * 33 / 100 = 0.99 -> 0
        assert_eq!(zoom_dimensions((3, 10), pct(33)), (0, 3));
    }

    #[test]
    fn zoom_large_factor_does_not_overflow() {
        let (w, h) = zoom_dimensions((u32::MAX, 1), pct(1000));
        assert_eq!(w, u32::MAX);
        assert_eq!(h, 10);
    }

    // =========================================================================
    // canvas_width
    // =========================================================================

    #[test]
    fn canvas_width_matching() {
        assert_eq!(canvas_width(8, 8, ReassemblyPolicy::Reject), Some(8));
        assert_eq!(canvas_width(8, 8, ReassemblyPolicy::Crop), Some(8));
    }

    #[test]
    fn canvas_width_mismatch_rejected() {
        assert_eq!(canvas_width(8, 9, ReassemblyPolicy::Reject), None);
    }

    #[test]
    fn canvas_width_mismatch_cropped_to_narrowest() {
        assert_eq!(canvas_width(8, 9, ReassemblyPolicy::Crop), Some(8));
        assert_eq!(canvas_width(10, 6, ReassemblyPolicy::Crop), Some(6));
    }
}
