use super::region::DisplayedRegionModel;
use serde::Serialize;

/// Widens a view region so that data just off screen is fetched ahead of a
/// scroll.
#[derive(Debug, Clone, Copy)]
pub struct RegionExpander {
    multiple_on_each_side: f64,
}

/// Pixel geometry of an expanded view. `expanded_width` equals the original
/// width plus both extra margins; the original view sits at `view_window`.
#[derive(Debug, Clone)]
pub struct ExpansionData {
    pub expanded_width: f64,
    pub expanded_region: DisplayedRegionModel,
    pub left_extra_pixels: f64,
    pub right_extra_pixels: f64,
    pub view_window: ViewWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewWindow {
    pub start: f64,
    pub end: f64,
}

impl Default for RegionExpander {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RegionExpander {
    pub fn new(multiple_on_each_side: f64) -> Self {
        Self {
            multiple_on_each_side: multiple_on_each_side.max(0.0),
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0)
    }

    pub fn zoom_ratio(&self) -> f64 {
        2.0 * self.multiple_on_each_side + 1.0
    }

    /// A copy of `region` zoomed out by [`zoom_ratio`](Self::zoom_ratio). The
    /// input is left untouched.
    pub fn expanded_region(&self, region: &DisplayedRegionModel) -> DisplayedRegionModel {
        let mut expanded = region.clone();
        expanded.scale(self.zoom_ratio(), 0.5);
        expanded
    }

    pub fn calculate_expansion(&self, width_px: f64, region: &DisplayedRegionModel) -> ExpansionData {
        let pixels_per_base = width_px / region.width() as f64;
        let expanded_region = self.expanded_region(region);
        let expanded_width = expanded_region.width() as f64 * pixels_per_base;

        let left_bases = region.start() - expanded_region.start();
        let right_bases = expanded_region.end() - region.end();
        let left_extra_pixels = left_bases as f64 * pixels_per_base;
        let right_extra_pixels = right_bases as f64 * pixels_per_base;

        ExpansionData {
            expanded_width,
            expanded_region,
            left_extra_pixels,
            right_extra_pixels,
            view_window: ViewWindow {
                start: left_extra_pixels,
                end: left_extra_pixels + width_px,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::context::NavigationContext;
    use crate::model::segment::Segment;
    use std::sync::Arc;

    fn region(start: i64, end: i64) -> DisplayedRegionModel {
        let context = NavigationContext::genome("g", vec![Segment::chromosome("chr1", 10_000)]).unwrap();
        DisplayedRegionModel::with_region(Arc::new(context), 10, start, end)
    }

    #[test]
    fn test_expansion_in_middle() {
        let data = RegionExpander::new(1.0).calculate_expansion(100.0, &region(5_000, 6_000));
        assert_eq!(data.expanded_region.start(), 4_000);
        assert_eq!(data.expanded_region.end(), 7_000);
        assert_eq!(data.expanded_width, 300.0);
        assert_eq!(data.view_window, ViewWindow { start: 100.0, end: 200.0 });
    }

    #[test]
    fn test_expansion_at_edge_stays_in_axis() {
        let data = RegionExpander::new(1.0).calculate_expansion(100.0, &region(0, 1_000));
        assert_eq!(data.expanded_region.start(), 0);
        assert_eq!(data.expanded_region.end(), 3_000);
        assert_eq!(data.left_extra_pixels, 0.0);
        assert_eq!(data.right_extra_pixels, 200.0);
    }

    #[test]
    fn test_identity_expander() {
        let original = region(100, 200);
        let data = RegionExpander::identity().calculate_expansion(50.0, &original);
        assert_eq!(data.expanded_region.absolute_region(), original.absolute_region());
        assert_eq!(data.expanded_width, 50.0);
    }

    #[test]
    fn test_unbounded_expansion_covers_axis() {
        let original = region(4_000, 5_000);
        let expanded = RegionExpander::new(f64::INFINITY).expanded_region(&original);
        assert_eq!(expanded.start(), 0);
        assert_eq!(expanded.end(), 10_000);
        assert_eq!(original.absolute_region().start, 4_000);
    }
}
