use super::context::NavigationContext;
use super::interval::{ChromosomeInterval, OpenInterval};
use super::segment::SegmentInterval;
use crate::{Error, Result};
use std::sync::Arc;

pub const DEFAULT_MIN_REGION_WIDTH: u64 = 10;

/// The visible window `[start, end)` over a [`NavigationContext`].
///
/// Every mutation keeps `0 <= start < end <= total_length` and
/// `end - start >= min(min_width, total_length)`. Clones are independent
/// values; compare [`revision`](Self::revision) to detect changes.
#[derive(Debug, Clone)]
pub struct DisplayedRegionModel {
    context: Arc<NavigationContext>,
    start: u64,
    end: u64,
    min_width: u64,
    revision: u64,
}

impl DisplayedRegionModel {
    /// A region covering the whole axis.
    pub fn new(context: Arc<NavigationContext>, min_width: u64) -> Self {
        let end = context.total_length();
        Self {
            context,
            start: 0,
            end,
            min_width,
            revision: 0,
        }
    }

    pub fn with_region(
        context: Arc<NavigationContext>,
        min_width: u64,
        start: i64,
        end: i64,
    ) -> Self {
        let mut region = Self::new(context, min_width);
        region.set_region(start, end);
        region
    }

    pub fn context(&self) -> &Arc<NavigationContext> {
        &self.context
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn width(&self) -> u64 {
        self.end - self.start
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn absolute_region(&self) -> OpenInterval {
        OpenInterval::new(self.start, self.end)
    }

    /// Minimum width actually enforced: an axis narrower than the configured
    /// minimum can only be shown whole.
    pub fn effective_min_width(&self) -> u64 {
        self.min_width.min(self.context.total_length())
    }

    pub fn same_axis(&self, other: &DisplayedRegionModel) -> bool {
        NavigationContext::same_axis(&self.context, &other.context)
    }

    /// Sets the region, sliding it back inside the axis if it hangs off an
    /// edge. Returns `false` and leaves the region untouched when the
    /// requested width is under the minimum.
    pub fn set_region(&mut self, start: i64, end: i64) -> bool {
        let Some(width) = end.checked_sub(start) else {
            return false;
        };
        if width < 0 || (width as u64) < self.effective_min_width() {
            return false;
        }
        self.apply(start as f64, end as f64);
        true
    }

    pub fn pan(&mut self, delta: i64) {
        let start = self.start as f64 + delta as f64;
        let end = self.end as f64 + delta as f64;
        self.apply(start, end);
    }

    /// Multiplies the width by `factor` keeping the base at `focus` (a fraction
    /// of the width from the left edge) fixed on screen.
    pub fn zoom(&mut self, factor: f64, focus: f64) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "zoom factor must be positive, got {}",
                factor
            )));
        }
        if !focus.is_finite() {
            return Err(Error::InvalidInput("zoom focus must be finite".to_string()));
        }
        self.scale(factor, focus);
        Ok(())
    }

    /// [`zoom`](Self::zoom) for a factor already known to be positive and a
    /// finite focus.
    pub(crate) fn scale(&mut self, factor: f64, focus: f64) {
        let width = self.width() as f64;
        let total = self.context.total_length() as f64;
        let new_width = (width * factor).clamp(self.effective_min_width() as f64, total);
        let pivot = self.start as f64 + focus * width;
        let new_start = pivot - focus * new_width;
        self.apply(new_start, new_start + new_width);
    }

    fn apply(&mut self, start: f64, end: f64) {
        let total = self.context.total_length();
        let width = ((end - start).round() as u64).clamp(self.effective_min_width().max(1), total);
        let max_start = total - width;
        let start = if start <= 0.0 {
            0
        } else {
            (start.round() as u64).min(max_start)
        };
        self.start = start;
        self.end = start + width;
        self.revision += 1;
    }

    pub fn segment_intervals(&self) -> Vec<SegmentInterval<'_>> {
        self.context.segments_in_interval(self.start, self.end)
    }

    /// Genomic loci currently displayed, merged and gap-free.
    pub fn genome_intervals(&self) -> Vec<ChromosomeInterval> {
        self.context.loci_in_interval(self.start, self.end)
    }
}
