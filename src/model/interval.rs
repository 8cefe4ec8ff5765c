use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A 0-based half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenInterval {
    pub start: u64,
    pub end: u64,
}

impl OpenInterval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "interval end before start");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Intersection of two intervals, `None` when they share no base.
    pub fn overlap(&self, other: &OpenInterval) -> Option<OpenInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(OpenInterval { start, end })
    }
}

impl fmt::Display for OpenInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Genomic coordinates: an [`OpenInterval`] on a named chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChromosomeInterval {
    pub chr: String,
    pub start: u64,
    pub end: u64,
}

impl ChromosomeInterval {
    pub fn new(chr: impl Into<String>, start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "interval end before start");
        Self {
            chr: chr.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn to_open_interval(&self) -> OpenInterval {
        OpenInterval::new(self.start, self.end)
    }

    pub fn overlap(&self, other: &ChromosomeInterval) -> Option<ChromosomeInterval> {
        if self.chr != other.chr {
            return None;
        }
        self.to_open_interval()
            .overlap(&other.to_open_interval())
            .map(|o| ChromosomeInterval::new(self.chr.clone(), o.start, o.end))
    }

    /// Merges overlapping or touching intervals per chromosome. The output is
    /// grouped by chromosome name and sorted by start within each group.
    pub fn merge_overlaps(intervals: &[ChromosomeInterval]) -> Vec<ChromosomeInterval> {
        let mut by_chr: BTreeMap<&str, Vec<&ChromosomeInterval>> = BTreeMap::new();
        for interval in intervals {
            by_chr.entry(interval.chr.as_str()).or_default().push(interval);
        }

        let mut merged = Vec::with_capacity(intervals.len());
        for (chr, mut group) in by_chr {
            group.sort_by_key(|i| i.start);
            let mut current = group[0].clone();
            for next in group.into_iter().skip(1) {
                if next.start <= current.end {
                    current.end = current.end.max(next.end);
                } else {
                    merged.push(current);
                    current = ChromosomeInterval::new(chr, next.start, next.end);
                }
            }
            merged.push(current);
        }
        merged
    }
}

impl fmt::Display for ChromosomeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_interval_overlap() {
        let a = OpenInterval::new(0, 10);
        assert_eq!(a.overlap(&OpenInterval::new(5, 20)), Some(OpenInterval::new(5, 10)));
        assert_eq!(a.overlap(&OpenInterval::new(10, 20)), None);
    }

    #[test]
    fn test_chromosome_overlap_requires_same_chr() {
        let a = ChromosomeInterval::new("chr1", 0, 100);
        assert!(a.overlap(&ChromosomeInterval::new("chr2", 0, 100)).is_none());
        assert_eq!(
            a.overlap(&ChromosomeInterval::new("chr1", 50, 150)),
            Some(ChromosomeInterval::new("chr1", 50, 100))
        );
    }

    #[test]
    fn test_merge_overlaps() {
        let merged = ChromosomeInterval::merge_overlaps(&[
            ChromosomeInterval::new("chr1", 50, 80),
            ChromosomeInterval::new("chr2", 0, 10),
            ChromosomeInterval::new("chr1", 0, 60),
            ChromosomeInterval::new("chr1", 100, 120),
        ]);
        assert_eq!(
            merged,
            vec![
                ChromosomeInterval::new("chr1", 0, 80),
                ChromosomeInterval::new("chr1", 100, 120),
                ChromosomeInterval::new("chr2", 0, 10),
            ]
        );
    }
}
