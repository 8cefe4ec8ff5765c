use super::interval::ChromosomeInterval;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
    #[default]
    #[serde(rename = ".")]
    Unknown,
}

impl Strand {
    pub fn from_char(c: char) -> Self {
        match c {
            '+' => Strand::Forward,
            '-' => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }
}

/// Where a segment comes from in the genome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locus {
    pub interval: ChromosomeInterval,
    pub strand: Strand,
}

/// One named, fixed-length piece of a navigation axis: a chromosome, a region
/// set member, or a synthetic gap with no genomic locus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    name: String,
    length: u64,
    locus: Option<Locus>,
}

impl Segment {
    /// A segment covering a genomic interval. `name` defaults to the interval
    /// text when `None`.
    pub fn new(name: Option<String>, interval: ChromosomeInterval, strand: Strand) -> Self {
        let name = name.unwrap_or_else(|| interval.to_string());
        Self {
            name,
            length: interval.len(),
            locus: Some(Locus { interval, strand }),
        }
    }

    /// A whole chromosome.
    pub fn chromosome(name: impl Into<String>, length: u64) -> Self {
        let name = name.into();
        let interval = ChromosomeInterval::new(name.clone(), 0, length);
        Self::new(Some(name), interval, Strand::Unknown)
    }

    /// Synthetic spacer without genomic coordinates.
    pub fn gap(length: u64) -> Self {
        Self {
            name: format!("{} gap", nice_bp_count(length)),
            length,
            locus: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn locus(&self) -> Option<&Locus> {
        self.locus.as_ref()
    }

    pub fn is_gap(&self) -> bool {
        self.locus.is_none()
    }

    /// Genomic coordinates of `[relative_start, relative_end)` within this
    /// segment. Gaps have none.
    pub fn genome_coordinates(
        &self,
        relative_start: u64,
        relative_end: u64,
    ) -> Option<ChromosomeInterval> {
        let locus = self.locus.as_ref()?;
        Some(ChromosomeInterval::new(
            locus.interval.chr.clone(),
            locus.interval.start + relative_start,
            locus.interval.start + relative_end,
        ))
    }

    /// Intersects this segment's locus with a genomic interval, returning the
    /// overlap as offsets relative to the segment start.
    pub fn relative_overlap(&self, interval: &ChromosomeInterval) -> Option<(u64, u64)> {
        let locus = self.locus.as_ref()?;
        let overlap = locus.interval.overlap(interval)?;
        Some((
            overlap.start - locus.interval.start,
            overlap.end - locus.interval.start,
        ))
    }
}

fn nice_bp_count(bases: u64) -> String {
    match bases {
        b if b >= 1_000_000 => format!("{:.1} Mb", b as f64 / 1_000_000.0),
        b if b >= 1_000 => format!("{:.1} kb", b as f64 / 1_000.0),
        b => format!("{} bp", b),
    }
}

/// A sub-interval of one segment, in offsets relative to the segment start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInterval<'a> {
    pub index: usize,
    pub segment: &'a Segment,
    pub relative_start: u64,
    pub relative_end: u64,
}

impl SegmentInterval<'_> {
    pub fn genome_coordinates(&self) -> Option<ChromosomeInterval> {
        self.segment
            .genome_coordinates(self.relative_start, self.relative_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_has_no_locus() {
        let gap = Segment::gap(2_500);
        assert!(gap.is_gap());
        assert_eq!(gap.name(), "2.5 kb gap");
        assert_eq!(gap.genome_coordinates(0, 10), None);
    }

    #[test]
    fn test_relative_overlap() {
        let segment = Segment::new(
            Some("f1".to_string()),
            ChromosomeInterval::new("chr2", 100, 200),
            Strand::Forward,
        );
        assert_eq!(
            segment.relative_overlap(&ChromosomeInterval::new("chr2", 150, 400)),
            Some((50, 100))
        );
        assert_eq!(
            segment.relative_overlap(&ChromosomeInterval::new("chr1", 150, 400)),
            None
        );
    }
}
