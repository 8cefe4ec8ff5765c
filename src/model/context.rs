//! Linearization of ordered segments into one coordinate axis.
//!
//! A [`NavigationContext`] is everywhere a user could navigate to. It flattens
//! an ordered list of [`Segment`]s (chromosomes, gaps, region-set members) into
//! "context coordinates": base numbers starting at 0 and running to
//! [`NavigationContext::total_length`].
//!
//! Contexts are immutable and meant to be shared as `Arc<NavigationContext>`.
//! Two contexts are the same axis only if they are the same allocation; use
//! [`NavigationContext::same_axis`] rather than comparing contents.

use super::interval::{ChromosomeInterval, OpenInterval};
use super::segment::{Segment, SegmentInterval};
use crate::{Error, Result};
use noodles::core::Position;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of mapping a context coordinate into its segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCoordinate<'a> {
    pub index: usize,
    pub segment: &'a Segment,
    pub offset: u64,
}

#[derive(Debug)]
pub struct NavigationContext {
    name: String,
    segments: Vec<Segment>,
    starts: Vec<u64>,
    name_to_index: HashMap<String, usize>,
    chr_to_indices: HashMap<String, Vec<usize>>,
    total_length: u64,
    is_genome: bool,
}

impl NavigationContext {
    /// Builds a context. Non-gap segments must have non-empty, unique names and
    /// the total length must be positive.
    pub fn new(name: impl Into<String>, segments: Vec<Segment>) -> Result<Self> {
        Self::build(name.into(), segments, false)
    }

    /// Builds a context in which every segment is a whole chromosome appearing
    /// once. Genome interval mapping then skips the per-segment overlap scan.
    pub fn genome(name: impl Into<String>, segments: Vec<Segment>) -> Result<Self> {
        let all_whole_chromosomes = segments.iter().all(|s| {
            s.locus()
                .is_some_and(|l| l.interval.start == 0 && l.interval.chr == s.name())
        });
        if !all_whole_chromosomes {
            return Err(Error::InvalidInput(
                "genome contexts must consist of whole chromosomes".to_string(),
            ));
        }
        Self::build(name.into(), segments, true)
    }

    fn build(name: String, segments: Vec<Segment>, is_genome: bool) -> Result<Self> {
        let mut starts = Vec::with_capacity(segments.len());
        let mut name_to_index = HashMap::new();
        let mut chr_to_indices: HashMap<String, Vec<usize>> = HashMap::new();
        let mut total_length = 0u64;

        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_gap() {
                if segment.name().is_empty() {
                    return Err(Error::InvalidInput("all segments must have names".to_string()));
                }
                if name_to_index.insert(segment.name().to_string(), i).is_some() {
                    return Err(Error::InvalidInput(format!(
                        "duplicate segment name '{}'; names must be unique",
                        segment.name()
                    )));
                }
            }
            if let Some(locus) = segment.locus() {
                chr_to_indices
                    .entry(locus.interval.chr.clone())
                    .or_default()
                    .push(i);
            }
            starts.push(total_length);
            total_length += segment.len();
        }

        if total_length == 0 {
            return Err(Error::InvalidInput("context has 0 length".to_string()));
        }

        Ok(Self {
            name,
            segments,
            starts,
            name_to_index,
            chr_to_indices,
            total_length,
            is_genome,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn is_genome(&self) -> bool {
        self.is_genome
    }

    pub fn is_valid_coordinate(&self, x: u64) -> bool {
        x < self.total_length
    }

    /// Reference identity of two shared contexts.
    pub fn same_axis(a: &Arc<NavigationContext>, b: &Arc<NavigationContext>) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// Context coordinate of a segment's first base.
    pub fn segment_start(&self, index: usize) -> Option<u64> {
        self.starts.get(index).copied()
    }

    pub fn segment_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Finds the segment containing a context coordinate.
    pub fn map_to_segment(&self, x: u64) -> Result<SegmentCoordinate<'_>> {
        if !self.is_valid_coordinate(x) {
            return Err(Error::OutOfRange(format!(
                "coordinate {} outside context of length {}",
                x, self.total_length
            )));
        }
        // Last segment whose start is <= x. Empty segments share their start
        // with the following segment, so they are never selected.
        let index = self.starts.partition_point(|&start| start <= x) - 1;
        Ok(SegmentCoordinate {
            index,
            segment: &self.segments[index],
            offset: x - self.starts[index],
        })
    }

    /// Inverse of [`map_to_segment`](Self::map_to_segment) by segment name.
    /// `offset` may equal the segment length, addressing its end.
    pub fn segment_to_context(&self, name: &str, offset: u64) -> Result<u64> {
        let index = self
            .segment_index(name)
            .ok_or_else(|| Error::OutOfRange(format!("cannot find segment named '{}'", name)))?;
        self.index_to_context(index, offset)
    }

    pub fn index_to_context(&self, index: usize, offset: u64) -> Result<u64> {
        let segment = self
            .segments
            .get(index)
            .ok_or_else(|| Error::OutOfRange(format!("no segment at index {}", index)))?;
        if offset > segment.len() {
            return Err(Error::OutOfRange(format!(
                "base number {} not in segment '{}'",
                offset,
                segment.name()
            )));
        }
        Ok(self.starts[index] + offset)
    }

    /// Maps a genomic interval into this context. A chromosome may appear in
    /// several non-adjacent segments, so the result can hold zero or many
    /// intervals; they are sorted by start and never overlap.
    pub fn genome_interval_to_context_intervals(
        &self,
        interval: &ChromosomeInterval,
    ) -> Vec<OpenInterval> {
        let Some(indices) = self.chr_to_indices.get(&interval.chr) else {
            return Vec::new();
        };

        if self.is_genome {
            let index = indices[0];
            let length = self.segments[index].len();
            let start = interval.start.min(length);
            let end = interval.end.min(length);
            if start >= end {
                return Vec::new();
            }
            let offset = self.starts[index];
            return vec![OpenInterval::new(offset + start, offset + end)];
        }

        let mut result: Vec<OpenInterval> = indices
            .iter()
            .filter_map(|&index| {
                let (rel_start, rel_end) = self.segments[index].relative_overlap(interval)?;
                let offset = self.starts[index];
                Some(OpenInterval::new(offset + rel_start, offset + rel_end))
            })
            .collect();
        result.sort_by_key(|i| i.start);
        result
    }

    /// Segments overlapping `[start, end)` in context coordinates, with the
    /// overlap expressed relative to each segment.
    pub fn segments_in_interval(&self, start: u64, end: u64) -> Vec<SegmentInterval<'_>> {
        let end = end.min(self.total_length);
        if start >= end {
            return Vec::new();
        }
        let first = self.starts.partition_point(|&s| s <= start).saturating_sub(1);

        let mut result = Vec::new();
        for index in first..self.segments.len() {
            let seg_start = self.starts[index];
            if seg_start >= end {
                break;
            }
            let segment = &self.segments[index];
            let seg_end = seg_start + segment.len();
            let overlap_start = start.max(seg_start);
            let overlap_end = end.min(seg_end);
            if overlap_start < overlap_end {
                result.push(SegmentInterval {
                    index,
                    segment,
                    relative_start: overlap_start - seg_start,
                    relative_end: overlap_end - seg_start,
                });
            }
        }
        result
    }

    /// Genomic loci covered by `[start, end)`, merged so none overlap. Gaps
    /// contribute nothing.
    pub fn loci_in_interval(&self, start: u64, end: u64) -> Vec<ChromosomeInterval> {
        let loci: Vec<ChromosomeInterval> = self
            .segments_in_interval(start, end)
            .iter()
            .filter_map(SegmentInterval::genome_coordinates)
            .collect();
        if loci.is_empty() {
            return loci;
        }
        ChromosomeInterval::merge_overlaps(&loci)
    }

    /// Parses user-typed coordinates into a context interval.
    ///
    /// Accepted forms (named positions are 1-based and inclusive, as displayed):
    ///
    /// - `chr1:100-200` or `segment:100-200`
    /// - `seg1:100-seg2:200`, spanning segments
    /// - `chr1` or `segment`, the whole chromosome or segment
    /// - `1000-2000` or `1000 2000`, raw 0-based half-open context coordinates
    ///
    /// Errors are [`Error::InvalidRange`] with a message fit for display.
    pub fn parse(&self, text: &str) -> Result<OpenInterval> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidRange("Empty coordinates".to_string()));
        }

        if let Some((start, end)) = parse_integer_pair(text) {
            if start >= end {
                return Err(Error::InvalidRange("Start must be before end".to_string()));
            }
            if end > self.total_length {
                return Err(Error::InvalidRange(format!(
                    "Coordinates {}-{} extend past the end of the view ({} bases)",
                    start, end, self.total_length
                )));
            }
            return Ok(OpenInterval::new(start, end));
        }

        if !text.contains(':') {
            return self.parse_bare_name(text);
        }

        let (left, right) = text
            .split_once('-')
            .ok_or_else(|| Error::InvalidRange(format!("Could not parse '{}'", text)))?;
        let (start_name, start_text) = left
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidRange(format!("Could not parse '{}'", text)))?;
        let (end_name, end_text) = right.rsplit_once(':').unwrap_or((start_name, right));

        let start_pos = parse_position(start_text)?;
        let end_pos = parse_position(end_text)?;
        let start = usize::from(start_pos) as u64 - 1;
        let end = usize::from(end_pos) as u64;

        let interval = if start_name == end_name && self.segment_index(start_name).is_none() {
            if start >= end {
                return Err(Error::InvalidRange("Start must be before end".to_string()));
            }
            let mapped = self.genome_interval_to_context_intervals(&ChromosomeInterval::new(
                start_name, start, end,
            ));
            match (mapped.first(), mapped.last()) {
                (Some(first), Some(last)) => OpenInterval::new(first.start, last.end),
                _ => return Err(self.unknown_locus(start_name, text)),
            }
        } else {
            let context_start = self.resolve_point(start_name, start, Side::Start, text)?;
            let context_end = self.resolve_point(end_name, end, Side::End, text)?;
            if context_start >= context_end {
                return Err(Error::InvalidRange("Start must be before end".to_string()));
            }
            OpenInterval::new(context_start, context_end)
        };

        if interval.start >= interval.end {
            return Err(Error::InvalidRange("Start must be before end".to_string()));
        }
        Ok(interval)
    }

    /// Human-readable form of a context interval, parseable by
    /// [`parse`](Self::parse).
    pub fn format_interval(&self, interval: &OpenInterval) -> String {
        let pieces = self.segments_in_interval(interval.start, interval.end);
        match (pieces.first(), pieces.last()) {
            (Some(first), Some(last)) if first.index == last.index => format!(
                "{}:{}-{}",
                first.segment.name(),
                first.relative_start + 1,
                first.relative_end
            ),
            (Some(first), Some(last)) => format!(
                "{}:{}-{}:{}",
                first.segment.name(),
                first.relative_start + 1,
                last.segment.name(),
                last.relative_end
            ),
            _ => format!("{}-{}", interval.start, interval.end),
        }
    }

    fn parse_bare_name(&self, name: &str) -> Result<OpenInterval> {
        if let Some(index) = self.segment_index(name) {
            let start = self.starts[index];
            return Ok(OpenInterval::new(start, start + self.segments[index].len()));
        }
        let mapped =
            self.genome_interval_to_context_intervals(&ChromosomeInterval::new(name, 0, u64::MAX));
        match (mapped.first(), mapped.last()) {
            (Some(first), Some(last)) => Ok(OpenInterval::new(first.start, last.end)),
            _ => Err(Error::InvalidRange(format!(
                "Unknown chromosome or segment '{}'",
                name
            ))),
        }
    }

    fn resolve_point(&self, name: &str, base: u64, side: Side, text: &str) -> Result<u64> {
        if let Some(index) = self.segment_index(name) {
            return self.index_to_context(index, base).map_err(|_| {
                Error::InvalidRange(format!(
                    "Base number {} is not in '{}'",
                    base,
                    self.segments[index].name()
                ))
            });
        }
        let point = match side {
            Side::Start => ChromosomeInterval::new(name, base, base + 1),
            Side::End => ChromosomeInterval::new(name, base.saturating_sub(1), base),
        };
        let mapped = self.genome_interval_to_context_intervals(&point);
        match side {
            Side::Start => mapped.first().map(|i| i.start),
            Side::End => mapped.last().map(|i| i.end),
        }
        .ok_or_else(|| self.unknown_locus(name, text))
    }

    fn unknown_locus(&self, name: &str, text: &str) -> Error {
        if self.chr_to_indices.contains_key(name) {
            Error::InvalidRange(format!("'{}' is not in the current view", text))
        } else {
            Error::InvalidRange(format!("Unknown chromosome or segment '{}'", name))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Start,
    End,
}

fn parse_base_number(text: &str) -> Option<u64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

fn parse_position(text: &str) -> Result<Position> {
    let base = parse_base_number(text)
        .ok_or_else(|| Error::InvalidRange(format!("'{}' is not a base number", text.trim())))?;
    usize::try_from(base)
        .ok()
        .and_then(|b| Position::try_from(b).ok())
        .ok_or_else(|| Error::InvalidRange("Base numbers start at 1".to_string()))
}

fn parse_integer_pair(text: &str) -> Option<(u64, u64)> {
    let (a, b) = text
        .split_once('-')
        .or_else(|| text.split_once(char::is_whitespace))?;
    Some((parse_base_number(a)?, parse_base_number(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::segment::Strand;

    fn feature(name: &str, chr: &str, start: u64, end: u64) -> Segment {
        Segment::new(
            Some(name.to_string()),
            ChromosomeInterval::new(chr, start, end),
            Strand::Unknown,
        )
    }

    fn three_features() -> NavigationContext {
        NavigationContext::new(
            "test",
            vec![
                feature("f1", "chr1", 0, 10),
                feature("f2", "chr2", 0, 10),
                feature("f3", "chr2", 5, 15),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(NavigationContext::new("empty", vec![]).is_err());
        assert!(
            NavigationContext::new(
                "dup",
                vec![feature("a", "chr1", 0, 10), feature("a", "chr2", 0, 10)]
            )
            .is_err()
        );
    }

    #[test]
    fn test_gaps_may_share_names() {
        let context = NavigationContext::new(
            "gaps",
            vec![
                Segment::gap(100),
                feature("a", "chr1", 0, 10),
                Segment::gap(100),
            ],
        )
        .unwrap();
        assert_eq!(context.total_length(), 210);
    }

    #[test]
    fn test_map_to_segment() {
        let context = three_features();
        assert_eq!(context.total_length(), 30);

        let coordinate = context.map_to_segment(10).unwrap();
        assert_eq!(coordinate.segment.name(), "f2");
        assert_eq!(coordinate.offset, 0);

        let coordinate = context.map_to_segment(29).unwrap();
        assert_eq!(coordinate.segment.name(), "f3");
        assert_eq!(coordinate.offset, 9);

        assert!(matches!(context.map_to_segment(30), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn test_map_round_trip() {
        let lengths = [7u64, 1, 13, 2, 40, 3];
        let segments = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| feature(&format!("s{}", i), &format!("chr{}", i), 0, len))
            .collect();
        let context = NavigationContext::new("round trip", segments).unwrap();

        for (index, &len) in lengths.iter().enumerate() {
            for offset in 0..len {
                let x = context.index_to_context(index, offset).unwrap();
                let mapped = context.map_to_segment(x).unwrap();
                assert_eq!((mapped.index, mapped.offset), (index, offset));
            }
        }
    }

    #[test]
    fn test_segment_to_context_errors() {
        let context = three_features();
        assert_eq!(context.segment_to_context("f2", 10).unwrap(), 20);
        assert!(context.segment_to_context("f2", 11).is_err());
        assert!(context.segment_to_context("nope", 0).is_err());
    }

    #[test]
    fn test_genome_interval_maps_to_each_copy() {
        let context = three_features();
        let intervals =
            context.genome_interval_to_context_intervals(&ChromosomeInterval::new("chr2", 0, 20));
        assert_eq!(
            intervals,
            vec![OpenInterval::new(10, 20), OpenInterval::new(20, 30)]
        );
    }

    #[test]
    fn test_split_chromosome_yields_disjoint_intervals() {
        let context = NavigationContext::new(
            "split",
            vec![
                feature("chr1 left", "chr1", 0, 100),
                Segment::gap(50),
                feature("chr2", "chr2", 0, 100),
                Segment::gap(50),
                feature("chr1 right", "chr1", 300, 400),
            ],
        )
        .unwrap();

        let intervals = context
            .genome_interval_to_context_intervals(&ChromosomeInterval::new("chr1", 50, 350));
        assert_eq!(
            intervals,
            vec![OpenInterval::new(50, 100), OpenInterval::new(300, 350)]
        );
        assert!(intervals[0].overlap(&intervals[1]).is_none());
    }

    #[test]
    fn test_genome_context_fast_path() {
        let context = NavigationContext::genome(
            "g",
            vec![Segment::chromosome("chr1", 1000), Segment::chromosome("chr2", 500)],
        )
        .unwrap();
        assert!(context.is_genome());
        assert_eq!(
            context.genome_interval_to_context_intervals(&ChromosomeInterval::new("chr2", 100, 900)),
            vec![OpenInterval::new(1100, 1500)]
        );
        assert!(
            context
                .genome_interval_to_context_intervals(&ChromosomeInterval::new("chrX", 0, 10))
                .is_empty()
        );
    }

    #[test]
    fn test_loci_in_interval_skips_gaps_and_merges() {
        let context = NavigationContext::new(
            "loci",
            vec![
                feature("a", "chr1", 0, 10),
                Segment::gap(5),
                feature("b", "chr1", 5, 20),
            ],
        )
        .unwrap();
        assert_eq!(
            context.loci_in_interval(0, 30),
            vec![ChromosomeInterval::new("chr1", 0, 20)]
        );
    }

    #[test]
    fn test_parse_forms() {
        let context = NavigationContext::genome(
            "g",
            vec![Segment::chromosome("chr1", 1000), Segment::chromosome("chr2", 500)],
        )
        .unwrap();

        assert_eq!(context.parse("chr1:101-200").unwrap(), OpenInterval::new(100, 200));
        assert_eq!(context.parse("chr2").unwrap(), OpenInterval::new(1000, 1500));
        assert_eq!(
            context.parse("chr1:901-chr2:100").unwrap(),
            OpenInterval::new(900, 1100)
        );
        assert_eq!(context.parse("10-20").unwrap(), OpenInterval::new(10, 20));
        assert_eq!(context.parse("10 20").unwrap(), OpenInterval::new(10, 20));
        assert_eq!(context.parse("chr1:1,001-chr2:1").unwrap(), OpenInterval::new(1000, 1001));
    }

    #[test]
    fn test_parse_errors_carry_messages() {
        let context = three_features();

        let err = context.parse("chr1:10-1").unwrap_err();
        assert!(matches!(err, Error::InvalidRange(_)));
        assert_eq!(err.to_string(), "Start must be before end");

        let err = context.parse("meow").unwrap_err();
        assert_eq!(err.to_string(), "Unknown chromosome or segment 'meow'");

        assert!(matches!(context.parse("chr1:101-140"), Err(Error::InvalidRange(_))));
        assert!(matches!(context.parse("chr1:0-5"), Err(Error::InvalidRange(_))));
        assert!(matches!(context.parse("20-10"), Err(Error::InvalidRange(_))));
        assert!(matches!(context.parse("0-31"), Err(Error::InvalidRange(_))));
        assert!(matches!(context.parse(""), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_parse_segment_names() {
        let context = three_features();
        assert_eq!(context.parse("f2").unwrap(), OpenInterval::new(10, 20));
        assert_eq!(context.parse("f2:1-5").unwrap(), OpenInterval::new(10, 15));
        assert_eq!(context.parse("chr1:1-1000").unwrap(), OpenInterval::new(0, 10));
    }

    #[test]
    fn test_format_interval_round_trips_through_parse() {
        let context = three_features();
        for interval in [OpenInterval::new(3, 7), OpenInterval::new(5, 25), OpenInterval::new(0, 30)] {
            let text = context.format_interval(&interval);
            assert_eq!(context.parse(&text).unwrap(), interval, "{}", text);
        }
    }
}
