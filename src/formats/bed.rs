//! Tab-delimited interval records (BED and other tabix-indexed text).

use super::tabix::TabixHeader;
use crate::model::ChromosomeInterval;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedRecord {
    pub chr: String,
    /// 0-based, inclusive.
    pub start: u64,
    /// 0-based, exclusive.
    pub end: u64,
    /// Columns other than the sequence, begin and end columns, in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rest: Vec<String>,
}

impl BedRecord {
    /// Parses one line according to `layout`. `None` for lines too short or
    /// with unparseable coordinates.
    pub fn parse(line: &str, layout: &TabixHeader) -> Option<Self> {
        let columns: Vec<&str> = line.split('\t').collect();
        let column = |n: usize| n.checked_sub(1).and_then(|i| columns.get(i)).copied();

        let chr = column(layout.col_seq)?;
        let begin: u64 = column(layout.col_beg)?.trim().parse().ok()?;
        let start = if layout.zero_based() {
            begin
        } else {
            begin.checked_sub(1)?
        };
        let end = match layout.col_end {
            0 => start + 1,
            n => column(n)?.trim().parse().ok()?,
        };

        let rest = columns
            .iter()
            .enumerate()
            .filter(|(i, _)| ![layout.col_seq, layout.col_beg, layout.col_end].contains(&(i + 1)))
            .map(|(_, c)| c.to_string())
            .collect();

        Some(Self {
            chr: chr.to_string(),
            start,
            end,
            rest,
        })
    }

    pub fn interval(&self) -> ChromosomeInterval {
        ChromosomeInterval::new(self.chr.clone(), self.start, self.end.max(self.start))
    }
}

fn is_meta_line(line: &str, layout: &TabixHeader) -> bool {
    line.is_empty()
        || line.as_bytes()[0] == layout.meta
        || line.starts_with("track ")
        || line.starts_with("browser ")
}

/// Parses decoded text and keeps records on `query.chr` overlapping
/// `[query.start, query.end)`.
///
/// With `assume_sorted`, scanning stops at the first record starting past
/// the query end. Text is normally coordinate sorted; a record seen out of
/// order is logged, and callers that cannot trust sortedness pass `false` to
/// scan everything.
pub fn parse_and_filter(
    text: &str,
    query: &ChromosomeInterval,
    layout: &TabixHeader,
    assume_sorted: bool,
) -> Vec<BedRecord> {
    let mut records = Vec::new();
    let mut malformed = 0usize;
    let mut previous_start = 0u64;
    let mut warned_unsorted = false;

    for line in text.lines() {
        if is_meta_line(line, layout) {
            continue;
        }
        let Some(record) = BedRecord::parse(line, layout) else {
            malformed += 1;
            continue;
        };
        if record.chr != query.chr {
            continue;
        }

        if record.start < previous_start && !warned_unsorted {
            warn!(
                chr = %record.chr,
                start = record.start,
                previous_start,
                "records are not sorted by start"
            );
            warned_unsorted = true;
        }
        previous_start = record.start;

        if record.start > query.end && assume_sorted {
            break;
        }
        if record.start < query.end && record.end > query.start {
            records.push(record);
        }
    }

    if malformed > 0 {
        debug!(malformed, "skipped malformed lines");
    }
    records
}

/// Evenly thins `list` down to at most `limit` items, keeping the first.
pub fn ensure_max_len<T>(list: Vec<T>, limit: usize) -> Vec<T> {
    let len = list.len();
    if len <= limit {
        return list;
    }
    if limit == 0 {
        return Vec::new();
    }
    let mut wanted = (0..limit).map(|i| (i * len).div_ceil(limit)).peekable();
    list.into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            if wanted.peek() == Some(&i) {
                wanted.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_LINES: &str = "chr1\t50\t99\tbefore\n\
                              chr1\t90\t110\tleft edge\n\
                              chr2\t120\t180\tother chromosome\n\
                              chr1\t150\t160\tinside\n\
                              chr1\t200\t300\ttouching end\n";

    #[test]
    fn test_five_line_block() {
        let records = parse_and_filter(
            FIVE_LINES,
            &ChromosomeInterval::new("chr1", 100, 200),
            &TabixHeader::bed(),
            true,
        );
        let names: Vec<&str> = records.iter().map(|r| r.rest[0].as_str()).collect();
        assert_eq!(names, vec!["left edge", "inside"]);
    }

    #[test]
    fn test_skips_meta_and_malformed_lines() {
        let text = "#header\ntrack name=x\nchr1\tnot\ta number\nchr1\t1\nchr1\t5\t15\tok\n";
        let records = parse_and_filter(
            text,
            &ChromosomeInterval::new("chr1", 0, 100),
            &TabixHeader::bed(),
            true,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start, 5);
    }

    #[test]
    fn test_sorted_break_versus_full_scan() {
        let text = "chr1\t300\t400\ta\nchr1\t10\t20\tb\n";
        let query = ChromosomeInterval::new("chr1", 0, 100);
        assert!(parse_and_filter(text, &query, &TabixHeader::bed(), true).is_empty());
        let all = parse_and_filter(text, &query, &TabixHeader::bed(), false);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].rest, vec!["b"]);
    }

    #[test]
    fn test_one_based_layout_without_end_column() {
        let layout = TabixHeader {
            format: 2,
            col_seq: 1,
            col_beg: 2,
            col_end: 0,
            meta: b'#',
            skip: 0,
        };
        let record = BedRecord::parse("chr1\t100\tid\tA\tG", &layout).unwrap();
        assert_eq!((record.start, record.end), (99, 100));
        assert_eq!(record.rest, vec!["id", "A", "G"]);
    }

    #[test]
    fn test_ensure_max_len() {
        assert_eq!(ensure_max_len((0..10).collect(), 20), (0..10).collect::<Vec<_>>());
        assert_eq!(ensure_max_len((0..10).collect(), 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(ensure_max_len((0..10).collect(), 3), vec![0, 4, 7]);
        assert!(ensure_max_len(vec![1, 2, 3], 0).is_empty());
    }
}
