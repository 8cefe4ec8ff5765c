//! Tabix and BAI binning indexes.
//!
//! Both formats share the UCSC binning scheme: six levels of bins over a
//! 2^29 base coordinate space, each bin holding chunks (pairs of BGZF
//! virtual positions), plus a linear index giving, for every 16 kb window,
//! the smallest virtual position of a record overlapping that window.
//!
//! ```text
//! magic       "TBI\1" (inside BGZF) or "BAI\1" (raw)
//! n_ref       i32
//! [TBI only]  format, col_seq, col_beg, col_end, meta, skip, l_nm (i32 each)
//!             names (l_nm bytes, NUL separated)
//! per reference:
//!   n_bin     i32
//!   per bin:  bin u32, n_chunk i32, (begin u64, end u64) * n_chunk
//!   n_intv    i32
//!   ioffset   u64 * n_intv
//! ```

use super::bgzf::{self, MAX_BLOCK_SIZE};
use super::cursor::Cursor;
use crate::storage::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use flate2::read::MultiGzDecoder;
use noodles::bgzf::VirtualPosition;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

const TBI_MAGIC: &[u8; 4] = b"TBI\x01";
const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Pseudo-bin holding per-reference statistics rather than chunks.
const METADATA_BIN: u32 = 37450;

const LINEAR_SHIFT: u32 = 14;
const MAX_COORDINATE: u64 = 1 << 29;

/// Contiguous run of BGZF data between two virtual positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Chunk {
    pub begin: VirtualPosition,
    pub end: VirtualPosition,
}

impl Chunk {
    pub fn new(begin: VirtualPosition, end: VirtualPosition) -> Self {
        Self { begin, end }
    }

    /// Compressed bytes to request: from the first block through the largest
    /// possible block starting at the end position.
    pub fn byte_range(&self) -> ByteRange {
        let start = self.begin.compressed();
        let end = self.end.compressed() + MAX_BLOCK_SIZE;
        ByteRange::with_length(start, end - start)
    }
}

/// Column layout of the indexed text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabixHeader {
    pub format: u32,
    /// 1-based column numbers; `col_end == 0` means no end column.
    pub col_seq: usize,
    pub col_beg: usize,
    pub col_end: usize,
    pub meta: u8,
    pub skip: usize,
}

impl TabixHeader {
    const ZERO_BASED: u32 = 0x10000;

    /// Layout written by `tabix -p bed`.
    pub fn bed() -> Self {
        Self {
            format: Self::ZERO_BASED,
            col_seq: 1,
            col_beg: 2,
            col_end: 3,
            meta: b'#',
            skip: 0,
        }
    }

    /// Whether begin coordinates in the file are 0-based (BED-like) rather
    /// than 1-based (GFF, VCF, SAM).
    pub fn zero_based(&self) -> bool {
        self.format & Self::ZERO_BASED != 0
    }
}

impl Default for TabixHeader {
    fn default() -> Self {
        Self::bed()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    bins: HashMap<u32, Vec<Chunk>>,
    linear: Vec<VirtualPosition>,
}

impl ReferenceIndex {
    /// Lowest virtual position that can hold a record overlapping `start`.
    fn linear_floor(&self, start: u64) -> Option<VirtualPosition> {
        let window = (start >> LINEAR_SHIFT) as usize;
        let last = self.linear.len().checked_sub(1)?;
        Some(self.linear[window.min(last)])
    }
}

/// A parsed tabix or BAI index. Immutable once built.
#[derive(Debug, Clone)]
pub struct BinningIndex {
    header: Option<TabixHeader>,
    names: Vec<String>,
    name_to_id: HashMap<String, usize>,
    references: Vec<ReferenceIndex>,
    unplaced: Option<u64>,
}

impl BinningIndex {
    /// Parses index bytes as fetched: a BGZF-compressed tabix index, or a raw
    /// BAI index. Anything else is [`Error::CorruptIndex`].
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.starts_with(BAI_MAGIC) {
            return Self::parse(raw);
        }
        if !raw.starts_with(&[0x1f, 0x8b]) {
            return Err(Error::CorruptIndex("not a gzip or BAI index".to_string()));
        }
        let mut data = Vec::new();
        MultiGzDecoder::new(raw)
            .read_to_end(&mut data)
            .map_err(|e| Error::CorruptIndex(format!("failed to decompress index: {}", e)))?;
        Self::parse(&data)
    }

    fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data, Error::CorruptIndex);
        let magic = cursor.take(4)?;
        let is_tabix = match magic {
            m if m == TBI_MAGIC => true,
            m if m == BAI_MAGIC => false,
            m => {
                return Err(Error::CorruptIndex(format!("bad index magic {:?}", m)));
            }
        };

        let n_ref = cursor.count()?;
        let (header, names) = if is_tabix {
            let format = cursor.i32()? as u32;
            let col_seq = cursor.count()?;
            let col_beg = cursor.count()?;
            let col_end = cursor.count()?;
            let meta = cursor.i32()? as u8;
            let skip = cursor.count()?;
            let l_nm = cursor.count()?;
            let names = parse_names(cursor.take(l_nm)?)?;
            if names.len() != n_ref {
                return Err(Error::CorruptIndex(format!(
                    "{} names for {} references",
                    names.len(),
                    n_ref
                )));
            }
            let header = TabixHeader {
                format,
                col_seq,
                col_beg,
                col_end,
                meta,
                skip,
            };
            (Some(header), names)
        } else {
            (None, (0..n_ref).map(|i| i.to_string()).collect())
        };

        let mut references = Vec::with_capacity(n_ref.min(1 << 16));
        for _ in 0..n_ref {
            references.push(parse_reference(&mut cursor)?);
        }
        let unplaced = if cursor.remaining() >= 8 {
            Some(cursor.u64()?)
        } else {
            None
        };

        let name_to_id = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        debug!(references = n_ref, tabix = is_tabix, "parsed binning index");
        Ok(Self {
            header,
            names,
            name_to_id,
            references,
            unplaced,
        })
    }

    /// Column layout; `None` for BAI indexes.
    pub fn header(&self) -> Option<&TabixHeader> {
        self.header.as_ref()
    }

    pub fn reference_names(&self) -> &[String] {
        &self.names
    }

    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.name_to_id.get(name).copied()
    }

    /// Count of records with no coordinates, when the index records it.
    pub fn unplaced_count(&self) -> Option<u64> {
        self.unplaced
    }

    /// Chunks that may hold records overlapping `[start, end)` on a
    /// reference, sorted and merged so that no two share a compressed block.
    pub fn chunks_for_range(&self, ref_id: usize, start: u64, end: u64) -> Vec<Chunk> {
        let Some(reference) = self.references.get(ref_id) else {
            return Vec::new();
        };
        if start >= end {
            return Vec::new();
        }

        let floor = reference.linear_floor(start);
        let mut chunks: Vec<Chunk> = reg2bins(start, end)
            .into_iter()
            .filter_map(|bin| reference.bins.get(&bin))
            .flatten()
            .filter(|chunk| floor.is_none_or(|floor| chunk.end > floor))
            .copied()
            .collect();

        merge_chunks(&mut chunks)
    }

    /// Fetches one chunk and inflates it, returning the text between its
    /// begin and end virtual positions.
    pub async fn fetch_and_decode(
        fetcher: &dyn RangeFetcher,
        url: &str,
        chunk: &Chunk,
    ) -> Result<Vec<u8>> {
        let range = chunk.byte_range();
        let bytes = fetcher.fetch(url, Some(range)).await?;
        bgzf::decode_range(&bytes, range.start, chunk.begin, chunk.end)
    }
}

fn parse_names(block: &[u8]) -> Result<Vec<String>> {
    block
        .split(|&b| b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| {
            String::from_utf8(name.to_vec())
                .map_err(|_| Error::CorruptIndex("reference name is not UTF-8".to_string()))
        })
        .collect()
}

fn parse_reference(cursor: &mut Cursor<'_>) -> Result<ReferenceIndex> {
    let n_bin = cursor.count()?;
    let mut bins = HashMap::with_capacity(n_bin.min(1 << 16));
    for _ in 0..n_bin {
        let bin = cursor.u32()?;
        let n_chunk = cursor.count()?;
        let mut chunks = Vec::with_capacity(n_chunk.min(1 << 16));
        for _ in 0..n_chunk {
            let begin = VirtualPosition::from(cursor.u64()?);
            let end = VirtualPosition::from(cursor.u64()?);
            chunks.push(Chunk::new(begin, end));
        }
        if bin != METADATA_BIN {
            bins.insert(bin, chunks);
        }
    }

    let n_intv = cursor.count()?;
    let mut linear = Vec::with_capacity(n_intv.min(1 << 16));
    for _ in 0..n_intv {
        linear.push(VirtualPosition::from(cursor.u64()?));
    }
    Ok(ReferenceIndex { bins, linear })
}

/// Sorts chunks and merges those touching a common compressed block.
fn merge_chunks(chunks: &mut Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort();
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks.drain(..) {
        match merged.last_mut() {
            Some(last) if chunk.begin.compressed() <= last.end.compressed() => {
                last.end = last.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

/// Smallest bin wholly containing `[start, end)`.
pub fn reg2bin(start: u64, end: u64) -> u32 {
    let end = end.saturating_sub(1).max(start);
    for (shift, offset) in [(14, 4681), (17, 585), (20, 73), (23, 9), (26, 1)] {
        if start >> shift == end >> shift {
            return (offset + (start >> shift)) as u32;
        }
    }
    0
}

/// Every bin that may hold a record overlapping `[start, end)`.
pub fn reg2bins(start: u64, end: u64) -> Vec<u32> {
    let end = end.min(MAX_COORDINATE).saturating_sub(1);
    let start = start.min(end);
    let mut bins = vec![0];
    for (shift, offset) in [(26, 1u64), (23, 9), (20, 73), (17, 585), (14, 4681)] {
        for bin in (offset + (start >> shift))..=(offset + (end >> shift)) {
            bins.push(bin as u32);
        }
    }
    bins
}

/// Builds a BGZF text file and its tabix index together. Records must be
/// added grouped by reference and sorted by start.
#[derive(Debug)]
pub struct TabixWriter {
    data: bgzf::Writer,
    header: TabixHeader,
    names: Vec<String>,
    references: Vec<ReferenceBuilder>,
}

#[derive(Debug, Default)]
struct ReferenceBuilder {
    bins: HashMap<u32, Vec<Chunk>>,
    linear: Vec<Option<VirtualPosition>>,
}

impl TabixWriter {
    pub fn new(header: TabixHeader) -> Self {
        Self {
            data: bgzf::Writer::new(),
            header,
            names: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Writes a header or comment line. These are not indexed.
    pub fn write_meta(&mut self, line: &str) -> Result<()> {
        self.data.write(line.as_bytes())?;
        self.data.write(b"\n")
    }

    /// Writes one record line covering 0-based `[start, end)` on `chr`.
    pub fn write_record(&mut self, chr: &str, start: u64, end: u64, line: &str) -> Result<()> {
        if self.names.last().map(String::as_str) != Some(chr) {
            if self.names.iter().any(|n| n == chr) {
                return Err(Error::InvalidInput(format!(
                    "records for '{}' are not contiguous",
                    chr
                )));
            }
            self.names.push(chr.to_string());
            self.references.push(ReferenceBuilder::default());
        }

        let begin = self.data.virtual_position();
        self.data.write(line.as_bytes())?;
        self.data.write(b"\n")?;
        let end_position = self.data.virtual_position();

        let reference = self
            .references
            .last_mut()
            .ok_or_else(|| Error::Internal("no reference for record".to_string()))?;
        let chunks = reference.bins.entry(reg2bin(start, end)).or_default();
        match chunks.last_mut() {
            Some(last) if last.end == begin => last.end = end_position,
            _ => chunks.push(Chunk::new(begin, end_position)),
        }

        let first_window = (start >> LINEAR_SHIFT) as usize;
        let last_window = (end.saturating_sub(1).max(start) >> LINEAR_SHIFT) as usize;
        if reference.linear.len() <= last_window {
            reference.linear.resize(last_window + 1, None);
        }
        for slot in &mut reference.linear[first_window..=last_window] {
            if slot.is_none() {
                *slot = Some(begin);
            }
        }
        Ok(())
    }

    /// Ends the current BGZF block so the next record starts a new one.
    pub fn flush_block(&mut self) -> Result<()> {
        self.data.flush_block()
    }

    /// Returns `(data, index)`: the BGZF file and its BGZF-compressed `.tbi`.
    pub fn finish(self) -> Result<(Vec<u8>, Vec<u8>)> {
        let data = self.data.finish()?;

        let mut raw = Vec::new();
        raw.extend_from_slice(TBI_MAGIC);
        push_i32(&mut raw, self.names.len())?;
        raw.extend_from_slice(&(self.header.format as i32).to_le_bytes());
        push_i32(&mut raw, self.header.col_seq)?;
        push_i32(&mut raw, self.header.col_beg)?;
        push_i32(&mut raw, self.header.col_end)?;
        raw.extend_from_slice(&i32::from(self.header.meta).to_le_bytes());
        push_i32(&mut raw, self.header.skip)?;
        let names: Vec<u8> = self
            .names
            .iter()
            .flat_map(|n| n.bytes().chain(std::iter::once(0)))
            .collect();
        push_i32(&mut raw, names.len())?;
        raw.extend_from_slice(&names);

        for reference in &self.references {
            let mut bins: Vec<_> = reference.bins.iter().collect();
            bins.sort_by_key(|(bin, _)| **bin);
            push_i32(&mut raw, bins.len())?;
            for (bin, chunks) in bins {
                raw.extend_from_slice(&bin.to_le_bytes());
                push_i32(&mut raw, chunks.len())?;
                for chunk in chunks {
                    raw.extend_from_slice(&u64::from(chunk.begin).to_le_bytes());
                    raw.extend_from_slice(&u64::from(chunk.end).to_le_bytes());
                }
            }

            // Windows without records take the previous window's offset.
            push_i32(&mut raw, reference.linear.len())?;
            let mut previous = VirtualPosition::from(0);
            for slot in &reference.linear {
                let offset = slot.unwrap_or(previous);
                raw.extend_from_slice(&u64::from(offset).to_le_bytes());
                previous = offset;
            }
        }

        let mut index = bgzf::Writer::new();
        index.write(&raw)?;
        Ok((data, index.finish()?))
    }
}

fn push_i32(buf: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = i32::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{} does not fit in an index field", value)))?;
    buf.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFetcher;

    fn vp(compressed: u64, uncompressed: u16) -> VirtualPosition {
        VirtualPosition::try_from((compressed, uncompressed)).unwrap()
    }

    struct Fixture {
        data: Vec<u8>,
        index: BinningIndex,
        lines: Vec<(String, u64, u64, String)>,
    }

    /// Three BGZF blocks on chr1 with records every 5 kb, plus a chr2 block.
    fn fixture() -> Fixture {
        let mut writer = TabixWriter::new(TabixHeader::bed());
        writer.write_meta("#chrom\tstart\tend").unwrap();
        let mut lines = Vec::new();
        for block in 0..3u64 {
            for i in 0..40u64 {
                let start = (block * 40 + i) * 5_000;
                let end = start + 2_500 + (i % 7) * 1_000;
                let line = format!("chr1\t{}\t{}\tr{}", start, end, block * 40 + i);
                writer.write_record("chr1", start, end, &line).unwrap();
                lines.push(("chr1".to_string(), start, end, line));
            }
            writer.flush_block().unwrap();
        }
        let line = "chr2\t100\t200\tother".to_string();
        writer.write_record("chr2", 100, 200, &line).unwrap();
        lines.push(("chr2".to_string(), 100, 200, line));

        let (data, index) = writer.finish().unwrap();
        Fixture {
            data,
            index: BinningIndex::from_bytes(&index).unwrap(),
            lines,
        }
    }

    #[test]
    fn test_parses_header_and_names() {
        let fixture = fixture();
        let header = fixture.index.header().unwrap();
        assert!(header.zero_based());
        assert_eq!(header.meta, b'#');
        assert_eq!(fixture.index.reference_names(), &["chr1", "chr2"]);
        assert_eq!(fixture.index.reference_id("chr2"), Some(1));
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        assert!(matches!(
            BinningIndex::from_bytes(b"not an index"),
            Err(Error::CorruptIndex(_))
        ));

        let mut raw = Vec::from(&TBI_MAGIC[..]);
        raw.extend_from_slice(&5i32.to_le_bytes());
        let mut writer = bgzf::Writer::new();
        writer.write(&raw).unwrap();
        let truncated = writer.finish().unwrap();
        assert!(matches!(
            BinningIndex::from_bytes(&truncated),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_raw_bai_is_accepted() {
        let mut raw = Vec::from(&BAI_MAGIC[..]);
        raw.extend_from_slice(&1i32.to_le_bytes());
        raw.extend_from_slice(&2i32.to_le_bytes());
        // Real bin with one chunk.
        raw.extend_from_slice(&4681u32.to_le_bytes());
        raw.extend_from_slice(&1i32.to_le_bytes());
        raw.extend_from_slice(&u64::from(vp(0, 0)).to_le_bytes());
        raw.extend_from_slice(&u64::from(vp(0, 50)).to_le_bytes());
        // Metadata pseudo-bin.
        raw.extend_from_slice(&METADATA_BIN.to_le_bytes());
        raw.extend_from_slice(&2i32.to_le_bytes());
        raw.extend_from_slice(&[0u8; 32]);
        raw.extend_from_slice(&1i32.to_le_bytes());
        raw.extend_from_slice(&0u64.to_le_bytes());
        raw.extend_from_slice(&7u64.to_le_bytes());

        let index = BinningIndex::from_bytes(&raw).unwrap();
        assert!(index.header().is_none());
        assert_eq!(index.unplaced_count(), Some(7));
        assert_eq!(index.chunks_for_range(0, 0, 100), vec![Chunk::new(vp(0, 0), vp(0, 50))]);
    }

    #[test]
    fn test_reg2bin_levels() {
        assert_eq!(reg2bin(0, 1), 4681);
        assert_eq!(reg2bin(0, 1 << 14), 4681);
        assert_eq!(reg2bin(0, (1 << 14) + 1), 585);
        assert_eq!(reg2bin(0, 1 << 29), 0);
        assert!(reg2bins(100, 200).contains(&reg2bin(100, 200)));
    }

    #[test]
    fn test_merge_chunks_sharing_blocks() {
        let mut chunks = vec![
            Chunk::new(vp(500, 0), vp(600, 10)),
            Chunk::new(vp(100, 0), vp(200, 5)),
            Chunk::new(vp(200, 40), vp(300, 0)),
        ];
        assert_eq!(
            merge_chunks(&mut chunks),
            vec![
                Chunk::new(vp(100, 0), vp(300, 0)),
                Chunk::new(vp(500, 0), vp(600, 10)),
            ]
        );
    }

    #[test]
    fn test_chunks_for_range_prunes_with_linear_index() {
        let fixture = fixture();
        let all = fixture.index.chunks_for_range(0, 0, 600_000);
        let late = fixture.index.chunks_for_range(0, 500_000, 510_000);
        assert!(!late.is_empty());
        assert!(late[0].begin >= all[0].begin);
        assert!(late.iter().map(|c| c.byte_range().start).min() > Some(0));
        assert!(fixture.index.chunks_for_range(5, 0, 10).is_empty());
    }

    fn overlapping(text: &[u8], chr: &str, start: u64, end: u64) -> Vec<String> {
        String::from_utf8_lossy(text)
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let fields: Vec<&str> = line.split('\t').collect();
                let s: u64 = fields[1].parse().ok()?;
                let e: u64 = fields[2].parse().ok()?;
                (fields[0] == chr && s < end && e > start).then(|| line.to_string())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_decoded_chunks_match_brute_force() {
        let fixture = fixture();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://data.bed.gz", fixture.data.clone());

        let full = bgzf::decode_blocks(&fixture.data, 0)
            .unwrap()
            .into_iter()
            .flat_map(|b| b.data)
            .collect::<Vec<u8>>();

        for (start, end) in [(0, 1), (12_000, 13_000), (190_000, 215_000), (0, 600_000), (599_000, 700_000)] {
            let mut decoded = Vec::new();
            for chunk in fixture.index.chunks_for_range(0, start, end) {
                let text = BinningIndex::fetch_and_decode(&fetcher, "mem://data.bed.gz", &chunk)
                    .await
                    .unwrap();
                decoded.extend(overlapping(&text, "chr1", start, end));
            }
            let expected = overlapping(&full, "chr1", start, end);
            assert_eq!(decoded, expected, "query {}-{}", start, end);
        }
        assert_eq!(fixture.lines.len(), 121);
    }
}
