//! Minimal BigWig/BigBed writer.
//!
//! Produces single-leaf chromosome and R-tree indexes, which keeps files
//! small and readable by any BBI reader. Built for tests and behind the
//! `fixtures` feature.

use super::cir_tree::CIR_TREE_MAGIC;
use super::records::{SECTION_BED_GRAPH, SECTION_HEADER_SIZE};
use super::{
    BIGBED_MAGIC, BIGWIG_MAGIC, CHROM_TREE_MAGIC, HEADER_SIZE, NumericalRecord,
    TOTAL_SUMMARY_SIZE, ZOOM_HEADER_SIZE,
};
use crate::formats::bed::BedRecord;
use crate::{Error, Result};
use byteordered::{ByteOrdered, Endianness};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::HashMap;
use std::io::Write;

const VERSION: u16 = 4;
const DEFAULT_ITEMS_PER_BLOCK: usize = 64;

/// Byte sink honouring the chosen byte order.
struct Out {
    buf: Vec<u8>,
    endianness: Endianness,
}

macro_rules! put {
    ($name:ident, $ty:ty, $write:ident) => {
        fn $name(&mut self, value: $ty) -> Result<()> {
            ByteOrdered::runtime(&mut self.buf, self.endianness).$write(value)?;
            Ok(())
        }
    };
}

impl Out {
    fn new(endianness: Endianness) -> Self {
        Self {
            buf: Vec::new(),
            endianness,
        }
    }

    fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    put!(u8, u8, write_u8);
    put!(u16, u16, write_u16);
    put!(u32, u32, write_u32);
    put!(u64, u64, write_u64);
    put!(f32, f32, write_f32);
    put!(f64, f64, write_f64);

    fn patch_u32(&mut self, at: usize, value: u32) -> Result<()> {
        ByteOrdered::runtime(&mut self.buf[at..at + 4], self.endianness).write_u32(value)?;
        Ok(())
    }

    fn patch_u64(&mut self, at: usize, value: u64) -> Result<()> {
        ByteOrdered::runtime(&mut self.buf[at..at + 8], self.endianness).write_u64(value)?;
        Ok(())
    }
}

/// One item in coordinate space, chromosome already resolved to an id.
#[derive(Debug, Clone)]
struct Item {
    chrom_id: u32,
    start: u32,
    end: u32,
    value: f32,
    rest: String,
}

/// Leaf entry of an R-tree: the block's extent and location.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    start_chrom: u32,
    start_base: u32,
    end_chrom: u32,
    end_base: u32,
    offset: u64,
    size: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Aggregate {
    bases: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_squares: f64,
}

impl Aggregate {
    fn add(&mut self, value: f64, bases: u64) {
        if bases == 0 {
            return;
        }
        if self.bases == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.bases += bases;
        self.sum += value * bases as f64;
        self.sum_squares += value * value * bases as f64;
    }
}

/// Builder for BigWig and BigBed files.
#[derive(Debug, Clone)]
pub struct BbiWriter {
    chroms: Vec<(String, u32)>,
    zoom_levels: Vec<u32>,
    items_per_block: usize,
    endianness: Endianness,
}

impl BbiWriter {
    pub fn new(chroms: Vec<(String, u32)>) -> Self {
        let mut chroms = chroms;
        chroms.sort();
        Self {
            chroms,
            zoom_levels: Vec::new(),
            items_per_block: DEFAULT_ITEMS_PER_BLOCK,
            endianness: Endianness::Little,
        }
    }

    /// Reduction levels (bases per summary record) to precompute.
    pub fn zoom_levels(mut self, levels: Vec<u32>) -> Self {
        self.zoom_levels = levels;
        self
    }

    pub fn items_per_block(mut self, n: usize) -> Self {
        self.items_per_block = n.clamp(1, usize::from(u16::MAX));
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn write_bigwig(&self, values: &[NumericalRecord]) -> Result<Vec<u8>> {
        let items = self.resolve(values.iter().map(|v| (&v.chr, v.start, v.end, v.value, String::new())))?;
        self.write(BIGWIG_MAGIC, 0, &items)
    }

    pub fn write_bigbed(&self, entries: &[BedRecord]) -> Result<Vec<u8>> {
        let field_count = entries.first().map_or(3, |e| 3 + e.rest.len());
        let field_count = u16::try_from(field_count)
            .map_err(|_| Error::InvalidInput("too many BED columns".to_string()))?;
        let items = self.resolve(
            entries
                .iter()
                .map(|e| (&e.chr, e.start, e.end, 1.0, e.rest.join("\t"))),
        )?;
        self.write(BIGBED_MAGIC, field_count, &items)
    }

    fn resolve<'a>(
        &self,
        records: impl Iterator<Item = (&'a String, u64, u64, f32, String)>,
    ) -> Result<Vec<Item>> {
        let ids: HashMap<&str, u32> = self
            .chroms
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), i as u32))
            .collect();
        let mut items = records
            .map(|(chr, start, end, value, rest)| {
                let chrom_id = *ids.get(chr.as_str()).ok_or_else(|| {
                    Error::InvalidInput(format!("chromosome '{}' not in the chromosome list", chr))
                })?;
                let to_u32 = |v: u64| {
                    u32::try_from(v)
                        .map_err(|_| Error::InvalidInput(format!("coordinate {} too large", v)))
                };
                Ok(Item {
                    chrom_id,
                    start: to_u32(start)?,
                    end: to_u32(end)?,
                    value,
                    rest,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        items.sort_by_key(|i| (i.chrom_id, i.start, i.end));
        Ok(items)
    }

    fn write(&self, magic: u32, field_count: u16, items: &[Item]) -> Result<Vec<u8>> {
        let zoom_count = u16::try_from(self.zoom_levels.len())
            .map_err(|_| Error::InvalidInput("too many zoom levels".to_string()))?;
        let is_bigwig = magic == BIGWIG_MAGIC;
        let mut out = Out::new(self.endianness);

        // Header, offsets patched once known.
        out.u32(magic)?;
        out.u16(VERSION)?;
        out.u16(zoom_count)?;
        let chrom_tree_at = out.buf.len();
        out.u64(0)?;
        let full_data_at = out.buf.len();
        out.u64(0)?;
        let full_index_at = out.buf.len();
        out.u64(0)?;
        out.u16(field_count)?;
        out.u16(field_count)?;
        out.u64(0)?;
        let total_summary_at = out.buf.len();
        out.u64(0)?;
        let uncompress_buf_at = out.buf.len();
        out.u32(0)?;
        out.u64(0)?;
        debug_assert_eq!(out.offset(), HEADER_SIZE);

        let zoom_headers_at = out.buf.len();
        for _ in 0..zoom_count {
            out.u32(0)?;
            out.u32(0)?;
            out.u64(0)?;
            out.u64(0)?;
        }
        debug_assert_eq!(
            out.offset(),
            HEADER_SIZE + u64::from(zoom_count) * ZOOM_HEADER_SIZE
        );

        let total_summary_offset = out.offset();
        let mut total = Aggregate::default();
        for item in items {
            total.add(f64::from(item.value), u64::from(item.end.saturating_sub(item.start)));
        }
        out.u64(total.bases)?;
        out.f64(total.min)?;
        out.f64(total.max)?;
        out.f64(total.sum)?;
        out.f64(total.sum_squares)?;
        debug_assert_eq!(out.offset(), total_summary_offset + TOTAL_SUMMARY_SIZE);

        let chrom_tree_offset = out.offset();
        self.write_chrom_tree(&mut out)?;

        // Full resolution data: count, then blocks.
        let full_data_offset = out.offset();
        let blocks = self.blocks(items);
        out.u64(if is_bigwig {
            blocks.len() as u64
        } else {
            items.len() as u64
        })?;
        let mut max_block = 0usize;
        let mut entries = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let mut raw = Out::new(self.endianness);
            if is_bigwig {
                encode_bed_graph_section(&mut raw, block)?;
            } else {
                encode_bed_entries(&mut raw, block)?;
            }
            max_block = max_block.max(raw.buf.len());
            entries.push(write_block(&mut out, block, &raw.buf)?);
        }
        let full_index_offset = out.offset();
        write_index(&mut out, &entries)?;

        // Zoom levels, each with its data and index.
        for (level, &reduction) in self.zoom_levels.iter().enumerate() {
            let summaries = self.summarize(items, reduction);
            let data_offset = out.offset();
            out.u32(summaries.len() as u32)?;
            let mut entries = Vec::new();
            for block in summaries.chunks(self.items_per_block) {
                let mut raw = Out::new(self.endianness);
                for (item, agg) in block {
                    raw.u32(item.chrom_id)?;
                    raw.u32(item.start)?;
                    raw.u32(item.end)?;
                    raw.u32(u32::try_from(agg.bases).unwrap_or(u32::MAX))?;
                    raw.f32(agg.min as f32)?;
                    raw.f32(agg.max as f32)?;
                    raw.f32(agg.sum as f32)?;
                    raw.f32(agg.sum_squares as f32)?;
                }
                let items: Vec<Item> = block.iter().map(|(i, _)| i.clone()).collect();
                max_block = max_block.max(raw.buf.len());
                entries.push(write_block(&mut out, &items, &raw.buf)?);
            }
            let index_offset = out.offset();
            write_index(&mut out, &entries)?;

            let at = zoom_headers_at + level * ZOOM_HEADER_SIZE as usize;
            let mut header = Out::new(self.endianness);
            header.u32(reduction)?;
            header.u32(0)?;
            header.u64(data_offset)?;
            header.u64(index_offset)?;
            out.buf[at..at + ZOOM_HEADER_SIZE as usize].copy_from_slice(&header.buf);
        }

        out.patch_u64(chrom_tree_at, chrom_tree_offset)?;
        out.patch_u64(full_data_at, full_data_offset)?;
        out.patch_u64(full_index_at, full_index_offset)?;
        out.patch_u64(total_summary_at, total_summary_offset)?;
        out.patch_u32(uncompress_buf_at, u32::try_from(max_block).unwrap_or(u32::MAX))?;
        Ok(out.buf)
    }

    fn write_chrom_tree(&self, out: &mut Out) -> Result<()> {
        let count = u16::try_from(self.chroms.len())
            .map_err(|_| Error::InvalidInput("too many chromosomes".to_string()))?;
        let key_size = self.chroms.iter().map(|(n, _)| n.len()).max().unwrap_or(1).max(1);

        out.u32(CHROM_TREE_MAGIC)?;
        out.u32(u32::from(count.max(1)))?;
        out.u32(key_size as u32)?;
        out.u32(8)?;
        out.u64(u64::from(count))?;
        out.u64(0)?;

        out.u8(1)?;
        out.u8(0)?;
        out.u16(count)?;
        for (id, (name, length)) in self.chroms.iter().enumerate() {
            let mut key = name.as_bytes().to_vec();
            key.resize(key_size, 0);
            out.buf.extend_from_slice(&key);
            out.u32(id as u32)?;
            out.u32(*length)?;
        }
        Ok(())
    }

    /// Splits sorted items into blocks that never span chromosomes.
    fn blocks<'a>(&self, items: &'a [Item]) -> Vec<&'a [Item]> {
        let mut blocks = Vec::new();
        let mut rest = items;
        while !rest.is_empty() {
            let chrom = rest[0].chrom_id;
            let same = rest.iter().take_while(|i| i.chrom_id == chrom).count();
            let n = same.min(self.items_per_block);
            blocks.push(&rest[..n]);
            rest = &rest[n..];
        }
        blocks
    }

    /// Aggregates items into fixed windows of `reduction` bases. Windows
    /// without data are omitted.
    fn summarize(&self, items: &[Item], reduction: u32) -> Vec<(Item, Aggregate)> {
        let reduction = reduction.max(1);
        let mut windows: Vec<(Item, Aggregate)> = Vec::new();
        for item in items {
            let chrom_len = self.chroms[item.chrom_id as usize].1;
            let mut window = item.start / reduction;
            loop {
                let w_start = window.saturating_mul(reduction);
                if w_start >= item.end {
                    break;
                }
                let w_end = w_start.saturating_add(reduction).min(chrom_len.max(item.end));
                let bases = u64::from(item.end.min(w_end).saturating_sub(item.start.max(w_start)));
                let open = matches!(
                    windows.last(),
                    Some((last, _)) if last.chrom_id == item.chrom_id && last.start == w_start
                );
                if !open {
                    windows.push((
                        Item {
                            chrom_id: item.chrom_id,
                            start: w_start,
                            end: w_end,
                            value: 0.0,
                            rest: String::new(),
                        },
                        Aggregate::default(),
                    ));
                }
                if let Some((_, agg)) = windows.last_mut() {
                    agg.add(f64::from(item.value), bases);
                }
                window += 1;
            }
        }
        windows
    }
}

fn encode_bed_graph_section(raw: &mut Out, block: &[Item]) -> Result<()> {
    let first = &block[0];
    let end = block.iter().map(|i| i.end).max().unwrap_or(first.end);
    raw.u32(first.chrom_id)?;
    raw.u32(first.start)?;
    raw.u32(end)?;
    raw.u32(0)?;
    raw.u32(0)?;
    raw.u8(SECTION_BED_GRAPH)?;
    raw.u8(0)?;
    raw.u16(block.len() as u16)?;
    debug_assert_eq!(raw.buf.len(), SECTION_HEADER_SIZE);
    for item in block {
        raw.u32(item.start)?;
        raw.u32(item.end)?;
        raw.f32(item.value)?;
    }
    Ok(())
}

fn encode_bed_entries(raw: &mut Out, block: &[Item]) -> Result<()> {
    for item in block {
        raw.u32(item.chrom_id)?;
        raw.u32(item.start)?;
        raw.u32(item.end)?;
        raw.buf.extend_from_slice(item.rest.as_bytes());
        raw.u8(0)?;
    }
    Ok(())
}

/// Compresses and appends one block, returning its index entry.
fn write_block(out: &mut Out, items: &[Item], raw: &[u8]) -> Result<IndexEntry> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    let compressed = encoder.finish()?;
    let offset = out.offset();
    out.buf.extend_from_slice(&compressed);
    let first = &items[0];
    let last_chrom = items[items.len() - 1].chrom_id;
    Ok(IndexEntry {
        start_chrom: first.chrom_id,
        start_base: first.start,
        end_chrom: last_chrom,
        end_base: items
            .iter()
            .filter(|i| i.chrom_id == last_chrom)
            .map(|i| i.end)
            .max()
            .unwrap_or(first.end),
        offset,
        size: compressed.len() as u64,
    })
}

/// Writes an R-tree with a single leaf holding every entry.
fn write_index(out: &mut Out, entries: &[IndexEntry]) -> Result<()> {
    let count = u16::try_from(entries.len())
        .map_err(|_| Error::InvalidInput("too many blocks for a single index node".to_string()))?;
    let end_file_offset = out.offset();
    let first = entries.first();
    let last = entries.last();
    out.u32(CIR_TREE_MAGIC)?;
    out.u32(entries.len().max(1) as u32)?;
    out.u64(entries.len() as u64)?;
    out.u32(first.map_or(0, |e| e.start_chrom))?;
    out.u32(first.map_or(0, |e| e.start_base))?;
    out.u32(last.map_or(0, |e| e.end_chrom))?;
    out.u32(last.map_or(0, |e| e.end_base))?;
    out.u64(end_file_offset)?;
    out.u32(1)?;
    out.u32(0)?;

    out.u8(1)?;
    out.u8(0)?;
    out.u16(count)?;
    for entry in entries {
        out.u32(entry.start_chrom)?;
        out.u32(entry.start_base)?;
        out.u32(entry.end_chrom)?;
        out.u32(entry.end_base)?;
        out.u64(entry.offset)?;
        out.u64(entry.size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::bbi::{BbiFile, BbiKind, Resolution};
    use crate::model::ChromosomeInterval;
    use crate::storage::MemoryFetcher;

    #[test]
    fn test_rejects_unknown_chromosome() {
        let writer = BbiWriter::new(vec![("chr1".into(), 100)]);
        let values = vec![NumericalRecord {
            chr: "chr9".to_string(),
            start: 0,
            end: 10,
            value: 1.0,
        }];
        assert!(matches!(
            writer.write_bigwig(&values),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_big_endian_file_reads_back() {
        let values: Vec<NumericalRecord> = (0..10u64)
            .map(|i| NumericalRecord {
                chr: "chr1".to_string(),
                start: i * 10,
                end: i * 10 + 10,
                value: i as f32,
            })
            .collect();
        let data = BbiWriter::new(vec![("chr1".into(), 100)])
            .endianness(Endianness::Big)
            .zoom_levels(vec![50])
            .write_bigwig(&values)
            .unwrap();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://be.bw", data);

        let file = BbiFile::open(&fetcher, "mem://be.bw").await.unwrap();
        assert_eq!(file.kind(), BbiKind::BigWig);
        let records = file
            .read(&fetcher, Resolution::BasePair, &ChromosomeInterval::new("chr1", 25, 45))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);

        let summaries = file
            .read_summary(&fetcher, 0, &ChromosomeInterval::new("chr1", 0, 100))
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].min, 5.0);
        assert_eq!(summaries[1].max, 9.0);
    }
}
