//! BigWig and BigBed ("BBI") files.
//!
//! A BBI file carries its own indexes: a chromosome B+ tree mapping names to
//! numeric ids, a full-resolution R-tree over the data blocks, and a list of
//! zoom levels, each with pre-aggregated summary records and its own R-tree.
//!
//! ```text
//! header (64 bytes)
//!   magic u32, version u16, zoomLevels u16, chromTreeOffset u64,
//!   fullDataOffset u64, fullIndexOffset u64, fieldCount u16,
//!   definedFieldCount u16, autoSqlOffset u64, totalSummaryOffset u64,
//!   uncompressBufSize u32, reserved u64
//! zoom headers (24 bytes each)
//!   reductionLevel u32, reserved u32, dataOffset u64, indexOffset u64
//! ```
//!
//! The byte order is whatever makes the magic number read correctly.

pub mod cir_tree;
mod records;
#[cfg(any(test, feature = "fixtures"))]
pub mod writer;

pub use records::{NumericalRecord, SummaryRecord};

use self::cir_tree::DataBlock;
use self::records::BlockQuery;
use super::Record;
use super::cursor::Cursor;
use byteordered::Endianness;
use crate::model::ChromosomeInterval;
use crate::storage::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

pub(crate) const HEADER_SIZE: u64 = 64;
pub(crate) const ZOOM_HEADER_SIZE: u64 = 24;
pub(crate) const TOTAL_SUMMARY_SIZE: u64 = 40;
const CHROM_TREE_HEADER_SIZE: usize = 32;

// Bytes read up front; covers the header, zoom headers and usually the
// chromosome tree in a single request.
const PREFETCH_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BbiKind {
    BigWig,
    BigBed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomHeader {
    /// Bases aggregated by each summary record at this level.
    pub reduction_level: u32,
    pub data_offset: u64,
    pub index_offset: u64,
}

/// Resolution at which to read a BBI file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Raw data, always available.
    BasePair,
    /// Index into [`ZoomManifest::levels`].
    Zoom(usize),
}

/// Zoom levels of a file, strictly ascending by reduction level.
#[derive(Debug, Clone, Default)]
pub struct ZoomManifest {
    levels: Vec<ZoomHeader>,
}

impl ZoomManifest {
    /// Sorts levels by reduction. Two levels with the same reduction make the
    /// file corrupt.
    pub fn new(mut levels: Vec<ZoomHeader>) -> Result<Self> {
        levels.sort_by_key(|l| l.reduction_level);
        if levels
            .windows(2)
            .any(|w| w[0].reduction_level == w[1].reduction_level)
        {
            return Err(Error::CorruptFile(
                "duplicate zoom reduction levels".to_string(),
            ));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[ZoomHeader] {
        &self.levels
    }

    /// The coarsest level whose reduction is still below `bases_per_pixel`,
    /// so that each pixel gets at least one summary record. Base pairs when
    /// no level qualifies or no resolution hint is given.
    pub fn select_level(&self, bases_per_pixel: f64) -> Resolution {
        if !bases_per_pixel.is_finite() || bases_per_pixel <= 0.0 {
            return Resolution::BasePair;
        }
        self.levels
            .iter()
            .rposition(|l| f64::from(l.reduction_level) < bases_per_pixel)
            .map_or(Resolution::BasePair, Resolution::Zoom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromInfo {
    pub name: String,
    pub id: u32,
    pub length: u32,
}

/// Whole-file statistics stored after the zoom headers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TotalSummary {
    pub bases_covered: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

#[derive(Debug, Clone)]
struct Header {
    version: u16,
    zoom_levels: u16,
    chrom_tree_offset: u64,
    full_data_offset: u64,
    full_index_offset: u64,
    field_count: u16,
    total_summary_offset: u64,
    uncompress_buf_size: u32,
}

/// Raw data blocks fetched for one query, ready to be decoded off the async
/// runtime with [`BbiFile::decode`].
#[derive(Debug, Clone)]
pub struct RawBlocks {
    pub chrom_id: u32,
    pub resolution: Resolution,
    pub interval: ChromosomeInterval,
    pub blocks: Vec<Bytes>,
}

/// An opened BigWig or BigBed file: everything needed to locate data,
/// parsed once and immutable afterwards.
#[derive(Debug, Clone)]
pub struct BbiFile {
    url: String,
    kind: BbiKind,
    endianness: Endianness,
    header: Header,
    manifest: ZoomManifest,
    chroms: Vec<ChromInfo>,
    chrom_ids: HashMap<String, usize>,
    total_summary: Option<TotalSummary>,
}

/// Bytes at the start of the file, with fetches for anything past them.
struct Prefix<'a> {
    fetcher: &'a dyn RangeFetcher,
    url: &'a str,
    bytes: Bytes,
}

impl Prefix<'_> {
    async fn read(&self, offset: u64, len: u64) -> Result<Bytes> {
        let end = offset + len;
        if end <= self.bytes.len() as u64 {
            return Ok(self.bytes.slice(offset as usize..end as usize));
        }
        let bytes = self
            .fetcher
            .fetch(self.url, Some(ByteRange::with_length(offset, len)))
            .await?;
        if (bytes.len() as u64) < len {
            return Err(Error::CorruptFile(format!(
                "file ends inside the {} bytes at offset {}",
                len, offset
            )));
        }
        Ok(bytes)
    }
}

impl BbiFile {
    /// Reads the header, zoom levels, total summary and chromosome tree.
    pub async fn open(fetcher: &dyn RangeFetcher, url: &str) -> Result<Self> {
        let bytes = fetcher
            .fetch(url, Some(ByteRange::with_length(0, PREFETCH_SIZE)))
            .await?;
        if (bytes.len() as u64) < HEADER_SIZE {
            return Err(Error::CorruptFile(format!(
                "{} is too short to be a BigWig or BigBed file",
                url
            )));
        }
        let prefix = Prefix {
            fetcher,
            url,
            bytes,
        };

        let magic_bytes = [prefix.bytes[0], prefix.bytes[1], prefix.bytes[2], prefix.bytes[3]];
        let (kind, endianness) = match u32::from_le_bytes(magic_bytes) {
            BIGWIG_MAGIC => (BbiKind::BigWig, Endianness::Little),
            BIGBED_MAGIC => (BbiKind::BigBed, Endianness::Little),
            m if m.swap_bytes() == BIGWIG_MAGIC => (BbiKind::BigWig, Endianness::Big),
            m if m.swap_bytes() == BIGBED_MAGIC => (BbiKind::BigBed, Endianness::Big),
            m => {
                return Err(Error::UnsupportedFormat(format!(
                    "{} is not a BigWig or BigBed file (magic {:#x})",
                    url, m
                )));
            }
        };

        let header = parse_header(&prefix.bytes[..HEADER_SIZE as usize], endianness)?;

        let zoom_bytes = prefix
            .read(HEADER_SIZE, u64::from(header.zoom_levels) * ZOOM_HEADER_SIZE)
            .await?;
        let manifest = ZoomManifest::new(parse_zoom_headers(
            &zoom_bytes,
            header.zoom_levels,
            endianness,
        )?)?;

        let total_summary = if header.total_summary_offset > 0 {
            let data = prefix
                .read(header.total_summary_offset, TOTAL_SUMMARY_SIZE)
                .await?;
            Some(parse_total_summary(&data, endianness)?)
        } else {
            None
        };

        // The data section follows the chromosome tree in files written by
        // the UCSC tools and by this crate.
        let tree_len = if header.full_data_offset > header.chrom_tree_offset {
            header.full_data_offset - header.chrom_tree_offset
        } else {
            PREFETCH_SIZE
        };
        let tree_bytes = prefix.read(header.chrom_tree_offset, tree_len).await?;
        let chroms = parse_chrom_tree(&tree_bytes, header.chrom_tree_offset, endianness)?;
        let chrom_ids = chroms
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        debug!(
            url,
            kind = ?kind,
            version = header.version,
            zoom_levels = header.zoom_levels,
            chroms = chroms.len(),
            "opened BBI file"
        );
        Ok(Self {
            url: url.to_string(),
            kind,
            endianness,
            header,
            manifest,
            chroms,
            chrom_ids,
            total_summary,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> BbiKind {
        self.kind
    }

    pub fn manifest(&self) -> &ZoomManifest {
        &self.manifest
    }

    pub fn chroms(&self) -> &[ChromInfo] {
        &self.chroms
    }

    pub fn chrom(&self, name: &str) -> Option<&ChromInfo> {
        self.chrom_ids.get(name).map(|&i| &self.chroms[i])
    }

    pub fn total_summary(&self) -> Option<&TotalSummary> {
        self.total_summary.as_ref()
    }

    /// Number of columns in BigBed entries, including the three coordinates.
    pub fn field_count(&self) -> u16 {
        self.header.field_count
    }

    fn index_offset(&self, resolution: Resolution) -> Result<u64> {
        match resolution {
            Resolution::BasePair => Ok(self.header.full_index_offset),
            Resolution::Zoom(level) => self
                .manifest
                .levels
                .get(level)
                .map(|l| l.index_offset)
                .ok_or_else(|| Error::OutOfRange(format!("no zoom level {}", level))),
        }
    }

    /// Searches the R-tree for `interval` and fetches the blocks it points
    /// to. `None` when the file has no such chromosome.
    pub async fn fetch_blocks(
        &self,
        fetcher: &dyn RangeFetcher,
        resolution: Resolution,
        interval: &ChromosomeInterval,
    ) -> Result<Option<RawBlocks>> {
        let Some(chrom) = self.chrom(&interval.chr) else {
            return Ok(None);
        };
        let index_offset = self.index_offset(resolution)?;
        let start = clamp_u32(interval.start);
        let end = clamp_u32(interval.end);

        let located: Vec<DataBlock> = cir_tree::search(
            fetcher,
            &self.url,
            self.endianness,
            index_offset,
            chrom.id,
            start,
            end,
        )
        .await?;
        let blocks = cir_tree::fetch_blocks(fetcher, &self.url, &located).await?;
        Ok(Some(RawBlocks {
            chrom_id: chrom.id,
            resolution,
            interval: interval.clone(),
            blocks,
        }))
    }

    /// Inflates and decodes fetched blocks. CPU bound.
    pub fn decode(&self, raw: &RawBlocks) -> Result<Vec<Record>> {
        let query = BlockQuery {
            chrom_id: raw.chrom_id,
            chr: &raw.interval.chr,
            start: raw.interval.start,
            end: raw.interval.end,
        };
        let mut out = Vec::new();
        for block in &raw.blocks {
            let data = records::inflate(block, self.header.uncompress_buf_size)?;
            match (raw.resolution, self.kind) {
                (Resolution::Zoom(_), _) => out.extend(
                    records::decode_summaries(&data, self.endianness, &query)?
                        .into_iter()
                        .map(Record::Summary),
                ),
                (Resolution::BasePair, BbiKind::BigWig) => out.extend(
                    records::decode_wig_section(&data, self.endianness, &query)?
                        .into_iter()
                        .map(Record::Numerical),
                ),
                (Resolution::BasePair, BbiKind::BigBed) => out.extend(
                    records::decode_bed_entries(&data, self.endianness, &query)?
                        .into_iter()
                        .map(Record::Bed),
                ),
            }
        }
        out.sort_by_key(|r| r.start());
        Ok(out)
    }

    /// Fetches and decodes records for `interval` at `resolution`.
    pub async fn read(
        &self,
        fetcher: &dyn RangeFetcher,
        resolution: Resolution,
        interval: &ChromosomeInterval,
    ) -> Result<Vec<Record>> {
        match self.fetch_blocks(fetcher, resolution, interval).await? {
            Some(raw) => self.decode(&raw),
            None => Ok(Vec::new()),
        }
    }

    /// Summary records of one zoom level overlapping `interval`.
    pub async fn read_summary(
        &self,
        fetcher: &dyn RangeFetcher,
        level: usize,
        interval: &ChromosomeInterval,
    ) -> Result<Vec<SummaryRecord>> {
        let records = self.read(fetcher, Resolution::Zoom(level), interval).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Summary(s) => Some(s),
                _ => None,
            })
            .collect())
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn parse_header(data: &[u8], endianness: Endianness) -> Result<Header> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    cursor.skip(4)?;
    let version = cursor.u16()?;
    let zoom_levels = cursor.u16()?;
    let chrom_tree_offset = cursor.u64()?;
    let full_data_offset = cursor.u64()?;
    let full_index_offset = cursor.u64()?;
    let field_count = cursor.u16()?;
    let _defined_field_count = cursor.u16()?;
    let _auto_sql_offset = cursor.u64()?;
    let total_summary_offset = cursor.u64()?;
    let uncompress_buf_size = cursor.u32()?;
    Ok(Header {
        version,
        zoom_levels,
        chrom_tree_offset,
        full_data_offset,
        full_index_offset,
        field_count,
        total_summary_offset,
        uncompress_buf_size,
    })
}

fn parse_zoom_headers(data: &[u8], count: u16, endianness: Endianness) -> Result<Vec<ZoomHeader>> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    (0..count)
        .map(|_| {
            let reduction_level = cursor.u32()?;
            let _reserved = cursor.u32()?;
            Ok(ZoomHeader {
                reduction_level,
                data_offset: cursor.u64()?,
                index_offset: cursor.u64()?,
            })
        })
        .collect()
}

fn parse_total_summary(data: &[u8], endianness: Endianness) -> Result<TotalSummary> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    Ok(TotalSummary {
        bases_covered: cursor.u64()?,
        min: cursor.f64()?,
        max: cursor.f64()?,
        sum: cursor.f64()?,
        sum_squares: cursor.f64()?,
    })
}

/// Walks the chromosome B+ tree. `data` holds the tree starting at file
/// offset `base`; child pointers are file offsets.
fn parse_chrom_tree(data: &[u8], base: u64, endianness: Endianness) -> Result<Vec<ChromInfo>> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let magic = cursor.u32()?;
    if magic != CHROM_TREE_MAGIC {
        return Err(Error::CorruptFile(format!(
            "bad chromosome tree magic {:#x}",
            magic
        )));
    }
    let _block_size = cursor.u32()?;
    let key_size = cursor.u32()? as usize;
    let value_size = cursor.u32()?;
    let item_count = cursor.u64()?;
    if value_size != 8 {
        return Err(Error::CorruptFile(format!(
            "chromosome tree value size {} (expected 8)",
            value_size
        )));
    }

    let mut chroms = Vec::with_capacity(item_count.min(1 << 16) as usize);
    let mut pending = vec![CHROM_TREE_HEADER_SIZE];
    let mut visited = HashSet::new();
    while let Some(node) = pending.pop() {
        if !visited.insert(node) {
            return Err(Error::CorruptFile(format!(
                "chromosome tree node at offset {} is reached twice",
                base + node as u64
            )));
        }
        cursor.seek(node)?;
        let is_leaf = cursor.u8()?;
        let _reserved = cursor.u8()?;
        let count = cursor.u16()?;
        let mut children = Vec::new();
        for _ in 0..count {
            let key = cursor.take(key_size)?;
            let name_len = key.iter().position(|&b| b == 0).unwrap_or(key.len());
            let name = std::str::from_utf8(&key[..name_len])
                .map_err(|_| Error::CorruptFile("chromosome name is not UTF-8".to_string()))?;
            if is_leaf == 1 {
                let id = cursor.u32()?;
                let length = cursor.u32()?;
                chroms.push(ChromInfo {
                    name: name.to_string(),
                    id,
                    length,
                });
            } else {
                let child = cursor.u64()?;
                let relative = child
                    .checked_sub(base)
                    .ok_or_else(|| Error::CorruptFile("chromosome tree child before tree".to_string()))?;
                children.push(relative as usize);
            }
        }
        // Keep name order: children are visited first to last.
        pending.extend(children.into_iter().rev());
    }
    Ok(chroms)
}
