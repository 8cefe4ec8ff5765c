//! Decoding of BBI data blocks.
//!
//! ```text
//! zoom record (32 bytes)
//!   chromId u32, start u32, end u32, validCount u32,
//!   minVal f32, maxVal f32, sumData f32, sumSquares f32
//!
//! bigWig section: 24 byte header then items
//!   chromId u32, start u32, end u32, itemStep u32, itemSpan u32,
//!   type u8, reserved u8, itemCount u16
//!   bedGraph (1): start u32, end u32, value f32
//!   varStep  (2): start u32, value f32
//!   fixedStep(3): value f32
//!
//! bigBed entry
//!   chromId u32, start u32, end u32, rest (NUL terminated)
//! ```

use crate::formats::bed::BedRecord;
use crate::formats::cursor::Cursor;
use byteordered::Endianness;
use crate::{Error, Result};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use std::io::Read;

pub(crate) const ZOOM_RECORD_SIZE: usize = 32;
pub(crate) const SECTION_HEADER_SIZE: usize = 24;

pub(crate) const SECTION_BED_GRAPH: u8 = 1;
pub(crate) const SECTION_VAR_STEP: u8 = 2;
pub(crate) const SECTION_FIXED_STEP: u8 = 3;

/// Aggregate of a run of bases at some zoom level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub chr: String,
    pub start: u64,
    pub end: u64,
    /// Number of bases with data.
    pub valid_count: u32,
    pub min: f32,
    pub max: f32,
    pub sum: f32,
    pub sum_squares: f32,
}

impl SummaryRecord {
    pub fn mean(&self) -> f64 {
        if self.valid_count == 0 {
            0.0
        } else {
            f64::from(self.sum) / f64::from(self.valid_count)
        }
    }
}

/// One base-pair resolution bigWig value over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericalRecord {
    pub chr: String,
    pub start: u64,
    pub end: u64,
    pub value: f32,
}

/// The chromosome and interval a block is decoded for. Records outside it
/// are dropped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockQuery<'a> {
    pub chrom_id: u32,
    pub chr: &'a str,
    pub start: u64,
    pub end: u64,
}

impl BlockQuery<'_> {
    fn keeps(&self, chrom_id: u32, start: u64, end: u64) -> bool {
        chrom_id == self.chrom_id && start < self.end && end > self.start
    }
}

/// Inflates a block when the file is compressed (`uncompress_buf_size > 0`).
pub(crate) fn inflate(raw: &[u8], uncompress_buf_size: u32) -> Result<Vec<u8>> {
    if uncompress_buf_size == 0 {
        return Ok(raw.to_vec());
    }
    let mut out = Vec::with_capacity(uncompress_buf_size as usize);
    ZlibDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| Error::CorruptFile(format!("failed to inflate BBI block: {}", e)))?;
    Ok(out)
}

pub(crate) fn decode_summaries(
    data: &[u8],
    endianness: Endianness,
    query: &BlockQuery<'_>,
) -> Result<Vec<SummaryRecord>> {
    if data.len() % ZOOM_RECORD_SIZE != 0 {
        return Err(Error::CorruptFile(format!(
            "zoom block of {} bytes is not a whole number of records",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let mut records = Vec::with_capacity(data.len() / ZOOM_RECORD_SIZE);
    while !cursor.is_empty() {
        let chrom_id = cursor.u32()?;
        let start = u64::from(cursor.u32()?);
        let end = u64::from(cursor.u32()?);
        let valid_count = cursor.u32()?;
        let min = cursor.f32()?;
        let max = cursor.f32()?;
        let sum = cursor.f32()?;
        let sum_squares = cursor.f32()?;
        if query.keeps(chrom_id, start, end) {
            records.push(SummaryRecord {
                chr: query.chr.to_string(),
                start,
                end,
                valid_count,
                min,
                max,
                sum,
                sum_squares,
            });
        }
    }
    Ok(records)
}

pub(crate) fn decode_wig_section(
    data: &[u8],
    endianness: Endianness,
    query: &BlockQuery<'_>,
) -> Result<Vec<NumericalRecord>> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let chrom_id = cursor.u32()?;
    let section_start = u64::from(cursor.u32()?);
    let _section_end = cursor.u32()?;
    let step = u64::from(cursor.u32()?);
    let span = u64::from(cursor.u32()?);
    let kind = cursor.u8()?;
    let _reserved = cursor.u8()?;
    let count = cursor.u16()?;
    debug_assert_eq!(cursor.position(), SECTION_HEADER_SIZE);

    let mut records = Vec::with_capacity(usize::from(count));
    for i in 0..u64::from(count) {
        let (start, end, value) = match kind {
            SECTION_BED_GRAPH => {
                let start = u64::from(cursor.u32()?);
                let end = u64::from(cursor.u32()?);
                (start, end, cursor.f32()?)
            }
            SECTION_VAR_STEP => {
                let start = u64::from(cursor.u32()?);
                (start, start + span, cursor.f32()?)
            }
            SECTION_FIXED_STEP => {
                let start = section_start + i * step;
                (start, start + span, cursor.f32()?)
            }
            other => {
                return Err(Error::CorruptFile(format!(
                    "unknown bigWig section type {}",
                    other
                )));
            }
        };
        if query.keeps(chrom_id, start, end) {
            records.push(NumericalRecord {
                chr: query.chr.to_string(),
                start,
                end,
                value,
            });
        }
    }
    Ok(records)
}

pub(crate) fn decode_bed_entries(
    data: &[u8],
    endianness: Endianness,
    query: &BlockQuery<'_>,
) -> Result<Vec<BedRecord>> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let mut records = Vec::new();
    while !cursor.is_empty() {
        let chrom_id = cursor.u32()?;
        let start = u64::from(cursor.u32()?);
        let end = u64::from(cursor.u32()?);
        let rest = cursor.c_string()?;
        if query.keeps(chrom_id, start, end) {
            let rest = String::from_utf8_lossy(rest);
            records.push(BedRecord {
                chr: query.chr.to_string(),
                start,
                end,
                rest: if rest.is_empty() {
                    Vec::new()
                } else {
                    rest.split('\t').map(str::to_string).collect()
                },
            });
        }
    }
    Ok(records)
}
