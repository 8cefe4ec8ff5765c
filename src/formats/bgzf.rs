//! BGZF block codec.
//!
//! A BGZF file is a series of gzip members, each at most 64 KiB compressed,
//! whose header carries a `BC` extra subfield holding the member size. Every
//! block is an independent deflate stream, so any block can be inflated on
//! its own given its compressed offset. Positions inside a BGZF file are
//! [`VirtualPosition`]s: compressed block offset plus offset into the
//! inflated block.

use crate::{Error, Result};
use flate2::Compression;
use flate2::Crc;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use noodles::bgzf::VirtualPosition;
use std::io::{Read, Write};

/// Upper bound on the compressed size of one block.
pub const MAX_BLOCK_SIZE: u64 = 65536;

const HEADER_SIZE: usize = 18;
const FOOTER_SIZE: usize = 8;
const GZIP_ID1: u8 = 31;
const GZIP_ID2: u8 = 139;
const FLG_FEXTRA: u8 = 4;

// Largest payload per written block, leaving headroom for incompressible data.
const MAX_PAYLOAD: usize = 0xff00;

/// The empty block that terminates a BGZF file.
pub const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// One inflated block.
#[derive(Debug, Clone)]
pub struct Block {
    /// Compressed offset of the block in the file.
    pub offset: u64,
    pub compressed_size: usize,
    pub data: Vec<u8>,
}

/// Size of the complete block starting at `data[0]`, or `None` if `data` is
/// shorter than the block.
fn block_size(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }
    if data[0] != GZIP_ID1 || data[1] != GZIP_ID2 {
        return Err(Error::CorruptFile("bad BGZF magic".to_string()));
    }
    if data[3] & FLG_FEXTRA == 0 {
        return Err(Error::CorruptFile("BGZF block without extra field".to_string()));
    }

    let xlen = u16::from_le_bytes([data[10], data[11]]) as usize;
    if data.len() < 12 + xlen {
        return Ok(None);
    }
    let mut extra = &data[12..12 + xlen];
    while extra.len() >= 4 {
        let slen = u16::from_le_bytes([extra[2], extra[3]]) as usize;
        if extra[0] == b'B' && extra[1] == b'C' && slen == 2 && extra.len() >= 6 {
            let bsize = u16::from_le_bytes([extra[4], extra[5]]) as usize + 1;
            return Ok((data.len() >= bsize).then_some(bsize));
        }
        extra = extra.get(4 + slen..).unwrap_or_default();
    }
    Err(Error::CorruptFile("BGZF block without BC subfield".to_string()))
}

fn inflate_block(block: &[u8]) -> Result<Vec<u8>> {
    let xlen = u16::from_le_bytes([block[10], block[11]]) as usize;
    let cdata_start = 12 + xlen;
    if block.len() < cdata_start + FOOTER_SIZE {
        return Err(Error::CorruptFile("BGZF block shorter than its header".to_string()));
    }
    let footer = &block[block.len() - FOOTER_SIZE..];
    let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let expected_size = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

    let mut data = Vec::with_capacity(expected_size);
    DeflateDecoder::new(&block[cdata_start..block.len() - FOOTER_SIZE])
        .read_to_end(&mut data)
        .map_err(|e| Error::CorruptFile(format!("BGZF inflate failed: {}", e)))?;

    if data.len() != expected_size {
        return Err(Error::CorruptFile(format!(
            "BGZF block inflated to {} bytes, header says {}",
            data.len(),
            expected_size
        )));
    }
    let mut crc = Crc::new();
    crc.update(&data);
    if crc.sum() != expected_crc {
        return Err(Error::CorruptFile("BGZF block CRC mismatch".to_string()));
    }
    Ok(data)
}

/// Inflates every complete block in `data`, which starts at compressed file
/// offset `base_offset`. A trailing partial block is ignored: range requests
/// routinely end inside one.
pub fn decode_blocks(data: &[u8], base_offset: u64) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some(size) = block_size(&data[pos..])? else {
            break;
        };
        blocks.push(Block {
            offset: base_offset + pos as u64,
            compressed_size: size,
            data: inflate_block(&data[pos..pos + size])?,
        });
        pos += size;
    }
    Ok(blocks)
}

/// Inflates the bytes between two virtual positions. `data` must start at
/// compressed offset `base_offset <= begin.compressed()`.
///
/// Output starts `begin.uncompressed()` bytes into the first block and stops
/// at `end`. If the fetched bytes end before `end` the output is whatever the
/// complete blocks held.
pub fn decode_range(
    data: &[u8],
    base_offset: u64,
    begin: VirtualPosition,
    end: VirtualPosition,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let offset = base_offset + pos as u64;
        if offset > end.compressed() {
            break;
        }
        let Some(size) = block_size(&data[pos..])? else {
            break;
        };
        pos += size;
        if offset < begin.compressed() {
            continue;
        }

        let block = inflate_block(&data[pos - size..pos])?;
        let from = if offset == begin.compressed() {
            usize::from(begin.uncompressed()).min(block.len())
        } else {
            0
        };
        let to = if offset == end.compressed() {
            usize::from(end.uncompressed()).min(block.len())
        } else {
            block.len()
        };
        if from < to {
            out.extend_from_slice(&block[from..to]);
        }
    }
    Ok(out)
}

/// Writes BGZF blocks into memory, tracking the virtual position of every
/// byte written.
#[derive(Debug, Default)]
pub struct Writer {
    out: Vec<u8>,
    pending: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual position of the next byte to be written.
    pub fn virtual_position(&self) -> VirtualPosition {
        let compressed = self.out.len() as u64;
        let uncompressed = self.pending.len() as u64;
        VirtualPosition::from((compressed << 16) | uncompressed)
    }

    pub fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let room = MAX_PAYLOAD - self.pending.len();
            let n = room.min(bytes.len());
            self.pending.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            if self.pending.len() == MAX_PAYLOAD {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// Closes the current block so that the next write starts a new one.
    pub fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let block = compress_block(&self.pending)?;
        self.out.extend_from_slice(&block);
        self.pending.clear();
        Ok(())
    }

    /// Flushes, appends the EOF marker block and returns the file bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.flush_block()?;
        self.out.extend_from_slice(&EOF_BLOCK);
        Ok(self.out)
    }
}

fn compress_block(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let cdata = encoder.finish()?;

    let bsize = HEADER_SIZE + cdata.len() + FOOTER_SIZE;
    let bsize_field = u16::try_from(bsize - 1)
        .map_err(|_| Error::Internal("BGZF block exceeds 64 KiB".to_string()))?;

    let mut crc = Crc::new();
    crc.update(payload);

    let mut block = Vec::with_capacity(bsize);
    block.extend_from_slice(&[GZIP_ID1, GZIP_ID2, 8, FLG_FEXTRA, 0, 0, 0, 0, 0, 0xff]);
    block.extend_from_slice(&6u16.to_le_bytes());
    block.extend_from_slice(b"BC");
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&bsize_field.to_le_bytes());
    block.extend_from_slice(&cdata);
    block.extend_from_slice(&crc.sum().to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    Ok(block)
}
