//! Chromosome-interval R-tree ("CIR tree") search.
//!
//! The tree maps `(chromId, base)` ranges to compressed data blocks. Each
//! node starts with `isLeaf u8, reserved u8, count u16`; leaf items are 32
//! bytes (range plus block offset and size), interior items 24 bytes (range
//! plus child node offset).

use crate::formats::cursor::Cursor;
use byteordered::Endianness;
use crate::storage::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CIR_TREE_HEADER_SIZE: u64 = 48;
const NODE_HEADER_SIZE: u64 = 4;
const LEAF_ITEM_SIZE: u64 = 32;
const INTERIOR_ITEM_SIZE: u64 = 24;

/// A compressed data block located by the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlock {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
struct ItemRange {
    start_chrom: u32,
    start_base: u32,
    end_chrom: u32,
    end_base: u32,
}

impl ItemRange {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            start_chrom: cursor.u32()?,
            start_base: cursor.u32()?,
            end_chrom: cursor.u32()?,
            end_base: cursor.u32()?,
        })
    }

    /// Whether the item range meets `[start, end)` on `chrom`.
    fn overlaps(&self, chrom: u32, start: u32, end: u32) -> bool {
        (chrom, start) < (self.end_chrom, self.end_base)
            && (chrom, end) > (self.start_chrom, self.start_base)
    }
}

enum Node {
    Leaf(Vec<(ItemRange, DataBlock)>),
    Interior(Vec<(ItemRange, u64)>),
}

fn parse_node(data: &[u8], endianness: Endianness) -> Result<Node> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let is_leaf = cursor.u8()?;
    let _reserved = cursor.u8()?;
    let count = usize::from(cursor.u16()?);
    match is_leaf {
        1 => {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let range = ItemRange::read(&mut cursor)?;
                let offset = cursor.u64()?;
                let size = cursor.u64()?;
                items.push((range, DataBlock { offset, size }));
            }
            Ok(Node::Leaf(items))
        }
        0 => {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let range = ItemRange::read(&mut cursor)?;
                items.push((range, cursor.u64()?));
            }
            Ok(Node::Interior(items))
        }
        other => Err(Error::CorruptFile(format!("bad R-tree node flag {}", other))),
    }
}

/// Parses the 48 byte tree header and returns the maximum items per node.
pub(crate) fn parse_header(data: &[u8], endianness: Endianness) -> Result<u32> {
    let mut cursor = Cursor::new(data, Error::CorruptFile).endianness(endianness);
    let magic = cursor.u32()?;
    if magic != CIR_TREE_MAGIC {
        return Err(Error::CorruptFile(format!("bad R-tree magic {:#x}", magic)));
    }
    let block_size = cursor.u32()?;
    if block_size == 0 {
        return Err(Error::CorruptFile("R-tree block size is 0".to_string()));
    }
    Ok(block_size)
}

/// Finds every data block overlapping `[start, end)` on `chrom` in the tree
/// whose header is at `index_offset`. Nodes are read breadth first, one
/// range request per node sized for a full node.
pub async fn search(
    fetcher: &dyn RangeFetcher,
    url: &str,
    endianness: Endianness,
    index_offset: u64,
    chrom: u32,
    start: u32,
    end: u32,
) -> Result<Vec<DataBlock>> {
    let header = fetcher
        .fetch(url, Some(ByteRange::with_length(index_offset, CIR_TREE_HEADER_SIZE)))
        .await?;
    let block_size = u64::from(parse_header(&header, endianness)?);
    let node_size = NODE_HEADER_SIZE + block_size * LEAF_ITEM_SIZE.max(INTERIOR_ITEM_SIZE);

    let mut queue = VecDeque::from([index_offset + CIR_TREE_HEADER_SIZE]);
    let mut blocks = Vec::new();
    let mut visited = HashSet::new();
    while let Some(offset) = queue.pop_front() {
        if !visited.insert(offset) {
            return Err(Error::CorruptFile(format!(
                "R-tree node at offset {} is reached twice",
                offset
            )));
        }
        let data = fetcher
            .fetch(url, Some(ByteRange::with_length(offset, node_size)))
            .await?;
        match parse_node(&data, endianness)? {
            Node::Leaf(items) => blocks.extend(
                items
                    .into_iter()
                    .filter(|(range, _)| range.overlaps(chrom, start, end))
                    .map(|(_, block)| block),
            ),
            Node::Interior(items) => queue.extend(
                items
                    .into_iter()
                    .filter(|(range, _)| range.overlaps(chrom, start, end))
                    .map(|(_, child)| child),
            ),
        }
    }
    debug!(url, index_offset, nodes_read = visited.len(), blocks = blocks.len(), "R-tree search");
    Ok(blocks)
}

/// Fetches blocks, coalescing runs of adjacent blocks into single requests.
pub async fn fetch_blocks(
    fetcher: &dyn RangeFetcher,
    url: &str,
    blocks: &[DataBlock],
) -> Result<Vec<Bytes>> {
    let mut sorted = blocks.to_vec();
    sorted.sort_by_key(|b| b.offset);

    let mut out = Vec::with_capacity(sorted.len());
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].offset == sorted[j - 1].offset + sorted[j - 1].size {
            j += 1;
        }
        let first = sorted[i];
        let total: u64 = sorted[i..j].iter().map(|b| b.size).sum();
        let bytes = fetcher
            .fetch(url, Some(ByteRange::with_length(first.offset, total)))
            .await?;
        if (bytes.len() as u64) < total {
            return Err(Error::CorruptFile(format!(
                "data block at {} truncated: {} of {} bytes",
                first.offset,
                bytes.len(),
                total
            )));
        }
        for block in &sorted[i..j] {
            let from = (block.offset - first.offset) as usize;
            out.push(bytes.slice(from..from + block.size as usize));
        }
        i = j;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_overlap() {
        let range = ItemRange {
            start_chrom: 0,
            start_base: 100,
            end_chrom: 1,
            end_base: 50,
        };
        assert!(range.overlaps(0, 150, 160));
        assert!(range.overlaps(1, 0, 10));
        assert!(!range.overlaps(1, 50, 60));
        assert!(!range.overlaps(0, 0, 100));
        assert!(!range.overlaps(2, 0, 10));
    }

    #[test]
    fn test_rejects_bad_node_flag() {
        let data = [7u8, 0, 0, 0];
        assert!(matches!(parse_node(&data, Endianness::Little), Err(Error::CorruptFile(_))));
    }
}
