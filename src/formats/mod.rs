//! Readers for indexed genomic file formats.
//!
//! - [`bgzf`] - BGZF block codec
//! - [`tabix`] - tabix/BAI binning indexes over BGZF text files
//! - [`bed`] - tab-delimited record parsing and interval filtering
//! - [`bbi`] - BigWig/BigBed headers, zoom levels and R-tree search
//!
//! Every reader works on bytes obtained through a
//! [`RangeFetcher`](crate::storage::RangeFetcher) and returns [`Record`]s.

pub mod bbi;
pub mod bed;
pub mod bgzf;
mod cursor;
pub mod tabix;

pub use bbi::{BbiFile, BbiKind, NumericalRecord, Resolution, SummaryRecord, ZoomManifest};
pub use bed::BedRecord;
pub use tabix::{BinningIndex, Chunk, TabixHeader, TabixWriter};

use serde::Serialize;

/// Any record a track can display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Bed(BedRecord),
    Numerical(NumericalRecord),
    Summary(SummaryRecord),
}

impl Record {
    pub fn chr(&self) -> &str {
        match self {
            Record::Bed(r) => &r.chr,
            Record::Numerical(r) => &r.chr,
            Record::Summary(r) => &r.chr,
        }
    }

    pub fn start(&self) -> u64 {
        match self {
            Record::Bed(r) => r.start,
            Record::Numerical(r) => r.start,
            Record::Summary(r) => r.start,
        }
    }

    pub fn end(&self) -> u64 {
        match self {
            Record::Bed(r) => r.end,
            Record::Numerical(r) => r.end,
            Record::Summary(r) => r.end,
        }
    }

    /// Rewrites the chromosome name, used when a file names chromosomes
    /// differently from the displayed genome.
    pub fn set_chr(&mut self, chr: &str) {
        let field = match self {
            Record::Bed(r) => &mut r.chr,
            Record::Numerical(r) => &mut r.chr,
            Record::Summary(r) => &mut r.chr,
        };
        chr.clone_into(field);
    }
}
