use super::{DataSource, DecodePool, FileCache, TrackOptions, closed_error, finish_records};
use crate::formats::bed::parse_and_filter;
use crate::formats::{BinningIndex, Record, TabixHeader, bgzf};
use crate::model::ChromosomeInterval;
use crate::storage::RangeFetcher;
use crate::Result;
use async_trait::async_trait;
use noodles::bgzf::VirtualPosition;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Reads a tabix-indexed BGZF text file.
pub struct TabixSource {
    url: String,
    index_url: String,
    fetcher: Arc<dyn RangeFetcher>,
    index_fetcher: Arc<dyn RangeFetcher>,
    indexes: Arc<FileCache<BinningIndex>>,
    pool: DecodePool,
    data_limit: usize,
    closed: AtomicBool,
}

impl TabixSource {
    pub fn new(
        url: String,
        index_url: String,
        fetcher: Arc<dyn RangeFetcher>,
        index_fetcher: Arc<dyn RangeFetcher>,
        indexes: Arc<FileCache<BinningIndex>>,
        pool: DecodePool,
        data_limit: usize,
    ) -> Self {
        Self {
            url,
            index_url,
            fetcher,
            index_fetcher,
            indexes,
            pool,
            data_limit,
            closed: AtomicBool::new(false),
        }
    }

    async fn index(&self) -> Result<Arc<BinningIndex>> {
        self.indexes
            .get_or_build(&self.index_url, || async {
                let raw = self.index_fetcher.fetch(&self.index_url, None).await?;
                debug!(url = %self.index_url, bytes = raw.len(), "fetched index");
                self.pool.run(move || BinningIndex::from_bytes(&raw)).await
            })
            .await
    }

    async fn fetch_locus(
        &self,
        index: &BinningIndex,
        locus: &ChromosomeInterval,
        options: &TrackOptions,
    ) -> Result<Vec<Record>> {
        let file_chr = options.file_chrom(&locus.chr);
        let Some(ref_id) = index.reference_id(&file_chr) else {
            debug!(url = %self.url, chr = %file_chr, "chromosome not in index");
            return Ok(Vec::new());
        };
        let layout = index.header().cloned().unwrap_or_else(TabixHeader::bed);
        let query = ChromosomeInterval::new(file_chr, locus.start, locus.end);

        let chunks = index.chunks_for_range(ref_id, locus.start, locus.end);
        debug!(url = %self.url, locus = %locus, chunks = chunks.len(), "tabix query");

        let mut records = Vec::new();
        for chunk in chunks {
            let range = chunk.byte_range();
            let bytes = self.fetcher.fetch(&self.url, Some(range)).await?;
            let layout = layout.clone();
            let query = query.clone();
            let assume_sorted = options.assume_sorted;
            let at_file_start = chunk.begin == VirtualPosition::from(0);
            let parsed = self
                .pool
                .run(move || {
                    let raw = bgzf::decode_range(&bytes, range.start, chunk.begin, chunk.end)?;
                    let text = String::from_utf8_lossy(&raw);
                    let body = if at_file_start {
                        skip_lines(&text, layout.skip)
                    } else {
                        &text
                    };
                    Ok(parse_and_filter(body, &query, &layout, assume_sorted))
                })
                .await?;
            records.extend(parsed.into_iter().map(Record::Bed));
        }
        Ok(finish_records(records, locus, options, self.data_limit))
    }
}

fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return "",
        }
    }
    rest
}

#[async_trait]
impl DataSource for TabixSource {
    async fn fetch_loci(
        &self,
        loci: &[ChromosomeInterval],
        _bases_per_pixel: f64,
        options: &TrackOptions,
    ) -> Result<Vec<Record>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error(&self.url));
        }
        let index = self.index().await?;
        let mut records = Vec::new();
        for locus in loci {
            records.extend(self.fetch_locus(&index, locus, options).await?);
        }
        Ok(records)
    }

    fn clean_up(&self) {
        debug!(url = %self.url, "closing tabix source");
        self.closed.store(true, Ordering::Release);
    }
}
