use super::{DataSource, DecodePool, FileCache, TrackOptions, closed_error, finish_records};
use crate::formats::{BbiFile, Record, Resolution};
use crate::model::ChromosomeInterval;
use crate::storage::RangeFetcher;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Reads a BigWig or BigBed file, choosing the zoom level from the
/// requested bases per pixel.
pub struct BigSource {
    url: String,
    fetcher: Arc<dyn RangeFetcher>,
    files: Arc<FileCache<BbiFile>>,
    pool: DecodePool,
    data_limit: usize,
    closed: AtomicBool,
}

impl BigSource {
    pub fn new(
        url: String,
        fetcher: Arc<dyn RangeFetcher>,
        files: Arc<FileCache<BbiFile>>,
        pool: DecodePool,
        data_limit: usize,
    ) -> Self {
        Self {
            url,
            fetcher,
            files,
            pool,
            data_limit,
            closed: AtomicBool::new(false),
        }
    }

    async fn file(&self) -> Result<Arc<BbiFile>> {
        self.files
            .get_or_build(&self.url, || BbiFile::open(self.fetcher.as_ref(), &self.url))
            .await
    }
}

#[async_trait]
impl DataSource for BigSource {
    async fn fetch_loci(
        &self,
        loci: &[ChromosomeInterval],
        bases_per_pixel: f64,
        options: &TrackOptions,
    ) -> Result<Vec<Record>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error(&self.url));
        }
        let file = self.file().await?;
        let resolution = file.manifest().select_level(bases_per_pixel);
        debug!(url = %self.url, bases_per_pixel, ?resolution, "selected resolution");

        let mut records = Vec::new();
        for locus in loci {
            let query = ChromosomeInterval::new(options.file_chrom(&locus.chr), locus.start, locus.end);
            let Some(raw) = file.fetch_blocks(self.fetcher.as_ref(), resolution, &query).await? else {
                continue;
            };
            let decoder = file.clone();
            let decoded = self.pool.run(move || decoder.decode(&raw)).await?;
            records.extend(finish_records(decoded, locus, options, self.data_limit));
        }
        Ok(records)
    }

    fn clean_up(&self) {
        debug!(url = %self.url, "closing BBI source");
        self.closed.store(true, Ordering::Release);
    }
}

impl BigSource {
    /// Resolution a query at `bases_per_pixel` would read.
    pub async fn resolution_for(&self, bases_per_pixel: f64) -> Result<Resolution> {
        Ok(self.file().await?.manifest().select_level(bases_per_pixel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::NumericalRecord;
    use crate::formats::bbi::writer::BbiWriter;
    use crate::sources::DEFAULT_DATA_LIMIT;
    use crate::storage::MemoryFetcher;

    fn source() -> BigSource {
        let values: Vec<NumericalRecord> = (0..1_000u64)
            .map(|i| NumericalRecord {
                chr: "1".to_string(),
                start: i * 10,
                end: i * 10 + 10,
                value: 1.0,
            })
            .collect();
        let data = BbiWriter::new(vec![("1".into(), 10_000)])
            .zoom_levels(vec![100, 1_000])
            .write_bigwig(&values)
            .unwrap();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://a.bw", data);
        BigSource::new(
            "mem://a.bw".to_string(),
            Arc::new(fetcher),
            Arc::new(FileCache::new(8)),
            DecodePool::new(2),
            DEFAULT_DATA_LIMIT,
        )
    }

    #[tokio::test]
    async fn test_resolution_follows_bases_per_pixel() {
        let source = source();
        assert_eq!(source.resolution_for(1.0).await.unwrap(), Resolution::BasePair);
        assert_eq!(source.resolution_for(500.0).await.unwrap(), Resolution::Zoom(0));
        assert_eq!(source.resolution_for(1e6).await.unwrap(), Resolution::Zoom(1));
    }

    #[tokio::test]
    async fn test_ensembl_names_map_back() {
        let source = source();
        let options = TrackOptions {
            ensembl_style: true,
            ..Default::default()
        };
        let loci = [ChromosomeInterval::new("chr1", 0, 10_000)];

        let records = source.fetch_loci(&loci, 2_000.0, &options).await.unwrap();
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| matches!(r, Record::Summary(_)) && r.chr() == "chr1"));

        let records = source.fetch_loci(&loci, 1.0, &options).await.unwrap();
        assert_eq!(records.len(), 1_000);
        assert!(matches!(records[0], Record::Numerical(_)));

        let plain = source
            .fetch_loci(&loci, 1.0, &TrackOptions::default())
            .await
            .unwrap();
        assert!(plain.is_empty());
    }
}
