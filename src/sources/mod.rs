//! Track data sources.
//!
//! A [`DataSource`] turns genome intervals into [`Record`]s for one remote
//! file. Sources share a [`DecodePool`] for CPU-bound work and per-URL
//! [`FileCache`]s so that every track over the same file reuses one parsed
//! index or header.

mod big;
mod cache;
mod pool;
mod tabix;

pub use big::BigSource;
pub use cache::FileCache;
pub use pool::DecodePool;
pub use tabix::TabixSource;

use crate::formats::bed::ensure_max_len;
use crate::formats::{BbiFile, BinningIndex, Record};
use crate::model::{ChromosomeInterval, DisplayedRegionModel};
#[cfg(feature = "http")]
use crate::storage::HttpFetcher;
use crate::storage::{LocalFetcher, RangeFetcher};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Most records a single query returns before thinning.
pub const DEFAULT_DATA_LIMIT: usize = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Tabix-indexed BGZF text: BED, bedGraph and friends.
    Bed,
    BigWig,
    BigBed,
}

impl TrackKind {
    /// Guesses the kind from a file name.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".bw") || path.ends_with(".bigwig") {
            Some(TrackKind::BigWig)
        } else if path.ends_with(".bb") || path.ends_with(".bigbed") {
            Some(TrackKind::BigBed)
        } else if path.ends_with(".gz") || path.ends_with(".bgz") {
            Some(TrackKind::Bed)
        } else {
            None
        }
    }
}

/// Per-track options. Fields named here change what is fetched; anything
/// else is kept verbatim for display and never triggers a refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOptions {
    /// The file names chromosomes without a `chr` prefix.
    pub ensembl_style: bool,
    /// Records above this count are evenly thinned.
    pub data_limit: Option<usize>,
    /// Stop scanning text at the first record past the query end.
    pub assume_sorted: bool,
    #[serde(flatten)]
    pub display: serde_json::Map<String, serde_json::Value>,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            ensembl_style: false,
            data_limit: None,
            assume_sorted: true,
            display: serde_json::Map::new(),
        }
    }
}

impl TrackOptions {
    /// Identity of the fetch-affecting options.
    pub fn fetch_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.ensembl_style,
            self.data_limit.map_or_else(|| "-".to_string(), |n| n.to_string()),
            self.assume_sorted
        )
    }

    pub fn effective_data_limit(&self, default: usize) -> usize {
        self.data_limit.unwrap_or(default)
    }

    /// Chromosome name as the file spells it.
    pub fn file_chrom(&self, chr: &str) -> String {
        if !self.ensembl_style {
            return chr.to_string();
        }
        match chr.strip_prefix("chr").unwrap_or(chr) {
            "M" => "MT".to_string(),
            stripped => stripped.to_string(),
        }
    }
}

/// What a track reads and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub kind: TrackKind,
    pub url: String,
    /// Tabix index location; `<url>.tbi` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
    #[serde(default)]
    pub options: TrackOptions,
}

impl TrackSpec {
    /// Whether switching from `self` to `other` needs a new source.
    pub fn same_source(&self, other: &TrackSpec) -> bool {
        self.kind == other.kind && self.url == other.url && self.index_url == other.index_url
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Records overlapping each locus, in locus order.
    async fn fetch_loci(
        &self,
        loci: &[ChromosomeInterval],
        bases_per_pixel: f64,
        options: &TrackOptions,
    ) -> Result<Vec<Record>>;

    /// Records for every genome interval the region covers. An empty result
    /// is valid.
    async fn get_data(
        &self,
        region: &DisplayedRegionModel,
        bases_per_pixel: f64,
        options: &TrackOptions,
    ) -> Result<Vec<Record>> {
        let loci = region.genome_intervals();
        self.fetch_loci(&loci, bases_per_pixel, options).await
    }

    /// Releases whatever the source holds. Later fetches fail.
    fn clean_up(&self) {}
}

/// Maps records read under the file's chromosome names back to the genome's
/// and applies the data limit.
pub(crate) fn finish_records(
    mut records: Vec<Record>,
    locus: &ChromosomeInterval,
    options: &TrackOptions,
    default_limit: usize,
) -> Vec<Record> {
    if options.ensembl_style {
        for record in &mut records {
            record.set_chr(&locus.chr);
        }
    }
    ensure_max_len(records, options.effective_data_limit(default_limit))
}

pub(crate) fn closed_error(url: &str) -> Error {
    Error::Internal(format!("data source for {} was cleaned up", url))
}

/// Builds sources for track specs, routing URLs to fetchers and sharing
/// caches and the decode pool between all of them.
#[derive(Clone)]
pub struct SourceFactory {
    local: Arc<dyn RangeFetcher>,
    remote: Option<Arc<dyn RangeFetcher>>,
    indexes: Arc<FileCache<BinningIndex>>,
    bbi_files: Arc<FileCache<BbiFile>>,
    pool: DecodePool,
    data_limit: usize,
}

impl SourceFactory {
    /// Local paths resolve under `data_dir`.
    pub fn new(data_dir: PathBuf, pool: DecodePool, cache_capacity: u64, data_limit: usize) -> Self {
        Self {
            local: Arc::new(LocalFetcher::new(data_dir)),
            remote: None,
            indexes: Arc::new(FileCache::new(cache_capacity)),
            bbi_files: Arc::new(FileCache::new(cache_capacity)),
            pool,
            data_limit,
        }
    }

    /// Enables `http://` and `https://` URLs.
    #[cfg(feature = "http")]
    pub fn with_http(mut self, timeout: Duration) -> Result<Self> {
        self.remote = Some(Arc::new(HttpFetcher::new(timeout)?));
        Ok(self)
    }

    #[cfg(not(feature = "http"))]
    pub fn with_http(self, _timeout: Duration) -> Result<Self> {
        Ok(self)
    }

    /// Routes every URL to `fetcher`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RangeFetcher>) -> Self {
        self.local = fetcher.clone();
        self.remote = Some(fetcher);
        self
    }

    pub fn pool(&self) -> &DecodePool {
        &self.pool
    }

    fn fetcher_for(&self, url: &str) -> Result<Arc<dyn RangeFetcher>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.remote.clone().ok_or_else(|| {
                Error::UnsupportedFormat(format!("remote URLs are not enabled: {}", url))
            })
        } else {
            Ok(self.local.clone())
        }
    }

    pub fn create(&self, spec: &TrackSpec) -> Result<Arc<dyn DataSource>> {
        let fetcher = self.fetcher_for(&spec.url)?;
        Ok(match spec.kind {
            TrackKind::Bed => {
                let index_url = spec
                    .index_url
                    .clone()
                    .unwrap_or_else(|| format!("{}.tbi", spec.url));
                let index_fetcher = self.fetcher_for(&index_url)?;
                Arc::new(TabixSource::new(
                    spec.url.clone(),
                    index_url,
                    fetcher,
                    index_fetcher,
                    self.indexes.clone(),
                    self.pool.clone(),
                    self.data_limit,
                ))
            }
            TrackKind::BigWig | TrackKind::BigBed => Arc::new(BigSource::new(
                spec.url.clone(),
                fetcher,
                self.bbi_files.clone(),
                self.pool.clone(),
                self.data_limit,
            )),
        })
    }
}
