use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "trackr")]
#[command(about = "Genomic track query server over indexed remote files")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "TRACKR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "TRACKR_PORT", default_value = "8080")]
    pub port: u16,

    /// Directory local track files are read from; paths outside it are refused
    #[arg(long, env = "TRACKR_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Enable CORS for all origins
    #[arg(long, env = "TRACKR_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// chrom.sizes file (name<TAB>length per line) defining the genome
    #[arg(long, env = "TRACKR_GENOME")]
    pub genome: PathBuf,

    /// Genome name reported to clients
    #[arg(long, env = "TRACKR_GENOME_NAME", default_value = "genome")]
    pub genome_name: String,

    /// Smallest region width in bases the view can zoom into
    #[arg(long, env = "TRACKR_MIN_REGION_SIZE", default_value = "10")]
    pub min_region_size: u64,

    /// Width of the view in pixels, used to derive bases per pixel
    #[arg(long, env = "TRACKR_WIDTH_PX", default_value = "1000")]
    pub width_px: f64,

    /// View widths fetched off screen on each side
    #[arg(long, env = "TRACKR_EXPANSION", default_value = "1.0")]
    pub expansion: f64,

    /// Concurrent decode jobs (0 = number of CPUs)
    #[arg(long, env = "TRACKR_DECODE_WORKERS", default_value = "0")]
    pub decode_workers: usize,

    /// Parsed indexes and headers kept in memory
    #[arg(long, env = "TRACKR_INDEX_CACHE", default_value = "256")]
    pub index_cache_capacity: u64,

    /// Records per query above which results are thinned
    #[arg(long, env = "TRACKR_DATA_LIMIT", default_value = "300000")]
    pub data_limit: usize,

    /// Timeout for remote range requests, in seconds
    #[arg(long, env = "TRACKR_HTTP_TIMEOUT", default_value = "30")]
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn decode_workers(&self) -> usize {
        if self.decode_workers > 0 {
            self.decode_workers
        } else {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["trackr", "--genome", "hg38.chrom.sizes"]);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.min_region_size, 10);
        assert_eq!(config.data_limit, 300_000);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert!(config.decode_workers() >= 1);
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "trackr",
            "--genome",
            "g.sizes",
            "--port",
            "3000",
            "--host",
            "localhost",
            "--decode-workers",
            "3",
            "--width-px",
            "800",
            "--data-dir",
            "/srv/tracks",
        ]);
        assert_eq!(config.bind_address(), "localhost:3000");
        assert_eq!(config.decode_workers(), 3);
        assert_eq!(config.width_px, 800.0);
        assert_eq!(config.data_dir, PathBuf::from("/srv/tracks"));
    }
}
