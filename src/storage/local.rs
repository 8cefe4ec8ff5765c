use super::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

/// Reads ranges from files under `data_dir`. Accepts paths relative to it
/// and `file://` URLs pointing inside it; anything that would leave the
/// directory is refused.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    data_dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let outside = || Error::PermissionDenied(format!("{} is outside the data directory", url));
        let path = if url.starts_with("file:") {
            let path = Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| Error::InvalidInput(format!("bad file URL: {}", url)))?;
            path.strip_prefix(&self.data_dir)
                .map_err(|_| outside())?
                .to_path_buf()
        } else {
            PathBuf::from(url)
        };
        if !path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(outside());
        }
        Ok(self.data_dir.join(path))
    }

    async fn read_range(path: &Path, range: ByteRange) -> Result<Bytes> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        let size = file.metadata().await?.len();
        if range.start >= size {
            return Ok(Bytes::new());
        }

        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let available = size - range.start;
        let len = range.len().map_or(available, |l| l.min(available));
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl RangeFetcher for LocalFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let path = self.resolve(url)?;
        match range {
            Some(range) => Self::read_range(&path, range).await,
            None => fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|_| Error::NotFound(path.display().to_string())),
        }
    }
}
