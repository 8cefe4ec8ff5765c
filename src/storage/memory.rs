use super::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;

/// Serves files held in memory, keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(url.into(), data.into());
        }
    }
}

#[async_trait]
impl RangeFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let files = self
            .files
            .read()
            .map_err(|_| Error::Internal("memory fetcher lock poisoned".to_string()))?;
        let body = files
            .get(url)
            .ok_or_else(|| Error::NotFound(url.to_string()))?;
        Ok(match range {
            Some(range) => range.slice(body),
            None => body.clone(),
        })
    }
}
