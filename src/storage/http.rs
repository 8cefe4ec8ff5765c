//! HTTP/HTTPS range fetching.
//!
//! Servers that ignore the `Range` header answer `200` with the whole body;
//! the requested slice is then cut out locally. A `416` means the range starts
//! past the end of the file and yields no bytes.

use super::{ByteRange, RangeFetcher};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RangeFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let mut request = self.client.get(url);
        if let Some(r) = range {
            request = request.header(reqwest::header::RANGE, r.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        debug!(url, range = ?range, %status, "range fetch");
        match status {
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Bytes::new()),
            StatusCode::NOT_FOUND => return Err(Error::NotFound(url.to_string())),
            s if !s.is_success() => {
                return Err(Error::Network(format!("GET {} returned {}", url, s)));
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response from {}: {}", url, e)))?;

        match range {
            Some(r) if status == StatusCode::OK => Ok(r.slice(&body)),
            _ => Ok(body),
        }
    }
}
