use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

use super::fetcher::{Downloader, Progress};

/// Streaming HTTP download collaborator backed by `reqwest`.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        HttpDownloader {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path, progress: Progress<'_>) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "server responded with {} for {url}",
                response.status()
            )));
        }

        let total = response.content_length();
        debug!(%url, ?total, "download started");

        let mut file = tokio::fs::File::create(dest).await?;
        let mut received = 0u64;
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress(received, total);
        }
        file.flush().await?;

        debug!(%url, bytes = received, "download finished");
        Ok(())
    }
}
