//! Asset (image) downloader with retry
//!
//! Fetches product images to local disk for the optional image cache.
//! Bodies are streamed straight to the file, and transient failures go
//! through the same backoff policy as page fetches. A download failure
//! is never fatal to normalization; callers degrade to keeping only the
//! remote URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::infrastructure::retry::{RetryPolicy, Retryable, retry_with_backoff};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("transport failure while downloading {url}: {message}")]
    Transport { url: String, message: String },
    #[error("asset server returned HTTP {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },
    #[error("failed to write asset to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Retryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Io { .. } => false,
        }
    }
}

pub struct AssetDownloader {
    client: Client,
    policy: RetryPolicy,
}

impl AssetDownloader {
    pub fn new(timeout_seconds: u64, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create asset HTTP client")?;
        Ok(Self { client, policy })
    }

    /// Downloads `url` to `local_path`, retrying transient failures.
    /// Parent directories are created as needed.
    pub async fn download(&self, url: &str, local_path: &Path) -> Result<(), DownloadError> {
        retry_with_backoff(self.policy, "asset download", || {
            self.fetch_to_disk(url, local_path)
        })
        .await
    }

    async fn fetch_to_disk(&self, url: &str, local_path: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file =
            tokio::fs::File::create(local_path)
                .await
                .map_err(|source| DownloadError::Io {
                    path: local_path.to_path_buf(),
                    source,
                })?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::Io {
                    path: local_path.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| DownloadError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;

        debug!(url = url, path = %local_path.display(), "Asset downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failures_are_not_retried() {
        let err = DownloadError::Io {
            path: PathBuf::from("/tmp/x.jpg"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_side_failures_are_retried() {
        let err = DownloadError::UpstreamStatus {
            url: "https://cdn.example.com/a.jpg".into(),
            status: 503,
        };
        assert!(err.is_retryable());
        let err = DownloadError::UpstreamStatus {
            url: "https://cdn.example.com/a.jpg".into(),
            status: 404,
        };
        assert!(!err.is_retryable());
    }
}
