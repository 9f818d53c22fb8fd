//! Streaming image download into request scratch storage.

use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("download failed with status {status}")]
    Download { status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A downloaded image on local disk.
///
/// The file itself belongs to the request scratch that reserved its path
/// and is deleted when that scratch is released.
#[derive(Debug, Clone)]
pub struct TransientImage {
    path: PathBuf,
    bytes: u64,
}

impl TransientImage {
    pub fn new(path: PathBuf, bytes: u64) -> Self {
        Self { path, bytes }
    }

    /// Bytes written to disk.
    pub fn size(&self) -> u64 {
        self.bytes
    }

    /// Read the stored image back into memory.
    pub async fn read(&self) -> Result<Vec<u8>, AcquireError> {
        tokio::fs::read(&self.path).await.map_err(|source| AcquireError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// HTTP image fetcher with a bounded per-download timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AcquireError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rollcall/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest` chunk by chunk.
    ///
    /// Non-success responses fail with [`AcquireError::Download`] before
    /// anything is written.
    pub async fn acquire(&self, url: &str, dest: &Path) -> Result<TransientImage, AcquireError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Download {
                status: status.as_u16(),
            });
        }

        let io_err = |source| AcquireError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        tracing::debug!(url, bytes = written, path = %dest.display(), "image acquired");
        Ok(TransientImage::new(dest.to_path_buf(), written))
    }
}
