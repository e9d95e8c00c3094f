//! HTTP file download

use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const TARGET: &str = "ops_toolkit::http";

/// HTTP errors
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// GET `url` into `path`, returning the number of bytes written.
///
/// A non-200 status is logged but the body is still saved.
pub async fn download(url: &str, path: impl AsRef<Path>) -> Result<u64, HttpError> {
    let path = path.as_ref();
    let io_err = |source| HttpError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    debug!(target: TARGET, url, file = %path.display(), "downloading");
    let mut response = reqwest::get(url).await?;
    if response.status() != StatusCode::OK {
        warn!(target: TARGET, url, status = %response.status(), "non-200 status code received");
    }

    let mut file = File::create(path).await.map_err(io_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    debug!(target: TARGET, url, bytes = written, "download finished");
    Ok(written)
}
