//! Fetcher with a local download cache.

use super::{FetchRequest, Fetcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

enum Source {
    Local(PathBuf),
    Remote(String),
}

fn classify(url: &str) -> UtmforgeResult<Source> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Source::Local(PathBuf::from(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Source::Remote(url.to_string()));
    }
    if let Some((scheme, _)) = url.split_once("://") {
        return Err(UtmforgeError::Fetch(format!(
            "unsupported URL scheme '{}' in {}",
            scheme, url
        )));
    }
    Ok(Source::Local(PathBuf::from(url)))
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Fetches local files in place and downloads remote ones into a cache.
///
/// Remote downloads:
/// - land in the request's target path, or `<cache_dir>/<sha256(url)>.<ext>`
/// - are reused when a cached copy matches the requested checksum
/// - resume an interrupted `.part` file with an HTTP range request, only
///   when a checksum will vouch for the stitched result
/// - retry transient failures with linear backoff
/// - are verified before being moved into place
pub struct CachingFetcher {
    cache_dir: PathBuf,
    attempts: u32,
    retry_delay: Duration,
    #[cfg(feature = "http-fetch")]
    client: reqwest::Client,
}

impl CachingFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            #[cfg(feature = "http-fetch")]
            client: reqwest::Client::new(),
        }
    }

    /// Per-user cache location, falling back to the temp dir.
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("utmforge")
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn destination(&self, request: &FetchRequest, url: &str) -> PathBuf {
        if let Some(target) = &request.target_path {
            return target.clone();
        }
        let key = hex::encode(Sha256::digest(url.as_bytes()));
        let name = if request.extension.is_empty() {
            key
        } else {
            format!("{}.{}", key, request.extension)
        };
        self.cache_dir.join(name)
    }

    async fn fetch_local(&self, request: &FetchRequest, path: PathBuf) -> UtmforgeResult<PathBuf> {
        if !path.is_file() {
            return Err(UtmforgeError::Fetch(format!(
                "{} does not exist",
                path.display()
            )));
        }
        request.checksum.verify(&path).await?;
        Ok(path)
    }

    async fn fetch_remote(
        &self,
        request: &FetchRequest,
        url: &str,
        cancel: &CancellationToken,
    ) -> UtmforgeResult<PathBuf> {
        let dest = self.destination(request, url);
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                UtmforgeError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        if !request.checksum.is_none()
            && dest.is_file()
            && request.checksum.verify(&dest).await.is_ok()
        {
            tracing::info!(path = %dest.display(), "Using cached {}", request.description);
            return Ok(dest);
        }

        let part = part_path(&dest);
        let resume = !request.checksum.is_none();
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UtmforgeError::Cancelled),
                r = self.download(url, &part, resume) => r,
            };

            match result {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(url = %url, attempt = attempt, "Download failed, retrying: {}", e);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(UtmforgeError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay * attempt) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = request.checksum.verify(&part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &dest).await.map_err(|e| {
            UtmforgeError::Storage(format!("failed to move download to {}: {}", dest.display(), e))
        })?;
        Ok(dest)
    }

    /// Download `url` into `part`.
    ///
    /// With `resume`, existing bytes in `part` are kept and only the rest is
    /// requested. A server that cannot satisfy that range gets a fresh full
    /// request instead.
    #[cfg(feature = "http-fetch")]
    async fn download(&self, url: &str, part: &Path, resume: bool) -> UtmforgeResult<()> {
        use reqwest::StatusCode;
        use tokio::io::AsyncWriteExt;

        let mut offset = if resume {
            tokio::fs::metadata(part).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let mut response = loop {
            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
            }
            let response = request
                .send()
                .await
                .map_err(|e| UtmforgeError::Network(format!("{}: {}", url, e)))?;

            if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
                tracing::debug!(url = %url, offset = offset, "Partial download not resumable, starting over");
                tokio::fs::remove_file(part).await.map_err(|e| {
                    UtmforgeError::Storage(format!("failed to remove {}: {}", part.display(), e))
                })?;
                offset = 0;
                continue;
            }
            break response;
        };

        let status = response.status();
        let append = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => true,
            s if s.is_success() => false,
            s if s.is_server_error()
                || s == StatusCode::TOO_MANY_REQUESTS
                || s == StatusCode::REQUEST_TIMEOUT =>
            {
                return Err(UtmforgeError::Network(format!("{}: HTTP {}", url, s)));
            }
            s => return Err(UtmforgeError::Fetch(format!("{}: HTTP {}", url, s))),
        };

        if append {
            tracing::debug!(url = %url, offset = offset, "Resuming download");
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(part)
            .await
            .map_err(|e| {
                UtmforgeError::Storage(format!("failed to open {}: {}", part.display(), e))
            })?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| UtmforgeError::Network(format!("{}: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    #[cfg(not(feature = "http-fetch"))]
    async fn download(&self, url: &str, _part: &Path, _resume: bool) -> UtmforgeResult<()> {
        Err(UtmforgeError::Unsupported(format!(
            "cannot fetch {}: built without the http-fetch feature",
            url
        )))
    }
}

#[async_trait::async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> UtmforgeResult<PathBuf> {
        if request.urls.is_empty() {
            return Err(UtmforgeError::Config(format!(
                "no source given for {}",
                request.description
            )));
        }

        let mut last_err = None;
        for url in &request.urls {
            if cancel.is_cancelled() {
                return Err(UtmforgeError::Cancelled);
            }

            tracing::info!(url = %url, checksum = %request.checksum, "Fetching {}", request.description);
            let result = match classify(url) {
                Ok(Source::Local(path)) => self.fetch_local(request, path).await,
                Ok(Source::Remote(remote)) => self.fetch_remote(request, &remote, cancel).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(path) => {
                    tracing::info!(path = %path.display(), "Fetched {}", request.description);
                    return Ok(path);
                }
                Err(UtmforgeError::Cancelled) => return Err(UtmforgeError::Cancelled),
                Err(e) => {
                    tracing::warn!(url = %url, "Fetch failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            UtmforgeError::Internal(format!("no fetch attempted for {}", request.description))
        }))
    }
}
