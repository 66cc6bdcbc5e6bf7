//! Artifact retrieval.
//!
//! Steps hand a [`FetchRequest`] to a [`Fetcher`] and only care about the
//! resulting local path. Checksum enforcement, caching, resuming and retrying
//! of transient failures are the fetcher's concern.

mod caching;
mod checksum;

pub use caching::CachingFetcher;
pub use checksum::{Checksum, sha256_file};

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utmforge_shared::UtmforgeResult;

/// What to fetch and how to verify it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Candidate sources, tried in order until one succeeds.
    pub urls: Vec<String>,
    pub checksum: Checksum,
    /// Explicit destination. When `None` the fetcher picks a cache location.
    pub target_path: Option<PathBuf>,
    /// File extension for generated destination names, without the dot.
    pub extension: String,
    /// Human-readable label for logs.
    pub description: String,
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the artifact and return its local path.
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> UtmforgeResult<PathBuf>;
}

pub type SharedFetcher = Arc<dyn Fetcher>;
