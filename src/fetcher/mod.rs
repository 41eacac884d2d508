//! Page preview retrieval.
//!
//! The sync engine only sees the [`MetadataFetcher`] trait, so tests can swap
//! the network-backed [`OpenGraphFetcher`] for a deterministic double.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::NewPreview;

mod opengraph;
#[cfg(test)]
pub mod stub;

pub use opengraph::OpenGraphFetcher;

/// Preview fields extracted from a page. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMetadata {
    pub title: Option<String>,
    pub image_url: Option<String>,
}

impl From<FetchedMetadata> for NewPreview {
    fn from(meta: FetchedMetadata) -> Self {
        NewPreview {
            title: meta.title,
            image_url: meta.image_url,
        }
    }
}

/// Retrieves preview data for a validated URL.
///
/// Implementations do not retry and do not cache; both are the caller's concern.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMetadata, FetchError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
