use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ArticleId;

/// Cached page preview, owned by exactly one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    pub id: i64,
    pub article_id: ArticleId,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPreview {
    pub title: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The article was deleted after the sync snapshot was taken.
    ArticleMissing,
    /// Another writer attached a preview first; the existing one is kept.
    AlreadyPresent,
}
