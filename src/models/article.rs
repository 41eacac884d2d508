use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GroupId, PreviewMetadata};

pub type ArticleId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Groups this article belongs to, ordered by group name.
    pub group_ids: Vec<GroupId>,
    pub preview: Option<PreviewMetadata>,
}

impl Article {
    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }
}

/// An article that has passed URL validation but is not stored yet.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub id: ArticleId,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl NewArticle {
    pub fn new(url: impl Into<String>) -> Self {
        Self::created_at(url, Utc::now())
    }

    pub fn created_at(url: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            created_at,
        }
    }
}
