use serde::{Deserialize, Serialize};

use super::ArticleId;

pub type GroupId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Member articles, most recently created first.
    pub article_ids: Vec<ArticleId>,
}
