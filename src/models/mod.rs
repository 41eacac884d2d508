mod article;
mod group;
mod preview;

pub use article::{Article, ArticleId, NewArticle};
pub use group::{Group, GroupId};
pub use preview::{AttachOutcome, NewPreview, PreviewMetadata};
