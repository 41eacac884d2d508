use std::time::Duration;

use thiserror::Error;

/// Rejected user input. Never reaches storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("not a valid http(s) URL: {0:?}")]
    InvalidUrl(String),

    #[error("group name must not be empty")]
    EmptyGroupName,
}

/// Failure while retrieving page metadata.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot fetch {0:?}: not an absolute http(s) URL")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("metadata fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_entity_and_id() {
        let err = AppError::not_found("article", "abc");
        assert_eq!(err.to_string(), "article not found: abc");
    }

    #[test]
    fn validation_error_passes_through_unchanged() {
        let err: AppError = ValidationError::EmptyGroupName.into();
        assert_eq!(err.to_string(), "group name must not be empty");
    }
}
