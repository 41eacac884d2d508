use url::Url;

use crate::error::ValidationError;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Parses `input` and checks the scheme. Surrounding whitespace is ignored.
///
/// `Url` lowercases the scheme while parsing, so `HTTPS://...` is accepted.
pub fn validate_url(input: &str) -> Result<Url, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidUrl(input.to_string()));
    }

    let url = Url::parse(trimmed).map_err(|_| ValidationError::InvalidUrl(input.to_string()))?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::InvalidUrl(input.to_string()));
    }

    // http(s) URLs always carry a host once parsed, but an empty one means "http://"
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ValidationError::InvalidUrl(input.to_string())),
    }
}
