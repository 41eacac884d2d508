use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::Client;
use url::Url;

use crate::error::{FetchError, Result};
use crate::validator::validate_url;

use super::{FetchedMetadata, MetadataFetcher};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.2";

static META_TAG: OnceLock<Regex> = OnceLock::new();
static META_KEY: OnceLock<Regex> = OnceLock::new();
static META_CONTENT: OnceLock<Regex> = OnceLock::new();
static TITLE_TAG: OnceLock<Regex> = OnceLock::new();
static ENTITY: OnceLock<Regex> = OnceLock::new();

/// Reads Open Graph (and Twitter card) tags from the page at a URL.
pub struct OpenGraphFetcher {
    client: Client,
}

impl OpenGraphFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::from)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataFetcher for OpenGraphFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedMetadata, FetchError> {
        validate_url(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let response = self.client.get(url).header(ACCEPT, ACCEPT_HTML).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", url, response.status());
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let final_url = response.url().clone();
        let html = response.text().await?;

        Ok(extract_metadata(&html, &final_url))
    }

    fn name(&self) -> &'static str {
        "opengraph"
    }
}

/// Pulls title and image out of an HTML document.
///
/// Title: `og:title`, then `twitter:title`, then `<title>`.
/// Image: `og:image`, then `twitter:image`, resolved against `base`.
pub fn extract_metadata(html: &str, base: &Url) -> FetchedMetadata {
    let metas = meta_tags(html);
    let lookup = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            metas
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        })
    };

    let title = lookup(&["og:title", "twitter:title"])
        .or_else(|| document_title(html))
        .map(|t| decode_entities(t.trim()))
        .filter(|t| !t.is_empty());

    let image_url = lookup(&["og:image", "og:image:url", "twitter:image"])
        .map(|href| decode_entities(href.trim()))
        .filter(|href| !href.is_empty())
        .map(|href| resolve_url(&href, base));

    FetchedMetadata { title, image_url }
}

/// Collects `(property-or-name, content)` pairs from `<meta>` tags in document order.
fn meta_tags(html: &str) -> Vec<(String, String)> {
    let tag_re = META_TAG.get_or_init(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));
    let key_re = META_KEY.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:property|name)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    });
    let content_re = META_CONTENT.get_or_init(|| {
        Regex::new(r#"(?i)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    });

    tag_re
        .find_iter(html)
        .filter_map(|tag| {
            let tag = tag.as_str();
            let key = first_group(key_re.captures(tag)?)?;
            let content = first_group(content_re.captures(tag)?)?;
            Some((key, content))
        })
        .collect()
}

fn first_group(caps: regex::Captures) -> Option<String> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn document_title(html: &str) -> Option<String> {
    let re = TITLE_TAG.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
    re.captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
}

fn decode_entities(text: &str) -> String {
    let re = ENTITY.get_or_init(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid regex"));
    re.replace_all(text, |caps: &regex::Captures| {
        let entity = &caps[1];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
            _ => None,
        };
        decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Resolve a potentially relative URL against the page URL
fn resolve_url(href: &str, base: &Url) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    match base.join(href) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}
