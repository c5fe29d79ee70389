//! Turns hand-entered image cells into fetchable URLs.
//!
//! Cells hold any mix of file-host share links and plain links, separated by
//! newlines, commas, pipes or spaces. Share links are rewritten to a direct
//! URL for the file id; anything else with an HTTP scheme passes through.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static VIEW_PATH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/file/d/([A-Za-z0-9_-]+)").expect("valid view-path regex"));

static QUERY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid query-id regex"));

pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 1000;

/// Where a share-link id is pointed after extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriveLinkStyle {
    /// Full-size export link, used as the upload source.
    #[default]
    Download,
    /// Resized thumbnail for direct display.
    Thumbnail { width: u32 },
}

impl DriveLinkStyle {
    pub fn thumbnail() -> Self {
        DriveLinkStyle::Thumbnail {
            width: DEFAULT_THUMBNAIL_WIDTH,
        }
    }

    pub fn link_for(&self, id: &str) -> String {
        match self {
            DriveLinkStyle::Download => {
                format!("https://drive.google.com/uc?export=download&id={id}")
            }
            DriveLinkStyle::Thumbnail { width } => {
                format!("https://lh3.googleusercontent.com/d/{id}=w{width}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub original: String,
    pub file_id: Option<String>,
    pub canonical: String,
}

impl ImageReference {
    /// `None` for tokens without an HTTP scheme.
    pub fn parse(token: &str, style: DriveLinkStyle) -> Option<Self> {
        let token = token.trim();
        if !token.starts_with("http") {
            return None;
        }
        let file_id = extract_file_id(token);
        let canonical = match &file_id {
            Some(id) => style.link_for(id),
            None => token.to_string(),
        };
        Some(Self {
            original: token.to_string(),
            file_id,
            canonical,
        })
    }
}

/// View-path ids win over `id=` query ids.
pub fn extract_file_id(url: &str) -> Option<String> {
    VIEW_PATH_ID
        .captures(url)
        .or_else(|| QUERY_ID.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn split_tokens(field: &str) -> impl Iterator<Item = &str> {
    field
        .split(['\n', ',', '|', ' '])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn parse_references(field: Option<&str>, style: DriveLinkStyle) -> Vec<ImageReference> {
    let Some(field) = field else {
        return Vec::new();
    };
    split_tokens(field)
        .filter_map(|token| ImageReference::parse(token, style))
        .collect()
}

/// Candidate URLs in cell order. Duplicates are kept.
pub fn parse_image_field(field: Option<&str>, style: DriveLinkStyle) -> Vec<String> {
    parse_references(field, style)
        .into_iter()
        .map(|reference| reference.canonical)
        .collect()
}

pub fn dedupe_preserving_order<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
