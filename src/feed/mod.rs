/// Feed ingestion module
///
/// Parses RSS and Atom subscription feeds into media items and channel
/// metadata, classifies short-form videos and extracts description chapters.

pub mod classifier;
pub mod crawler;
pub mod parser;

pub use classifier::{ShortFormClassification, ShortFormClassifier};
pub use crawler::FeedCrawler;
pub use parser::FeedParser;

use crate::chapters::Chapter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Syndication format, selected by the document's root element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedFormat {
    /// `<rss>` or RSS 1.0 `<rdf:RDF>`
    Rss,
    /// `<feed>`, including YouTube channel feeds
    Atom,
}

impl FeedFormat {
    /// Detect the format from the root element's local name
    pub fn from_root(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"rss" | b"RDF" => Some(FeedFormat::Rss),
            b"feed" => Some(FeedFormat::Atom),
            _ => None,
        }
    }

    /// Element that wraps a single item
    pub fn item_element(&self) -> &'static str {
        match self {
            FeedFormat::Rss => "item",
            FeedFormat::Atom => "entry",
        }
    }
}

/// A video discovered in a feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub published: DateTime<Utc>,
    /// Length in seconds, when the feed provides it
    pub duration: Option<f64>,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub is_short: bool,
    pub is_likely_short: bool,
    /// Chapters parsed from the description
    pub chapters: Vec<Chapter>,
}

/// Channel metadata from the feed header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Channel page link declared by the document
    pub link: String,
    pub channel_id: Option<String>,
    /// URL the document was fetched from
    pub feed_url: Option<String>,
}
