/// Feedline - feed ingestion and chapter timeline engine
///
/// Discovers new videos from RSS/Atom subscription feeds, turns description
/// timestamps into chapter timelines, merges them with sponsor segments and
/// tracks the active chapter against a playback clock.

pub mod config;
pub mod chapters;
pub mod feed;
pub mod sponsor;

// Re-export main types for easy access
pub use crate::config::Config;
pub use crate::chapters::{
    parse_timecode, Chapter, ChapterExtractor, ChapterMerger, ChapterSource,
    ChapterTimelineTracker, Timeline, TrackerState,
};
pub use crate::chapters::store::{FileTimelineStore, MemoryTimelineStore, TimelineStore};
pub use crate::feed::{ChannelInfo, FeedCrawler, FeedFormat, FeedParser, MediaItem};
pub use crate::feed::classifier::{ShortFormClassification, ShortFormClassifier};
pub use crate::sponsor::{SkipCategory, SponsorBlockClient, SponsorSegment, SponsorSegmentProvider};

/// Result type for feedline operations
pub type Result<T> = std::result::Result<T, FeedlineError>;

/// Error types for feedline operations
#[derive(thiserror::Error, Debug)]
pub enum FeedlineError {
    #[error("Invalid time code format: {0}")]
    InvalidFormat(String),

    #[error("Malformed feed document: {0}")]
    MalformedDocument(String),

    #[error("Channel metadata not found in feed")]
    MetadataNotFound,

    #[error("Stale timeline for {item_id}: generation {generation} is older than installed {installed}")]
    StaleCacheConflict {
        item_id: String,
        generation: u64,
        installed: u64,
    },

    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
