/// Sponsor segment model and providers
///
/// Sponsor segments come from an external crowd-sourced database. The core only
/// consumes already-parsed segments through [`SponsorSegmentProvider`].

pub mod client;

pub use client::SponsorBlockClient;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kinds of skippable segments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SkipCategory {
    Sponsor,
    #[serde(rename = "selfpromo")]
    SelfPromo,
    Interaction,
    Intro,
    Outro,
    Preview,
    MusicOfftopic,
    Filler,
}

impl SkipCategory {
    /// Every category, in a stable order
    pub const ALL: [SkipCategory; 8] = [
        SkipCategory::Sponsor,
        SkipCategory::SelfPromo,
        SkipCategory::Interaction,
        SkipCategory::Intro,
        SkipCategory::Outro,
        SkipCategory::Preview,
        SkipCategory::MusicOfftopic,
        SkipCategory::Filler,
    ];

    /// Identifier used by the segment database API
    pub fn api_name(&self) -> &'static str {
        match self {
            SkipCategory::Sponsor => "sponsor",
            SkipCategory::SelfPromo => "selfpromo",
            SkipCategory::Interaction => "interaction",
            SkipCategory::Intro => "intro",
            SkipCategory::Outro => "outro",
            SkipCategory::Preview => "preview",
            SkipCategory::MusicOfftopic => "music_offtopic",
            SkipCategory::Filler => "filler",
        }
    }

    /// Parse an API identifier
    pub fn from_api_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.api_name() == name)
    }

    /// Human readable name, used as the chapter title of sponsor chapters
    pub fn display_name(&self) -> &'static str {
        match self {
            SkipCategory::Sponsor => "Sponsor",
            SkipCategory::SelfPromo => "Self Promotion",
            SkipCategory::Interaction => "Interaction Reminder",
            SkipCategory::Intro => "Intro",
            SkipCategory::Outro => "Endcards/Credits",
            SkipCategory::Preview => "Preview/Recap",
            SkipCategory::MusicOfftopic => "Non-Music Section",
            SkipCategory::Filler => "Filler Tangent",
        }
    }
}

/// A time range the segment database marks as skippable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SponsorSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub category: SkipCategory,
}

impl SponsorSegment {
    pub fn new(start_time: f64, end_time: f64, category: SkipCategory) -> Self {
        Self {
            start_time,
            end_time,
            category,
        }
    }
}

/// Source of sponsor segments for a piece of content
#[async_trait]
pub trait SponsorSegmentProvider: Send + Sync {
    /// Fetch segments ordered by start time; `None` means the provider has no data
    async fn fetch_segments(&self, content_id: &str) -> Result<Option<Vec<SponsorSegment>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_names_round_trip() {
        for category in SkipCategory::ALL {
            assert_eq!(SkipCategory::from_api_name(category.api_name()), Some(category));
        }
        assert_eq!(SkipCategory::from_api_name("poi_highlight"), None);
    }

    #[test]
    fn test_serde_matches_api_names() {
        let json = serde_json::to_string(&SkipCategory::MusicOfftopic).unwrap();
        assert_eq!(json, "\"music_offtopic\"");
        let parsed: SkipCategory = serde_json::from_str("\"selfpromo\"").unwrap();
        assert_eq!(parsed, SkipCategory::SelfPromo);
    }
}
