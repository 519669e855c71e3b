/// Chapter timeline module
///
/// This module turns video descriptions into chapter timelines, merges them with
/// sponsor segments and tracks the active chapter during playback.

pub mod timecode;
pub mod extractor;
pub mod merger;
pub mod tracker;
pub mod store;

// Re-export main types
pub use timecode::parse_timecode;
pub use extractor::ChapterExtractor;
pub use merger::{ChapterMerger, MergeConfig};
pub use tracker::{ChapterTimelineTracker, TrackerConfig, TrackerState};
pub use store::{FileTimelineStore, MemoryTimelineStore, TimelineStore};

use crate::sponsor::SkipCategory;
use crate::{FeedlineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boundaries closer than this are treated as equal
pub(crate) const TIME_EPSILON: f64 = 0.001;

/// Where a chapter came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChapterSource {
    /// Parsed from the video description
    Native,
    /// Carved out of a sponsor segment
    Sponsor,
    /// Clipped or synthesized while merging
    Merged,
}

/// Represents a single chapter in a video timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    /// Chapter title, empty for synthesized filler
    pub title: String,
    /// Start in seconds from the beginning of the video
    pub start_time: f64,
    /// End in seconds, absent when the video duration is unknown
    pub end_time: Option<f64>,
    /// Length in seconds
    pub duration: Option<f64>,
    /// Inactive chapters are skipped during playback
    pub is_active: bool,
    pub source: ChapterSource,
    /// Skip category for sponsor chapters
    pub category: Option<SkipCategory>,
}

impl Chapter {
    /// Create an active native chapter without interval information
    pub fn new(title: impl Into<String>, start_time: f64) -> Self {
        Self {
            title: title.into(),
            start_time,
            end_time: None,
            duration: None,
            is_active: true,
            source: ChapterSource::Native,
            category: None,
        }
    }

    /// Create a chapter covering `[start_time, end_time)`
    pub fn with_interval(title: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        let mut chapter = Self::new(title, start_time);
        chapter.set_end(Some(end_time));
        chapter
    }

    /// Set the end time and keep the duration consistent with it
    pub fn set_end(&mut self, end_time: Option<f64>) {
        self.end_time = end_time;
        self.duration = end_time.map(|end| end - self.start_time);
    }

    /// Whether `time` falls into `[start, end)`; an absent end is unbounded
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && self.end_time.map_or(true, |end| time < end)
    }

    /// Title for display, with a placeholder for untitled chapters
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        match self.category {
            Some(category) => category.display_name().to_string(),
            None => "Untitled".to_string(),
        }
    }
}

/// A merged chapter timeline for one item, replaced wholesale on refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeline {
    pub item_id: String,
    /// Monotonic per item; higher generations replace lower ones
    pub generation: u64,
    pub chapters: Vec<Chapter>,
    pub total_duration: Option<f64>,
    pub merged_at: DateTime<Utc>,
    /// Digest of the native chapters and duration the timeline was merged from
    pub native_digest: String,
    /// Digest of the complete merge input including sponsor segments
    pub input_digest: String,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    /// First chapter containing `time`
    pub fn chapter_at(&self, time: f64) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.contains(time))
    }
}

/// Fill in end times and durations from the following chapter's start.
///
/// The last chapter ends at `total_duration` when it is known; otherwise its
/// end and duration are cleared.
pub fn derive_intervals(chapters: &mut [Chapter], total_duration: Option<f64>) {
    let count = chapters.len();
    for index in 0..count {
        if index == count - 1 {
            chapters[index].set_end(total_duration);
        } else {
            let next_start = chapters[index + 1].start_time;
            chapters[index].set_end(Some(next_start));
        }
    }
}

/// Check the timeline invariant: strictly ordered, gapless, and ending at the
/// total duration when it is known.
pub fn validate_timeline(chapters: &[Chapter], total_duration: Option<f64>) -> Result<()> {
    for (index, chapter) in chapters.iter().enumerate() {
        if chapter.start_time < 0.0 || !chapter.start_time.is_finite() {
            return Err(FeedlineError::InvalidTimeline(format!(
                "chapter {} has invalid start {}",
                index, chapter.start_time
            )));
        }

        if let Some(next) = chapters.get(index + 1) {
            if next.start_time <= chapter.start_time {
                return Err(FeedlineError::InvalidTimeline(format!(
                    "chapter {} starts at {} after chapter {} at {}",
                    index, chapter.start_time, index + 1, next.start_time
                )));
            }
            match chapter.end_time {
                Some(end) if (end - next.start_time).abs() < TIME_EPSILON => {}
                other => {
                    return Err(FeedlineError::InvalidTimeline(format!(
                        "gap after chapter {}: ends at {:?}, next starts at {}",
                        index, other, next.start_time
                    )));
                }
            }
        } else if let Some(total) = total_duration {
            match chapter.end_time {
                Some(end) if (end - total).abs() < TIME_EPSILON => {}
                other => {
                    return Err(FeedlineError::InvalidTimeline(format!(
                        "last chapter ends at {:?}, duration is {}",
                        other, total
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_intervals_with_duration() {
        let mut chapters = vec![
            Chapter::new("Start", 0.0),
            Chapter::new("Middle", 90.0),
            Chapter::new("End", 180.0),
        ];
        derive_intervals(&mut chapters, Some(200.0));

        let ends: Vec<_> = chapters.iter().map(|c| c.end_time).collect();
        assert_eq!(ends, vec![Some(90.0), Some(180.0), Some(200.0)]);
        assert_eq!(chapters[2].duration, Some(20.0));
    }

    #[test]
    fn test_derive_intervals_without_duration() {
        let mut chapters = vec![Chapter::new("A", 0.0), Chapter::new("B", 30.0)];
        derive_intervals(&mut chapters, None);

        assert_eq!(chapters[0].duration, Some(30.0));
        assert_eq!(chapters[1].end_time, None);
        assert_eq!(chapters[1].duration, None);
    }

    #[test]
    fn test_validate_detects_gap() {
        let chapters = vec![
            Chapter::with_interval("A", 0.0, 10.0),
            Chapter::with_interval("B", 12.0, 20.0),
        ];
        assert!(validate_timeline(&chapters, Some(20.0)).is_err());
    }

    #[test]
    fn test_validate_accepts_gapless() {
        let chapters = vec![
            Chapter::with_interval("A", 0.0, 10.0),
            Chapter::with_interval("B", 10.0, 20.0),
        ];
        assert!(validate_timeline(&chapters, Some(20.0)).is_ok());
        assert!(validate_timeline(&chapters, Some(25.0)).is_err());
    }

    #[test]
    fn test_contains_open_ended() {
        let chapter = Chapter::new("Open", 5.0);
        assert!(chapter.contains(1000.0));
        assert!(!chapter.contains(4.9));
    }
}
