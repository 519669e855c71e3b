/// Chapter extraction from free-text video descriptions
use super::timecode::parse_timecode;
use super::{derive_intervals, Chapter};
use crate::Result;
use regex::Regex;
use tracing::debug;

/// Matches `<timecode> [-–•] <title>` at the start of a line
const CHAPTER_LINE_PATTERN: &str = r"(?m)^[ \t]*(\d+(?::\d+)+)(?:[ \t]+[-–•]?|[ \t]*[-–•])[ \t]*(\S.*)$";

/// Extracts chapter timelines from timestamp-led description lines
#[derive(Debug, Clone)]
pub struct ChapterExtractor {
    line_pattern: Regex,
}

impl ChapterExtractor {
    /// Create a new extractor
    pub fn new() -> Result<Self> {
        Ok(Self {
            line_pattern: Regex::new(CHAPTER_LINE_PATTERN)?,
        })
    }

    /// Extract an ordered, gapless chapter list from a description.
    ///
    /// Chapters keep the order in which they appear in the text. Lines whose
    /// time code does not parse are dropped.
    pub fn extract(&self, description: &str, total_duration: Option<f64>) -> Vec<Chapter> {
        let mut chapters = Vec::new();

        for captures in self.line_pattern.captures_iter(description) {
            let (Some(time), Some(title)) = (captures.get(1), captures.get(2)) else {
                continue;
            };

            match parse_timecode(time.as_str()) {
                Ok(start_time) => {
                    let title = title.as_str().trim_end_matches('\r');
                    chapters.push(Chapter::new(title, start_time));
                }
                Err(e) => {
                    debug!("Dropping chapter candidate '{}': {}", time.as_str(), e);
                }
            }
        }

        derive_intervals(&mut chapters, total_duration);

        if !chapters.is_empty() {
            debug!("Extracted {} chapters from description", chapters.len());
        }
        chapters
    }
}
