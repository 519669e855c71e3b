/// Short-form video detection from titles and descriptions
use crate::Result;
use regex::Regex;

/// Explicit shorts marker
const SHORTS_TAG_PATTERN: &str = r"(?i)#shorts\b";

/// Hashtag with at least two letters
const HASHTAG_PATTERN: &str = r"#\p{Alphabetic}{2,}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShortFormClassification {
    pub is_short: bool,
    pub is_likely_short: bool,
}

/// Heuristic classifier for short-form content.
///
/// A `#shorts` tag anywhere marks a short. Otherwise a title carrying two or
/// more hashtags marks a likely short.
#[derive(Debug, Clone)]
pub struct ShortFormClassifier {
    shorts_tag: Regex,
    hashtag: Regex,
}

impl ShortFormClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            shorts_tag: Regex::new(SHORTS_TAG_PATTERN)?,
            hashtag: Regex::new(HASHTAG_PATTERN)?,
        })
    }

    pub fn classify(&self, title: &str, description: Option<&str>) -> ShortFormClassification {
        let tagged = self.shorts_tag.is_match(title)
            || description.map_or(false, |text| self.shorts_tag.is_match(text));
        if tagged {
            return ShortFormClassification {
                is_short: true,
                is_likely_short: false,
            };
        }

        ShortFormClassification {
            is_short: false,
            is_likely_short: self.hashtag.find_iter(title).count() >= 2,
        }
    }
}
