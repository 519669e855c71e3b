use crate::{FeedlineError, Result};

/// Parse a `mm:ss` or `hh:mm:ss` time code into seconds.
///
/// Every component must be a finite, non-negative number. Any other number
/// of components is rejected with [`FeedlineError::InvalidFormat`].
pub fn parse_timecode(text: &str) -> Result<f64> {
    let components = text
        .trim()
        .split(':')
        .map(parse_component)
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| FeedlineError::InvalidFormat(text.to_string()))?;

    match components.as_slice() {
        [minutes, seconds] => Ok(minutes * 60.0 + seconds),
        [hours, minutes, seconds] => Ok(hours * 3600.0 + minutes * 60.0 + seconds),
        _ => Err(FeedlineError::InvalidFormat(text.to_string())),
    }
}

fn parse_component(component: &str) -> Option<f64> {
    let value: f64 = component.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Format seconds as `m:ss` or `h:mm:ss`
pub fn format_timecode(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
