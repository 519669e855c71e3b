/// HTTP client for the SponsorBlock segment database
use super::{SkipCategory, SponsorSegment, SponsorSegmentProvider};
use crate::config::SponsorConfig;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Segment database client
#[derive(Debug, Clone)]
pub struct SponsorBlockClient {
    client: Client,
    endpoint: String,
    categories: Vec<SkipCategory>,
}

#[derive(Debug, Deserialize)]
struct SkipSegmentResponse {
    segment: [f64; 2],
    category: String,
    #[serde(rename = "actionType", default)]
    action_type: Option<String>,
}

impl SponsorBlockClient {
    /// Create a new client from configuration
    pub fn new(config: &SponsorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            categories: config.categories.clone(),
        })
    }

    /// Build the request URL for a video
    fn segments_url(&self, content_id: &str) -> String {
        let categories = self
            .categories
            .iter()
            .map(|category| format!("\"{}\"", category.api_name()))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}/api/skipSegments?videoID={}&categories={}",
            self.endpoint,
            urlencoding::encode(content_id),
            urlencoding::encode(&format!("[{}]", categories))
        )
    }
}

/// Convert API entries into ordered segments, dropping unknown categories and
/// non-skip actions
fn to_segments(entries: Vec<SkipSegmentResponse>) -> Vec<SponsorSegment> {
    let mut segments: Vec<SponsorSegment> = entries
        .into_iter()
        .filter(|entry| entry.action_type.as_deref().map_or(true, |action| action == "skip"))
        .filter_map(|entry| {
            let category = SkipCategory::from_api_name(&entry.category)?;
            Some(SponsorSegment::new(entry.segment[0], entry.segment[1], category))
        })
        .collect();

    segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    segments
}

#[async_trait]
impl SponsorSegmentProvider for SponsorBlockClient {
    async fn fetch_segments(&self, content_id: &str) -> Result<Option<Vec<SponsorSegment>>> {
        let url = self.segments_url(content_id);
        debug!("Requesting sponsor segments from {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("📭 No sponsor segments for {}", content_id);
            return Ok(None);
        }

        let response = response.error_for_status()?;
        let entries: Vec<SkipSegmentResponse> = response.json().await?;
        let total = entries.len();
        let segments = to_segments(entries);

        if segments.len() != total {
            warn!("⚠️ Ignored {} unsupported segments for {}", total - segments.len(), content_id);
        }
        info!("✅ Fetched {} sponsor segments for {}", segments.len(), content_id);

        Ok(Some(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_url_encodes_categories() {
        let config = SponsorConfig {
            endpoint: "https://sponsor.ajay.app/".to_string(),
            request_timeout_seconds: 5,
            categories: vec![SkipCategory::Sponsor, SkipCategory::SelfPromo],
        };
        let client = SponsorBlockClient::new(&config).unwrap();
        let url = client.segments_url("abc123");

        assert!(url.starts_with("https://sponsor.ajay.app/api/skipSegments?videoID=abc123"));
        assert!(url.ends_with("categories=%5B%22sponsor%22%2C%22selfpromo%22%5D"));
    }

    #[test]
    fn test_response_conversion() {
        let body = r#"[
            {"segment": [120.5, 150.0], "category": "selfpromo", "actionType": "skip", "UUID": "b"},
            {"segment": [10.0, 30.0], "category": "sponsor", "actionType": "skip", "UUID": "a"},
            {"segment": [60.0, 61.0], "category": "poi_highlight", "actionType": "poi", "UUID": "c"},
            {"segment": [70.0, 80.0], "category": "sponsor", "actionType": "mute", "UUID": "d"}
        ]"#;
        let entries: Vec<SkipSegmentResponse> = serde_json::from_str(body).unwrap();
        let segments = to_segments(entries);

        assert_eq!(
            segments,
            vec![
                SponsorSegment::new(10.0, 30.0, SkipCategory::Sponsor),
                SponsorSegment::new(120.5, 150.0, SkipCategory::SelfPromo),
            ]
        );
    }
}
