/// HTTP feed crawler
use super::{ChannelInfo, FeedParser, MediaItem};
use crate::config::FeedConfig;
use crate::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Fetches subscription feeds and parses them into media items
#[derive(Debug, Clone)]
pub struct FeedCrawler {
    client: Client,
    parser: FeedParser,
    config: FeedConfig,
}

impl FeedCrawler {
    /// Create a new crawler instance
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            parser: FeedParser::new()?,
            config: config.clone(),
        })
    }

    pub fn parser(&self) -> &FeedParser {
        &self.parser
    }

    /// Load items newer than `most_recent_published` from a feed
    pub async fn load_items(
        &self,
        feed_url: &str,
        most_recent_published: Option<DateTime<Utc>>,
    ) -> Result<Vec<MediaItem>> {
        let body = self.fetch(feed_url).await?;
        let items = self
            .parser
            .parse_items(body.as_slice(), self.config.item_limit, most_recent_published)?;

        let items = self.filter_items(items);
        info!("📰 Loaded {} items from {}", items.len(), feed_url);
        Ok(items)
    }

    /// Load channel metadata; the result links back to `feed_url`
    pub async fn load_channel(&self, feed_url: &str) -> Result<ChannelInfo> {
        let body = self.fetch(feed_url).await?;
        let mut channel = self.parser.parse_channel_metadata(body.as_slice())?;
        channel.feed_url = Some(feed_url.to_string());

        info!("📺 Loaded channel '{}' from {}", channel.title, feed_url);
        Ok(channel)
    }

    /// Load several feeds concurrently.
    ///
    /// Each request pairs a feed URL with its newest known publish date.
    /// Results arrive in completion order; a failing feed does not affect the
    /// others.
    pub async fn crawl_many(
        &self,
        requests: Vec<(String, Option<DateTime<Utc>>)>,
    ) -> Vec<(String, Result<Vec<MediaItem>>)> {
        let total = requests.len();
        info!(
            "🚀 Crawling {} feeds ({} concurrent)",
            total, self.config.max_concurrent_fetches
        );

        let results: Vec<(String, Result<Vec<MediaItem>>)> = stream::iter(requests)
            .map(|(feed_url, cutoff)| async move {
                let result = self.load_items(&feed_url, cutoff).await;
                if let Err(e) = &result {
                    warn!("❌ Failed to crawl {}: {}", feed_url, e);
                }
                (feed_url, result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
        info!("✅ Crawled {} feeds, {} failed", total - failed, failed);
        results
    }

    /// Apply the shorts preference
    fn filter_items(&self, items: Vec<MediaItem>) -> Vec<MediaItem> {
        if !self.config.hide_shorts {
            return items;
        }

        let before = items.len();
        let items: Vec<MediaItem> = items.into_iter().filter(|item| !item.is_short).collect();
        if items.len() < before {
            debug!("Hid {} shorts", before - items.len());
        }
        items
    }

    async fn fetch(&self, feed_url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(feed_url)?;
        debug!("Fetching feed {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::FeedlineError;

    fn item(title: &str, is_short: bool) -> MediaItem {
        MediaItem {
            id: title.to_string(),
            title: title.to_string(),
            description: None,
            published: Utc::now(),
            duration: None,
            media_url: format!("https://example.com/{}", title),
            thumbnail_url: None,
            is_short,
            is_likely_short: false,
            chapters: Vec::new(),
        }
    }

    #[test]
    fn test_hide_shorts() {
        let config = ConfigBuilder::new().hide_shorts(true).build();
        let crawler = FeedCrawler::new(&config.feeds).unwrap();

        let items = crawler.filter_items(vec![item("long", false), item("short", true)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "long");

        let config = ConfigBuilder::new().build();
        let crawler = FeedCrawler::new(&config.feeds).unwrap();
        assert_eq!(crawler.filter_items(vec![item("short", true)]).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let crawler = FeedCrawler::new(&ConfigBuilder::new().build().feeds).unwrap();
        let result = crawler.load_items("not a url", None).await;
        assert!(matches!(result, Err(FeedlineError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_crawl_many_reports_each_feed() {
        let config = ConfigBuilder::new().with_concurrent_fetches(2).build();
        let crawler = FeedCrawler::new(&config.feeds).unwrap();

        let results = crawler
            .crawl_many(vec![
                ("::bad::".to_string(), None),
                ("also bad".to_string(), None),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, result)| result.is_err()));
    }
}
