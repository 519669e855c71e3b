use async_trait::async_trait;
use feedline::chapters::{ChapterSource, MergeConfig, TrackerConfig};
use feedline::{
    ChapterMerger, ChapterTimelineTracker, FeedParser, FileTimelineStore, SkipCategory,
    SponsorSegment, SponsorSegmentProvider, TimelineStore, TrackerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const CHANNEL_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <yt:channelId>UCdemo</yt:channelId>
 <title>Open Mat</title>
 <link rel="alternate" href="https://www.youtube.com/channel/UCdemo"/>
 <entry>
  <yt:videoId>abc123</yt:videoId>
  <title>Half Guard Sweeps</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
  <published>2024-05-10T12:00:00+00:00</published>
  <media:group>
   <media:content url="https://www.youtube.com/v/abc123" duration="600"/>
   <media:description>Three sweeps from half guard.
0:00 Intro
2:00 Old school sweep
6:00 Plan B
9:00 Recap</media:description>
  </media:group>
 </entry>
</feed>"#;

struct StaticProvider {
    segments: Vec<SponsorSegment>,
    calls: AtomicUsize,
}

#[async_trait]
impl SponsorSegmentProvider for StaticProvider {
    async fn fetch_segments(&self, _content_id: &str) -> feedline::Result<Option<Vec<SponsorSegment>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.segments.clone()))
    }
}

fn provider() -> StaticProvider {
    StaticProvider {
        segments: vec![
            SponsorSegment::new(30.0, 75.0, SkipCategory::Sponsor),
            SponsorSegment::new(580.0, 600.0, SkipCategory::Outro),
        ],
        calls: AtomicUsize::new(0),
    }
}

#[tokio::test]
async fn test_feed_to_tracker() {
    let parser = FeedParser::new().unwrap();
    let items = parser.parse_items(CHANNEL_FEED.as_bytes(), None, None).unwrap();
    let item = &items[0];
    assert_eq!(item.duration, Some(600.0));
    assert_eq!(item.chapters.len(), 4);

    let merger = ChapterMerger::new(MergeConfig::default());
    let provider = provider();
    let timeline = merger
        .refresh_with_provider(&provider, &item.id, &item.id, &item.chapters, item.duration, false)
        .await
        .unwrap()
        .unwrap();

    let starts: Vec<f64> = timeline.chapters.iter().map(|c| c.start_time).collect();
    assert_eq!(starts, vec![0.0, 30.0, 75.0, 120.0, 360.0, 540.0, 580.0]);
    assert_eq!(timeline.chapters[2].title, "Intro");
    assert_eq!(timeline.chapters[2].source, ChapterSource::Merged);
    assert_eq!(timeline.chapters.last().unwrap().end_time, Some(600.0));

    let mut tracker = ChapterTimelineTracker::new(TrackerConfig::default());
    tracker.set_timeline(Some(timeline));

    assert_eq!(tracker.adjust_start_position(0.0), 0.0);

    tracker.monitor(31.0);
    assert_eq!(tracker.take_pending_seek(), Some(75.0));
    tracker.seek(75.0);
    assert_eq!(tracker.current_chapter().unwrap().title, "Intro");

    tracker.monitor(585.0);
    assert_eq!(tracker.take_pending_seek(), Some(599.5));

    tracker.seek(200.0);
    assert_eq!(
        tracker.state(),
        TrackerState::Tracking {
            current: Some(3),
            next: Some(4),
            previous: Some(2)
        }
    );
}

#[tokio::test]
async fn test_timelines_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileTimelineStore::new(temp_dir.path().to_path_buf()));
    store.initialize().await.unwrap();

    let parser = FeedParser::new().unwrap();
    let item = parser
        .parse_items(CHANNEL_FEED.as_bytes(), Some(1), None)
        .unwrap()
        .remove(0);
    let provider = provider();

    let merger = ChapterMerger::new(MergeConfig::default()).with_store(store.clone());
    let first = merger
        .refresh_with_provider(&provider, &item.id, &item.id, &item.chapters, item.duration, false)
        .await
        .unwrap()
        .unwrap();

    let restarted = ChapterMerger::new(MergeConfig::default()).with_store(store.clone());
    let skipped = restarted
        .refresh_with_provider(&provider, &item.id, &item.id, &item.chapters, item.duration, false)
        .await
        .unwrap();
    assert!(skipped.is_none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let cached = restarted.cached(&item.id).await.unwrap();
    assert_eq!(cached.chapters, first.chapters);

    let listed = store.list_timelines().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].skipped_count, 2);

    assert!(restarted.clear(&item.id).await.unwrap());
    assert!(store.load(&item.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_merges_from_tasks() {
    let merger = Arc::new(ChapterMerger::new(MergeConfig {
        skip_categories: vec![SkipCategory::Sponsor],
        ..MergeConfig::default()
    }));
    let parser = FeedParser::new().unwrap();
    let item = parser.parse_items(CHANNEL_FEED.as_bytes(), None, None).unwrap().remove(0);
    let segments = provider().segments;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let merger = Arc::clone(&merger);
        let item = item.clone();
        let segments = segments.clone();
        handles.push(tokio::spawn(async move {
            merger
                .merge_or_refresh(&item.id, &item.chapters, Some(&segments), item.duration, false)
                .await
                .unwrap()
        }));
    }

    let mut updates = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            updates += 1;
        }
    }
    assert_eq!(updates, 1);

    let timeline = merger.cached(&item.id).await.unwrap();
    assert_eq!(timeline.generation, 1);

    // Only sponsor chapters are skipped; the outro stays playable
    let outro = timeline.chapters.last().unwrap();
    assert_eq!(outro.category, Some(SkipCategory::Outro));
    assert!(outro.is_active);
}

#[test]
fn test_merge_from_blocking_caller() {
    let parser = FeedParser::new().unwrap();
    let channel = tokio_test::assert_ok!(parser.parse_channel_metadata(CHANNEL_FEED.as_bytes()));
    assert_eq!(channel.title, "Open Mat");
    assert_eq!(channel.channel_id.as_deref(), Some("UCdemo"));
    assert!(channel.feed_url.is_none());

    let item = parser.parse_items(CHANNEL_FEED.as_bytes(), None, None).unwrap().remove(0);
    let merger = ChapterMerger::new(MergeConfig::default());
    let segments = provider().segments;

    let merged = tokio_test::assert_ok!(tokio_test::block_on(merger.merge_or_refresh(
        &item.id,
        &item.chapters,
        Some(&segments),
        item.duration,
        false,
    )));
    let merged = merged.unwrap();
    assert_eq!(merged.generation, 1);

    let newer = tokio_test::assert_ok!(tokio_test::block_on(merger.merge_or_refresh(
        &item.id,
        &item.chapters,
        Some(&segments),
        item.duration,
        true,
    )));
    assert_eq!(newer.map(|timeline| timeline.generation), Some(2));

    // The first snapshot lost the race and is rejected
    let older = (*merged).clone();
    tokio_test::assert_err!(tokio_test::block_on(merger.install(older)));
}
