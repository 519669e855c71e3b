use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use feedline::chapters::timecode::format_timecode;
use feedline::chapters::{Chapter, MergeConfig, TrackerConfig};
use feedline::{
    ChapterExtractor, ChapterMerger, ChapterTimelineTracker, Config, FeedCrawler,
    FileTimelineStore, MediaItem, SponsorBlockClient, Timeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feedline")]
#[command(version, author = "TigreRoll")]
#[command(about = "Subscription feed ingestion and chapter timelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the standard search locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new items from one or more feeds
    Items {
        /// Feed URLs
        #[arg(required = true)]
        feed_urls: Vec<String>,
        /// Only items published after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
        /// Maximum number of items per feed
        #[arg(long)]
        limit: Option<usize>,
        /// Leave out shorts
        #[arg(long)]
        hide_shorts: bool,
        /// Print items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show channel metadata for a feed
    Channel {
        feed_url: String,
    },
    /// Extract chapters from a description text file ("-" reads stdin)
    Chapters {
        file: PathBuf,
        /// Total duration in seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Build the merged chapter timeline for a feed item
    Timeline {
        feed_url: String,
        /// Item id; the newest item when omitted
        #[arg(long)]
        item: Option<String>,
        /// Recompute even if the stored timeline is fresh
        #[arg(long)]
        force: bool,
        /// Show the tracker state at this playback position (seconds)
        #[arg(long)]
        at: Option<f64>,
    },
    /// Manage stored timelines
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// List all stored timelines
    List,
    /// Get store statistics
    Stats,
    /// Remove the stored timeline for an item
    Invalidate {
        item_id: String,
    },
    /// Remove all stored timelines
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("feedline=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match cli.command {
        Commands::Items {
            feed_urls,
            since,
            limit,
            hide_shorts,
            json,
        } => {
            let mut feeds = config.feeds.clone();
            feeds.item_limit = limit.or(feeds.item_limit);
            feeds.hide_shorts |= hide_shorts;

            let cutoff = since
                .as_deref()
                .map(|text| DateTime::parse_from_rfc3339(text).map(|date| date.with_timezone(&Utc)))
                .transpose()
                .context("--since must be an RFC 3339 timestamp")?;

            let crawler = FeedCrawler::new(&feeds)?;
            let requests = feed_urls.into_iter().map(|url| (url, cutoff)).collect();

            for (feed_url, result) in crawler.crawl_many(requests).await {
                let items = match result {
                    Ok(items) => items,
                    Err(e) => {
                        warn!("Skipping {}: {}", feed_url, e);
                        continue;
                    }
                };

                if json {
                    println!("{}", serde_json::to_string_pretty(&items)?);
                } else {
                    info!("📰 {} ({} items)", feed_url, items.len());
                    for item in &items {
                        print_item(item);
                    }
                }
            }
        }

        Commands::Channel { feed_url } => {
            let crawler = FeedCrawler::new(&config.feeds)?;
            let channel = crawler.load_channel(&feed_url).await?;

            info!("📺 {}", channel.title);
            info!("  Link: {}", channel.link);
            if let Some(channel_id) = &channel.channel_id {
                info!("  Channel ID: {}", channel_id);
            }
            if let Some(description) = &channel.description {
                info!("  Description: {}", description);
            }
            if let Some(thumbnail) = &channel.thumbnail_url {
                info!("  Thumbnail: {}", thumbnail);
            }
        }

        Commands::Chapters { file, duration } => {
            let description = if file.as_os_str() == "-" {
                tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin())).await??
            } else {
                tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?
            };

            let chapters = ChapterExtractor::new()?.extract(&description, duration);
            if chapters.is_empty() {
                info!("📭 No chapters found");
            } else {
                info!("📚 Found {} chapters:", chapters.len());
                print_chapters(&chapters);
            }
        }

        Commands::Timeline {
            feed_url,
            item,
            force,
            at,
        } => {
            let crawler = FeedCrawler::new(&config.feeds)?;
            let items = crawler.load_items(&feed_url, None).await?;
            let media = match &item {
                Some(id) => items.iter().find(|candidate| &candidate.id == id),
                None => items.first(),
            }
            .ok_or_else(|| anyhow!("No matching item in {}", feed_url))?;

            let timeline = build_timeline(&config, media, force).await?;
            info!(
                "🎬 {} (generation {}, {} chapters)",
                media.title,
                timeline.generation,
                timeline.len()
            );
            print_chapters(&timeline.chapters);

            if let Some(position) = at {
                let mut tracker = ChapterTimelineTracker::new(TrackerConfig::from(&config.playback));
                tracker.set_timeline(Some(timeline));

                let start = tracker.adjust_start_position(position);
                tracker.seek(start);

                info!("▶️ Position {}", format_timecode(start));
                let describe = |chapter: Option<&Chapter>| {
                    chapter.map_or_else(|| "-".to_string(), |c| c.display_title())
                };
                info!("  Current: {}", describe(tracker.current_chapter()));
                info!("  Next: {}", describe(tracker.next_chapter()));
                info!("  Previous: {}", describe(tracker.previous_chapter()));
                if let Some(target) = tracker.take_pending_seek() {
                    info!("  ⏭️ Skip to {}", format_timecode(target));
                }
            }
        }

        Commands::Store { command } => {
            let store = FileTimelineStore::new(config.chapters.store_dir.clone());
            store.initialize().await?;
            run_store_command(&store, command, config.chapters.sponsor_refresh_hours).await?;
        }
    }

    Ok(())
}

/// Merge the item's description chapters with sponsor segments, reusing the
/// stored timeline when it is still fresh
async fn build_timeline(config: &Config, media: &MediaItem, force: bool) -> Result<Arc<Timeline>> {
    let store = Arc::new(FileTimelineStore::new(config.chapters.store_dir.clone()));
    store.initialize().await?;

    let merger = ChapterMerger::new(MergeConfig::from(&config.chapters)).with_store(store);
    let provider = SponsorBlockClient::new(&config.sponsor)?;

    let refreshed = match merger
        .refresh_with_provider(&provider, &media.id, &media.id, &media.chapters, media.duration, force)
        .await
    {
        Ok(timeline) => timeline,
        Err(e) => {
            warn!("⚠️ Sponsor segments unavailable for {}: {}", media.id, e);
            None
        }
    };

    if let Some(timeline) = refreshed {
        return Ok(timeline);
    }
    if let Some(timeline) = merger.cached(&media.id).await {
        info!("📚 Using stored timeline for {}", media.id);
        return Ok(timeline);
    }

    merger
        .merge_or_refresh(&media.id, &media.chapters, None, media.duration, true)
        .await?
        .ok_or_else(|| anyhow!("Timeline for {} could not be built", media.id))
}

async fn run_store_command(store: &FileTimelineStore, command: StoreCommands, refresh_hours: u64) -> Result<()> {
    use feedline::TimelineStore;

    match command {
        StoreCommands::List => {
            let timelines = store.list_timelines().await?;

            if timelines.is_empty() {
                info!("📭 No stored timelines found");
                return Ok(());
            }

            info!("📚 Found {} stored timelines:", timelines.len());
            for timeline in timelines {
                let status = if timeline.age_hours < refresh_hours { "✅ Fresh" } else { "❌ Expired" };
                info!(
                    "  {} - generation {}, {} chapters ({} skipped), {} hours old, {}",
                    timeline.item_id,
                    timeline.generation,
                    timeline.chapter_count,
                    timeline.skipped_count,
                    timeline.age_hours,
                    status
                );
            }
        }

        StoreCommands::Stats => {
            let stats = store.get_stats(refresh_hours).await?;
            info!("📊 Store Statistics:");
            info!("  Total files: {}", stats.total_files);
            info!("  Fresh files: {}", stats.fresh_files);
            info!("  Expired files: {}", stats.expired_files);
            info!("  Total chapters: {}", stats.total_chapters);
        }

        StoreCommands::Invalidate { item_id } => {
            if store.remove(&item_id).await? {
                info!("✅ Successfully invalidated timeline for: {}", item_id);
            } else {
                warn!("⚠️ No stored timeline for: {}", item_id);
            }
        }

        StoreCommands::Clear => {
            let count = store.clear_all().await?;
            info!("🧹 Cleared {} timeline files", count);
        }
    }

    Ok(())
}

fn print_item(item: &MediaItem) {
    let marker = if item.is_short {
        " [short]"
    } else if item.is_likely_short {
        " [likely short]"
    } else {
        ""
    };
    info!(
        "  {} {}{} ({} chapters)",
        item.published.format("%Y-%m-%d"),
        item.title,
        marker,
        item.chapters.len()
    );
    info!("    {}", item.media_url);
}

fn print_chapters(chapters: &[Chapter]) {
    for chapter in chapters {
        let end = chapter
            .end_time
            .map_or_else(|| "end".to_string(), format_timecode);
        let skip = if chapter.is_active { "" } else { " (skipped)" };
        info!(
            "  {} - {} {}{}",
            format_timecode(chapter.start_time),
            end,
            chapter.display_title(),
            skip
        );
    }
}
