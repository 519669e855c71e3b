/// Merges description chapters with sponsor segments into cached timelines
use super::store::TimelineStore;
use super::{validate_timeline, Chapter, ChapterSource, Timeline, TIME_EPSILON};
use crate::config::ChapterConfig;
use crate::sponsor::{SkipCategory, SponsorSegment, SponsorSegmentProvider};
use crate::{FeedlineError, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for chapter merging
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Fetch sponsor segments at all
    pub enabled: bool,
    /// Sponsor categories that become inactive chapters
    pub skip_categories: Vec<SkipCategory>,
    /// Age after which a timeline is refreshed from the provider
    pub refresh_interval_hours: Option<u64>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_categories: SkipCategory::ALL.to_vec(),
            refresh_interval_hours: Some(24),
        }
    }
}

impl From<&ChapterConfig> for MergeConfig {
    fn from(config: &ChapterConfig) -> Self {
        Self {
            enabled: config.merge_sponsor_chapters,
            skip_categories: config.skip_categories.clone(),
            refresh_interval_hours: Some(config.sponsor_refresh_hours),
        }
    }
}

/// Per-item bookkeeping
#[derive(Debug, Default)]
struct ItemSlot {
    /// Held for the whole duration of a recompute
    refresh_lock: Arc<Mutex<()>>,
    /// Highest generation handed out or installed
    issued: u64,
    /// Timelines with a lower generation are stale
    stale_before: u64,
    /// Whether the store was already consulted
    hydrated: bool,
}

/// Chapter merger with a generation-keyed timeline cache.
///
/// Timelines are immutable snapshots; a refresh installs a new `Arc<Timeline>`
/// and never edits the previous one. At most one recompute per item runs at a
/// time.
pub struct ChapterMerger {
    config: MergeConfig,
    timelines: RwLock<HashMap<String, Arc<Timeline>>>,
    slots: Mutex<HashMap<String, ItemSlot>>,
    store: Option<Arc<dyn TimelineStore>>,
}

impl ChapterMerger {
    /// Create a new merger without persistence
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            timelines: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Persist every installed timeline to `store` and hydrate from it
    pub fn with_store(mut self, store: Arc<dyn TimelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `native` chapters with `sponsor_segments`, unless the cached
    /// timeline for `item_id` is still fresh.
    ///
    /// Returns `Ok(None)` when no update is needed and the caller should keep
    /// its current timeline.
    pub async fn merge_or_refresh(
        &self,
        item_id: &str,
        native: &[Chapter],
        sponsor_segments: Option<&[SponsorSegment]>,
        total_duration: Option<f64>,
        force_refresh: bool,
    ) -> Result<Option<Arc<Timeline>>> {
        let lock = self.refresh_lock(item_id).await;
        let _guard = lock.lock().await;

        let native_digest = digest(&(native, total_duration))?;
        let input_digest = digest(&(native, sponsor_segments, total_duration))?;

        // Hydrate even when forced so new generations stay above the stored one
        let cached = self.current(item_id).await;
        if !force_refresh {
            if let Some(cached) = cached {
                if self.is_current_generation(&cached).await && cached.input_digest == input_digest {
                    debug!("Timeline for {} is up to date (generation {})", item_id, cached.generation);
                    return Ok(None);
                }
            }
        }

        self.rebuild(
            item_id,
            native,
            sponsor_segments.unwrap_or(&[]),
            total_duration,
            native_digest,
            input_digest,
        )
        .await
    }

    /// Fetch sponsor segments from `provider` and merge them, unless the cached
    /// timeline was built from the same native chapters and has not expired.
    pub async fn refresh_with_provider(
        &self,
        provider: &dyn SponsorSegmentProvider,
        item_id: &str,
        content_id: &str,
        native: &[Chapter],
        total_duration: Option<f64>,
        force_refresh: bool,
    ) -> Result<Option<Arc<Timeline>>> {
        if !self.config.enabled {
            debug!("Sponsor merging disabled, not refreshing {}", item_id);
            return Ok(None);
        }

        let lock = self.refresh_lock(item_id).await;
        let _guard = lock.lock().await;

        let native_digest = digest(&(native, total_duration))?;

        let cached = self.current(item_id).await;
        if !force_refresh {
            if let Some(cached) = cached {
                if self.is_current_generation(&cached).await
                    && cached.native_digest == native_digest
                    && !self.is_expired(&cached)
                {
                    debug!("Timeline for {} is fresh, skipping sponsor fetch", item_id);
                    return Ok(None);
                }
            }
        }

        info!("🔄 Fetching sponsor segments for {}", content_id);
        let segments = provider.fetch_segments(content_id).await?.unwrap_or_default();
        self.mark_stale(item_id).await;

        let input_digest = digest(&(native, Some(segments.as_slice()), total_duration))?;
        self.rebuild(item_id, native, &segments, total_duration, native_digest, input_digest)
            .await
    }

    /// Currently installed timeline for an item
    pub async fn cached(&self, item_id: &str) -> Option<Arc<Timeline>> {
        self.current(item_id).await
    }

    /// Mark the installed timeline stale so the next request recomputes it
    pub async fn invalidate(&self, item_id: &str) {
        self.mark_stale(item_id).await;
        info!("🗑️ Invalidated timeline for {}", item_id);
    }

    /// Drop the cached and stored timeline for an item
    pub async fn clear(&self, item_id: &str) -> Result<bool> {
        let removed = self.timelines.write().await.remove(item_id).is_some();
        self.mark_stale(item_id).await;

        let stored = match &self.store {
            Some(store) => store.remove(item_id).await?,
            None => false,
        };
        Ok(removed || stored)
    }

    /// Install a timeline produced elsewhere, e.g. loaded from persistence.
    ///
    /// Fails with [`FeedlineError::StaleCacheConflict`] when a newer generation
    /// is already installed.
    pub async fn install(&self, timeline: Timeline) -> Result<Arc<Timeline>> {
        let timeline = Arc::new(timeline);
        {
            let mut timelines = self.timelines.write().await;
            if let Some(existing) = timelines.get(&timeline.item_id) {
                if existing.generation > timeline.generation {
                    return Err(FeedlineError::StaleCacheConflict {
                        item_id: timeline.item_id.clone(),
                        generation: timeline.generation,
                        installed: existing.generation,
                    });
                }
            }
            timelines.insert(timeline.item_id.clone(), Arc::clone(&timeline));
        }

        let mut slots = self.slots.lock().await;
        let slot = slots.entry(timeline.item_id.clone()).or_default();
        slot.issued = slot.issued.max(timeline.generation);
        Ok(timeline)
    }

    async fn rebuild(
        &self,
        item_id: &str,
        native: &[Chapter],
        segments: &[SponsorSegment],
        total_duration: Option<f64>,
        native_digest: String,
        input_digest: String,
    ) -> Result<Option<Arc<Timeline>>> {
        let generation = self.reserve_generation(item_id).await;
        let chapters = merge_chapters(native, segments, total_duration, &self.config.skip_categories)?;

        let timeline = Timeline {
            item_id: item_id.to_string(),
            generation,
            chapters,
            total_duration,
            merged_at: Utc::now(),
            native_digest,
            input_digest,
        };

        match self.install(timeline).await {
            Ok(installed) => {
                info!(
                    "✅ Merged timeline for {}: {} chapters, generation {}",
                    item_id,
                    installed.chapters.len(),
                    installed.generation
                );
                self.persist(&installed).await;
                Ok(Some(installed))
            }
            Err(FeedlineError::StaleCacheConflict { generation, installed, .. }) => {
                debug!(
                    "Discarding generation {} for {}, generation {} is installed",
                    generation, item_id, installed
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, timeline: &Timeline) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(timeline).await {
                warn!("Failed to persist timeline for {}: {}", timeline.item_id, e);
            }
        }
    }

    /// Installed timeline, loading it from the store on first access
    async fn current(&self, item_id: &str) -> Option<Arc<Timeline>> {
        if let Some(timeline) = self.timelines.read().await.get(item_id) {
            return Some(Arc::clone(timeline));
        }

        let store = self.store.as_ref()?;
        {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(item_id.to_string()).or_default();
            if slot.hydrated {
                return None;
            }
            slot.hydrated = true;
        }

        match store.load(item_id).await {
            Ok(Some(timeline)) => self.install(timeline).await.ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load stored timeline for {}: {}", item_id, e);
                None
            }
        }
    }

    async fn refresh_lock(&self, item_id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(&slots.entry(item_id.to_string()).or_default().refresh_lock)
    }

    async fn reserve_generation(&self, item_id: &str) -> u64 {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(item_id.to_string()).or_default();
        slot.issued += 1;
        slot.issued
    }

    async fn mark_stale(&self, item_id: &str) {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(item_id.to_string()).or_default();
        slot.stale_before = slot.issued + 1;
    }

    async fn is_current_generation(&self, timeline: &Timeline) -> bool {
        let slots = self.slots.lock().await;
        slots
            .get(&timeline.item_id)
            .map_or(true, |slot| timeline.generation >= slot.stale_before)
    }

    fn is_expired(&self, timeline: &Timeline) -> bool {
        self.config.refresh_interval_hours.map_or(false, |hours| {
            Utc::now() - timeline.merged_at >= chrono::Duration::hours(hours as i64)
        })
    }
}

fn digest<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", md5::compute(bytes)))
}

/// Build a gapless timeline from native chapters and sponsor segments.
///
/// Sponsor segments are placed first; native chapters are clipped around them
/// and split when a segment lies inside. Gaps left between pieces get untitled
/// filler chapters.
pub fn merge_chapters(
    native: &[Chapter],
    segments: &[SponsorSegment],
    total_duration: Option<f64>,
    skip_categories: &[SkipCategory],
) -> Result<Vec<Chapter>> {
    let sponsors = sponsor_chapters(segments, total_duration, skip_categories);
    if native.is_empty() && sponsors.is_empty() {
        return Ok(Vec::new());
    }

    let bases = if native.is_empty() {
        vec![filler(0.0, total_duration)]
    } else {
        base_intervals(native, total_duration)
    };

    let mut pieces = Vec::with_capacity(bases.len() + sponsors.len() * 2);
    for base in &bases {
        subtract_sponsors(base, &sponsors, &mut pieces);
    }
    pieces.extend(sponsors);
    pieces.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut merged: Vec<Chapter> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let Some(gap_start) = merged.last().and_then(|prev| prev.end_time) {
            if piece.start_time - gap_start > TIME_EPSILON {
                merged.push(filler(gap_start, Some(piece.start_time)));
            }
        }
        merged.push(piece);
    }

    for index in 1..merged.len() {
        let start = merged[index].start_time;
        merged[index - 1].set_end(Some(start));
    }

    if let Some(total) = total_duration {
        let tail_end = merged.last().and_then(|last| last.end_time);
        match tail_end {
            Some(end) if total - end > TIME_EPSILON => merged.push(filler(end, Some(total))),
            _ => {
                if let Some(last) = merged.last_mut() {
                    last.set_end(Some(total));
                }
            }
        }
    }

    validate_timeline(&merged, total_duration)?;
    Ok(merged)
}

/// Ordered, non-overlapping sponsor chapters clipped to the duration
fn sponsor_chapters(
    segments: &[SponsorSegment],
    total_duration: Option<f64>,
    skip_categories: &[SkipCategory],
) -> Vec<Chapter> {
    let mut sorted: Vec<&SponsorSegment> = segments
        .iter()
        .filter(|s| s.start_time.is_finite() && s.end_time.is_finite())
        .collect();
    sorted.sort_by(|a, b| {
        a.start_time
            .total_cmp(&b.start_time)
            .then(a.end_time.total_cmp(&b.end_time))
    });

    let mut chapters: Vec<Chapter> = Vec::with_capacity(sorted.len());
    let mut last_end = 0.0_f64;

    for segment in sorted {
        let start = segment.start_time.max(last_end);
        let end = total_duration.map_or(segment.end_time, |total| segment.end_time.min(total));
        if end - start < TIME_EPSILON {
            continue;
        }

        let mut chapter = Chapter::with_interval(segment.category.display_name(), start, end);
        chapter.is_active = !skip_categories.contains(&segment.category);
        chapter.source = ChapterSource::Sponsor;
        chapter.category = Some(segment.category);
        chapters.push(chapter);
        last_end = end;
    }

    chapters
}

/// Native chapters as ordered, non-overlapping intervals
fn base_intervals(native: &[Chapter], total_duration: Option<f64>) -> Vec<Chapter> {
    let mut sorted: Vec<&Chapter> = native
        .iter()
        .filter(|c| c.start_time.is_finite())
        .filter(|c| total_duration.map_or(true, |total| c.start_time.max(0.0) < total))
        .collect();
    sorted.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut bases: Vec<Chapter> = Vec::with_capacity(sorted.len());
    for chapter in sorted {
        let start = chapter.start_time.max(0.0);
        if bases.last().map_or(false, |prev| start - prev.start_time < TIME_EPSILON) {
            warn!("⚠️ Dropping chapter '{}' with duplicate start {}", chapter.title, start);
            continue;
        }
        let mut base = chapter.clone();
        base.start_time = start;
        bases.push(base);
    }

    let next_starts: Vec<Option<f64>> = bases
        .iter()
        .skip(1)
        .map(|c| Some(c.start_time))
        .chain(std::iter::once(total_duration))
        .collect();

    for (base, limit) in bases.iter_mut().zip(next_starts) {
        let explicit = base.end_time.filter(|end| *end > base.start_time);
        let end = match (explicit, limit) {
            (Some(end), Some(limit)) => Some(end.min(limit)),
            (Some(end), None) => Some(end),
            (None, limit) => limit,
        };
        base.set_end(end);
    }

    bases
}

/// Push the parts of `base` not covered by any sponsor chapter
fn subtract_sponsors(base: &Chapter, sponsors: &[Chapter], pieces: &mut Vec<Chapter>) {
    let base_end = base.end_time.unwrap_or(f64::INFINITY);
    let mut cursor = base.start_time;
    let mut clipped = false;

    for sponsor in sponsors {
        let sponsor_end = sponsor.end_time.unwrap_or(f64::INFINITY);
        if sponsor_end <= cursor || sponsor.start_time >= base_end {
            continue;
        }
        clipped = true;
        if sponsor.start_time - cursor > TIME_EPSILON {
            pieces.push(piece_of(base, cursor, Some(sponsor.start_time), true));
        }
        cursor = cursor.max(sponsor_end);
        if cursor >= base_end - TIME_EPSILON {
            return;
        }
    }

    pieces.push(piece_of(base, cursor, base.end_time, clipped));
}

fn piece_of(base: &Chapter, start: f64, end: Option<f64>, clipped: bool) -> Chapter {
    let mut piece = base.clone();
    piece.start_time = start;
    piece.set_end(end);
    if clipped {
        piece.source = ChapterSource::Merged;
    }
    piece
}

fn filler(start: f64, end: Option<f64>) -> Chapter {
    let mut chapter = Chapter::new("", start);
    chapter.set_end(end);
    chapter.source = ChapterSource::Merged;
    chapter
}
