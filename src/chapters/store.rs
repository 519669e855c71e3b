/// Timeline persistence for merged chapter timelines
use super::Timeline;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Durable storage for merged timelines, keyed by item identifier.
///
/// `save` always replaces the stored timeline for the item as a whole.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn load(&self, item_id: &str) -> Result<Option<Timeline>>;
    async fn save(&self, timeline: &Timeline) -> Result<()>;
    async fn remove(&self, item_id: &str) -> Result<bool>;
}

/// Keeps timelines in memory only
#[derive(Debug, Default)]
pub struct MemoryTimelineStore {
    timelines: RwLock<HashMap<String, Timeline>>,
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.timelines.read().await.len()
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn load(&self, item_id: &str) -> Result<Option<Timeline>> {
        Ok(self.timelines.read().await.get(item_id).cloned())
    }

    async fn save(&self, timeline: &Timeline) -> Result<()> {
        self.timelines
            .write()
            .await
            .insert(timeline.item_id.clone(), timeline.clone());
        Ok(())
    }

    async fn remove(&self, item_id: &str) -> Result<bool> {
        Ok(self.timelines.write().await.remove(item_id).is_some())
    }
}

/// Stores each timeline as a JSON file in a directory
#[derive(Debug, Clone)]
pub struct FileTimelineStore {
    /// Store directory path
    store_dir: PathBuf,
}

impl FileTimelineStore {
    /// Create a new file store
    pub fn new(store_dir: PathBuf) -> Self {
        Self { store_dir }
    }

    /// Initialize store directory
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.store_dir).await?;
        info!("📁 Timeline store initialized: {}", self.store_dir.display());
        Ok(())
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// File name for an item, with path separators and other unsafe characters replaced
    fn timeline_path(&self, item_id: &str) -> PathBuf {
        let safe: String = item_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = md5::compute(item_id.as_bytes());
        self.store_dir.join(format!("{}_{:x}.json", safe, digest))
    }

    async fn read_timeline(path: &Path) -> Option<Timeline> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<Timeline>(&content) {
                Ok(timeline) => Some(timeline),
                Err(e) => {
                    warn!("Failed to parse timeline file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read timeline file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Paths of all timeline files in the store
    async fn timeline_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.store_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                files.push(path);
            }
        }

        Ok(files)
    }

    /// List all stored timelines, newest first
    pub async fn list_timelines(&self) -> Result<Vec<StoredTimelineInfo>> {
        let mut timelines = Vec::new();

        for path in self.timeline_files().await? {
            if let Some(timeline) = Self::read_timeline(&path).await {
                let age_hours = (Utc::now() - timeline.merged_at).num_hours().max(0) as u64;
                timelines.push(StoredTimelineInfo {
                    item_id: timeline.item_id.clone(),
                    generation: timeline.generation,
                    chapter_count: timeline.chapters.len(),
                    skipped_count: timeline.chapters.iter().filter(|c| !c.is_active).count(),
                    age_hours,
                    merged_at: timeline.merged_at.timestamp(),
                });
            }
        }

        timelines.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
        Ok(timelines)
    }

    /// Get store statistics; timelines older than `refresh_hours` count as expired
    pub async fn get_stats(&self, refresh_hours: u64) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        for info in self.list_timelines().await? {
            stats.total_files += 1;
            stats.total_chapters += info.chapter_count;
            if info.age_hours < refresh_hours {
                stats.fresh_files += 1;
            } else {
                stats.expired_files += 1;
            }
        }

        Ok(stats)
    }

    /// Remove every stored timeline
    pub async fn clear_all(&self) -> Result<usize> {
        let mut cleared_count = 0;

        for path in self.timeline_files().await? {
            if tokio::fs::remove_file(&path).await.is_ok() {
                cleared_count += 1;
                debug!("🗑️ Removed timeline file: {}", path.display());
            }
        }

        if cleared_count > 0 {
            info!("🧹 Cleared {} timeline files", cleared_count);
        }

        Ok(cleared_count)
    }
}

#[async_trait]
impl TimelineStore for FileTimelineStore {
    async fn load(&self, item_id: &str) -> Result<Option<Timeline>> {
        let path = self.timeline_path(item_id);
        if !path.exists() {
            debug!("Store miss: no timeline for {}", item_id);
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let timeline: Timeline = serde_json::from_str(&content)?;
        debug!("📚 Loaded timeline for {} (generation {})", item_id, timeline.generation);
        Ok(Some(timeline))
    }

    async fn save(&self, timeline: &Timeline) -> Result<()> {
        let path = self.timeline_path(&timeline.item_id);
        let json_content = serde_json::to_string_pretty(timeline)?;

        // Write then rename so readers never see a partial file
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json_content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(
            "💾 Saved timeline for {} ({} chapters, generation {})",
            timeline.item_id,
            timeline.chapters.len(),
            timeline.generation
        );
        Ok(())
    }

    async fn remove(&self, item_id: &str) -> Result<bool> {
        let path = self.timeline_path(item_id);

        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            info!("🗑️ Removed stored timeline for: {}", item_id);
            Ok(true)
        } else {
            debug!("Timeline file not found for: {}", item_id);
            Ok(false)
        }
    }
}

/// Store statistics
#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_files: usize,
    pub fresh_files: usize,
    pub expired_files: usize,
    pub total_chapters: usize,
}

/// Summary of one stored timeline
#[derive(Debug, Clone)]
pub struct StoredTimelineInfo {
    pub item_id: String,
    pub generation: u64,
    pub chapter_count: usize,
    pub skipped_count: usize,
    pub age_hours: u64,
    pub merged_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::Chapter;
    use tempfile::TempDir;

    fn timeline(item_id: &str, generation: u64) -> Timeline {
        Timeline {
            item_id: item_id.to_string(),
            generation,
            chapters: vec![
                Chapter::with_interval("Intro", 0.0, 30.0),
                Chapter::with_interval("Main", 30.0, 90.0),
            ],
            total_duration: Some(90.0),
            merged_at: Utc::now(),
            native_digest: "n".to_string(),
            input_digest: "i".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTimelineStore::new(temp_dir.path().to_path_buf());
        store.initialize().await.unwrap();

        store.save(&timeline("yt:video/abc", 1)).await.unwrap();
        store.save(&timeline("yt:video/abc", 2)).await.unwrap();

        let loaded = store.load("yt:video/abc").await.unwrap().unwrap();
        assert_eq!(loaded.generation, 2);
        assert_eq!(loaded.chapters.len(), 2);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_list_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTimelineStore::new(temp_dir.path().to_path_buf());
        store.initialize().await.unwrap();

        store.save(&timeline("a", 1)).await.unwrap();
        store.save(&timeline("b", 3)).await.unwrap();

        let listed = store.list_timelines().await.unwrap();
        assert_eq!(listed.len(), 2);

        let stats = store.get_stats(24).await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.fresh_files, 2);
        assert_eq!(stats.total_chapters, 4);

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryTimelineStore::new();
        store.save(&timeline("x", 1)).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load("x").await.unwrap().unwrap().generation, 1);
        assert!(store.remove("x").await.unwrap());
    }
}
