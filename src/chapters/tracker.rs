/// Playback chapter tracking over a merged timeline
use super::{Chapter, Timeline};
use crate::config::PlaybackConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tracker tuning
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Seconds into a chapter after which "previous" restarts it instead
    pub previous_chapter_delay: f64,
    /// Distance from the end targeted when skipping a trailing inactive chapter
    pub end_skip_margin: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            previous_chapter_delay: 4.0,
            end_skip_margin: 0.5,
        }
    }
}

impl From<&PlaybackConfig> for TrackerConfig {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            previous_chapter_delay: config.previous_chapter_delay_seconds,
            end_skip_margin: config.end_skip_margin_seconds,
        }
    }
}

/// Tracker state; indices point into the tracked timeline's chapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    NoTimeline,
    Tracking {
        current: Option<usize>,
        next: Option<usize>,
        previous: Option<usize>,
    },
}

/// Follows the playback clock across a chapter timeline.
///
/// The host feeds clock samples into [`monitor`](Self::monitor), forwards
/// user seeks through [`seek`](Self::seek) and applies whatever
/// [`take_pending_seek`](Self::take_pending_seek) returns. Chapters are only
/// recomputed when the clock leaves the current chapter.
#[derive(Debug)]
pub struct ChapterTimelineTracker {
    config: TrackerConfig,
    timeline: Option<Arc<Timeline>>,
    state: TrackerState,
    current_time: f64,
    playback_speed: f64,
    pending_seek: Option<f64>,
    recompute_scheduled: bool,
    /// Chapter start that ends the wait while no chapter is current
    wake_at: Option<f64>,
}

impl ChapterTimelineTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            timeline: None,
            state: TrackerState::NoTimeline,
            current_time: 0.0,
            playback_speed: 1.0,
            pending_seek: None,
            recompute_scheduled: false,
            wake_at: None,
        }
    }

    /// Replace the tracked timeline; `None` or an empty timeline stops tracking
    pub fn set_timeline(&mut self, timeline: Option<Arc<Timeline>>) {
        self.pending_seek = None;
        self.wake_at = None;

        match timeline.filter(|t| !t.is_empty()) {
            Some(timeline) => {
                debug!(
                    "Tracking {} chapters for {} (generation {})",
                    timeline.len(),
                    timeline.item_id,
                    timeline.generation
                );
                self.timeline = Some(timeline);
                self.state = TrackerState::Tracking {
                    current: None,
                    next: None,
                    previous: None,
                };
                self.recompute_scheduled = true;
            }
            None => self.clear(),
        }
    }

    /// Stop tracking
    pub fn clear(&mut self) {
        self.timeline = None;
        self.state = TrackerState::NoTimeline;
        self.pending_seek = None;
        self.recompute_scheduled = false;
        self.wake_at = None;
    }

    /// Advance the clock. Returns whether the chapter state was recomputed.
    pub fn monitor(&mut self, time: f64) -> bool {
        self.current_time = time;

        if !self.needs_recompute(time) {
            return false;
        }
        self.recompute(time);
        true
    }

    /// The host moved the playhead
    pub fn seek(&mut self, time: f64) {
        self.current_time = time;
        self.pending_seek = None;
        if self.timeline.is_some() {
            self.recompute(time);
        }
    }

    /// Jump to the next active chapter
    pub fn go_to_next(&mut self) -> bool {
        match self.next_chapter().map(|c| c.start_time) {
            Some(start) => {
                self.issue_seek(start);
                true
            }
            None => false,
        }
    }

    /// Restart the current chapter, or jump to the previous one when called
    /// shortly after the current chapter started
    pub fn go_to_previous(&mut self) -> bool {
        let Some(current_start) = self.current_chapter().map(|c| c.start_time) else {
            return false;
        };

        let elapsed = self.current_time - current_start;
        let threshold = self.config.previous_chapter_delay * self.playback_speed;
        let target = match self.previous_chapter() {
            Some(previous) if elapsed < threshold => previous.start_time,
            _ => current_start,
        };

        self.issue_seek(target);
        true
    }

    /// Jump to the chapter at `index`
    pub fn set_chapter(&mut self, index: usize) -> bool {
        let start = self
            .timeline
            .as_ref()
            .and_then(|t| t.chapters.get(index))
            .map(|c| c.start_time);

        match start {
            Some(start) => {
                self.issue_seek(start);
                true
            }
            None => false,
        }
    }

    /// Seek the host should perform, consumed on read
    pub fn take_pending_seek(&mut self) -> Option<f64> {
        self.pending_seek.take()
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    pub fn set_playback_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.playback_speed = speed;
        } else {
            warn!("Ignoring invalid playback speed {}", speed);
        }
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// True when there is neither a previous nor a current chapter
    pub fn previous_chapter_disabled(&self) -> bool {
        self.previous_chapter().is_none() && self.current_chapter().is_none()
    }

    /// Move a resume position out of leading inactive chapters.
    ///
    /// Keeps `time` when an active chapter starts at or before it, otherwise
    /// moves it to the first active chapter that starts after it.
    pub fn adjust_start_position(&self, time: f64) -> f64 {
        let Some(timeline) = &self.timeline else {
            return time;
        };

        let active = || timeline.chapters.iter().filter(|c| c.is_active);
        if active().any(|c| c.start_time <= time) {
            return time;
        }

        active()
            .find(|c| c.start_time > time)
            .map_or(time, |c| c.start_time)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn timeline(&self) -> Option<&Arc<Timeline>> {
        self.timeline.as_ref()
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapter(|current, _, _| current)
    }

    pub fn next_chapter(&self) -> Option<&Chapter> {
        self.chapter(|_, next, _| next)
    }

    pub fn previous_chapter(&self) -> Option<&Chapter> {
        self.chapter(|_, _, previous| previous)
    }

    fn chapter<F>(&self, select: F) -> Option<&Chapter>
    where
        F: Fn(Option<usize>, Option<usize>, Option<usize>) -> Option<usize>,
    {
        let timeline = self.timeline.as_ref()?;
        match self.state {
            TrackerState::Tracking { current, next, previous } => {
                timeline.chapters.get(select(current, next, previous)?)
            }
            TrackerState::NoTimeline => None,
        }
    }

    fn issue_seek(&mut self, time: f64) {
        self.pending_seek = Some(time);
        self.current_time = time;
        self.recompute(time);
    }

    fn needs_recompute(&self, time: f64) -> bool {
        if self.timeline.is_none() {
            return false;
        }
        if self.recompute_scheduled {
            return true;
        }

        match self.current_chapter() {
            Some(chapter) => {
                time < chapter.start_time || chapter.end_time.map_or(false, |end| time >= end)
            }
            None => self.wake_at.map_or(false, |start| time >= start),
        }
    }

    fn recompute(&mut self, time: f64) {
        self.recompute_scheduled = false;

        let Some(timeline) = self.timeline.clone() else {
            self.state = TrackerState::NoTimeline;
            return;
        };
        let chapters = &timeline.chapters;

        let current = chapters.iter().position(|c| c.contains(time));
        let anchor = current.map_or(time, |index| chapters[index].start_time);
        let next = chapters.iter().position(|c| c.is_active && c.start_time > anchor);
        let previous = chapters.iter().rposition(|c| c.is_active && c.start_time < anchor);

        self.wake_at = match current {
            Some(_) => None,
            None => chapters.iter().map(|c| c.start_time).find(|start| *start > time),
        };
        self.state = TrackerState::Tracking { current, next, previous };

        debug!(
            "Chapter state at {:.3}s: current {:?}, next {:?}, previous {:?}",
            time, current, next, previous
        );

        if let Some(index) = current {
            let chapter = &chapters[index];
            if !chapter.is_active {
                let target = next.map(|i| chapters[i].start_time).or_else(|| {
                    timeline
                        .total_duration
                        .map(|total| total - self.config.end_skip_margin)
                });

                if let Some(target) = target.filter(|target| *target > time) {
                    info!("⏭️ Skipping '{}' to {:.3}s", chapter.display_title(), target);
                    self.pending_seek = Some(target);
                }
            }
        }
    }
}

impl Default for ChapterTimelineTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::ChapterSource;
    use crate::sponsor::SkipCategory;
    use chrono::Utc;

    fn sponsor(start: f64, end: f64) -> Chapter {
        let mut chapter = Chapter::with_interval("Sponsor", start, end);
        chapter.is_active = false;
        chapter.source = ChapterSource::Sponsor;
        chapter.category = Some(SkipCategory::Sponsor);
        chapter
    }

    fn timeline(chapters: Vec<Chapter>, total_duration: Option<f64>) -> Arc<Timeline> {
        Arc::new(Timeline {
            item_id: "video".to_string(),
            generation: 1,
            chapters,
            total_duration,
            merged_at: Utc::now(),
            native_digest: String::new(),
            input_digest: String::new(),
        })
    }

    fn tracker_with(chapters: Vec<Chapter>, total_duration: Option<f64>) -> ChapterTimelineTracker {
        let mut tracker = ChapterTimelineTracker::default();
        tracker.set_timeline(Some(timeline(chapters, total_duration)));
        tracker
    }

    fn standard() -> ChapterTimelineTracker {
        tracker_with(
            vec![
                Chapter::with_interval("Intro", 0.0, 10.0),
                sponsor(10.0, 20.0),
                Chapter::with_interval("Main", 20.0, 30.0),
                Chapter::with_interval("Outro", 30.0, 60.0),
            ],
            Some(60.0),
        )
    }

    #[test]
    fn test_no_timeline() {
        let mut tracker = ChapterTimelineTracker::default();
        assert_eq!(tracker.state(), TrackerState::NoTimeline);
        assert!(!tracker.monitor(5.0));
        assert!(!tracker.go_to_next());
        assert!(!tracker.go_to_previous());
        assert!(tracker.previous_chapter_disabled());
    }

    #[test]
    fn test_empty_timeline_is_no_timeline() {
        let mut tracker = standard();
        tracker.set_timeline(Some(timeline(Vec::new(), Some(10.0))));
        assert_eq!(tracker.state(), TrackerState::NoTimeline);
    }

    #[test]
    fn test_auto_skip_inactive_chapter() {
        let mut tracker = standard();

        assert!(tracker.monitor(12.0));
        assert!(!tracker.current_chapter().unwrap().is_active);
        assert_eq!(tracker.pending_seek(), Some(20.0));
        assert_eq!(tracker.take_pending_seek(), Some(20.0));
        assert_eq!(tracker.pending_seek(), None);

        tracker.seek(20.0);
        assert_eq!(tracker.current_chapter().unwrap().title, "Main");
        assert_eq!(tracker.pending_seek(), None);
    }

    #[test]
    fn test_trailing_inactive_chapter_skips_to_end() {
        let mut tracker = tracker_with(
            vec![Chapter::with_interval("Main", 0.0, 50.0), sponsor(50.0, 60.0)],
            Some(60.0),
        );

        tracker.monitor(51.0);
        assert_eq!(tracker.take_pending_seek(), Some(59.5));
    }

    #[test]
    fn test_monitor_only_recomputes_on_boundary() {
        let mut tracker = standard();

        assert!(tracker.monitor(1.0));
        assert!(!tracker.monitor(5.0));
        assert!(!tracker.monitor(9.9));
        assert!(tracker.monitor(10.0));
        assert!(tracker.monitor(2.0));
        assert_eq!(tracker.current_chapter().unwrap().title, "Intro");
    }

    #[test]
    fn test_neighbours_skip_inactive_chapters() {
        let mut tracker = standard();
        tracker.monitor(25.0);

        assert_eq!(tracker.current_chapter().unwrap().title, "Main");
        assert_eq!(tracker.next_chapter().unwrap().title, "Outro");
        assert_eq!(tracker.previous_chapter().unwrap().title, "Intro");
        assert_eq!(
            tracker.state(),
            TrackerState::Tracking {
                current: Some(2),
                next: Some(3),
                previous: Some(0)
            }
        );
    }

    #[test]
    fn test_waits_for_next_chapter_start() {
        let mut tracker = tracker_with(
            vec![Chapter::with_interval("Late", 30.0, 40.0), Chapter::with_interval("Later", 40.0, 50.0)],
            Some(50.0),
        );

        assert!(tracker.monitor(5.0));
        assert!(tracker.current_chapter().is_none());
        assert!(!tracker.monitor(20.0));
        assert!(tracker.monitor(30.0));
        assert_eq!(tracker.current_chapter().unwrap().title, "Late");

        // Past the last chapter, nothing wakes the tracker up again
        assert!(tracker.monitor(55.0));
        assert!(tracker.current_chapter().is_none());
        assert!(!tracker.monitor(100.0));
    }

    #[test]
    fn test_go_to_next() {
        let mut tracker = standard();
        tracker.monitor(2.0);

        assert!(tracker.go_to_next());
        assert_eq!(tracker.take_pending_seek(), Some(20.0));
        assert_eq!(tracker.current_chapter().unwrap().title, "Main");

        assert!(tracker.go_to_next());
        assert_eq!(tracker.current_chapter().unwrap().title, "Outro");
        assert!(!tracker.go_to_next());
    }

    #[test]
    fn test_go_to_previous_jumps_back_early_in_chapter() {
        let mut tracker = standard();
        tracker.monitor(31.0);

        assert!(tracker.go_to_previous());
        assert_eq!(tracker.take_pending_seek(), Some(20.0));
        assert_eq!(tracker.current_chapter().unwrap().title, "Main");
    }

    #[test]
    fn test_go_to_previous_restarts_late_in_chapter() {
        let mut tracker = standard();
        tracker.monitor(50.2);

        assert!(tracker.go_to_previous());
        assert_eq!(tracker.take_pending_seek(), Some(30.0));
        assert_eq!(tracker.current_chapter().unwrap().title, "Outro");
    }

    #[test]
    fn test_previous_threshold_scales_with_speed() {
        let mut tracker = standard();
        tracker.set_playback_speed(2.0);
        tracker.monitor(36.0);

        assert!(tracker.go_to_previous());
        assert_eq!(tracker.take_pending_seek(), Some(20.0));
    }

    #[test]
    fn test_go_to_previous_without_previous_restarts() {
        let mut tracker = standard();
        tracker.monitor(1.0);

        assert!(tracker.go_to_previous());
        assert_eq!(tracker.take_pending_seek(), Some(0.0));
    }

    #[test]
    fn test_previous_chapter_disabled() {
        let mut tracker = tracker_with(vec![Chapter::with_interval("Late", 30.0, 40.0)], Some(40.0));
        tracker.monitor(5.0);
        assert!(tracker.previous_chapter_disabled());

        tracker.monitor(35.0);
        assert!(!tracker.previous_chapter_disabled());
    }

    #[test]
    fn test_adjust_start_position() {
        let tracker = tracker_with(
            vec![sponsor(0.0, 15.0), Chapter::with_interval("Main", 15.0, 60.0)],
            Some(60.0),
        );
        assert_eq!(tracker.adjust_start_position(0.0), 15.0);
        assert_eq!(tracker.adjust_start_position(40.0), 40.0);

        let untracked = ChapterTimelineTracker::default();
        assert_eq!(untracked.adjust_start_position(7.0), 7.0);
    }

    #[test]
    fn test_set_chapter() {
        let mut tracker = standard();
        assert!(tracker.set_chapter(3));
        assert_eq!(tracker.take_pending_seek(), Some(30.0));
        assert!(!tracker.set_chapter(9));
    }

    #[test]
    fn test_invalid_speed_is_ignored() {
        let mut tracker = ChapterTimelineTracker::default();
        tracker.set_playback_speed(0.0);
        tracker.set_playback_speed(f64::NAN);
        assert_eq!(tracker.playback_speed(), 1.0);
    }
}
