use serde::{Deserialize, Serialize};

/// One file being fetched while the model initializes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressItem {
    pub file: String,
    /// Percentage, 0-100. Never decreases while the item is tracked.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressItem {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            progress: 0.0,
            name: None,
            loaded: None,
            total: None,
        }
    }
}

/// Auxiliary fields merged into an item on a progress tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub loaded: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    items: Vec<ProgressItem>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Starts tracking a file. A second `initiate` for a key already being
    /// tracked is ignored so the stored progress never goes backwards.
    pub fn on_file_initiated(&mut self, item: ProgressItem) -> bool {
        if self.get(&item.file).is_some() {
            tracing::debug!(file = %item.file, "duplicate initiate ignored");
            return false;
        }
        self.items.push(item);
        true
    }

    /// Returns false when the file is not tracked.
    pub fn on_file_progress(&mut self, file: &str, progress: f64, extra: ProgressUpdate) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.file == file) else {
            tracing::debug!(file, "progress for untracked file");
            return false;
        };
        if progress > item.progress {
            item.progress = progress.min(100.0);
        }
        if extra.loaded.is_some() {
            item.loaded = extra.loaded;
        }
        if extra.total.is_some() {
            item.total = extra.total;
        }
        true
    }

    pub fn on_file_done(&mut self, file: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.file != file);
        before != self.items.len()
    }

    pub fn get(&self, file: &str) -> Option<&ProgressItem> {
        self.items.iter().find(|item| item.file == file)
    }

    pub fn items(&self) -> &[ProgressItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Combined fraction (0-1) across every item that reports byte counts,
    /// falling back to the mean percentage when none do.
    pub fn overall(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        let (loaded, total) = self
            .items
            .iter()
            .filter_map(|item| Some((item.loaded?, item.total?)))
            .fold((0u64, 0u64), |(l, t), (il, it)| {
                // Counts come from the worker; a bogus total must not overflow.
                (l.saturating_add(il.min(it)), t.saturating_add(it))
            });
        if total > 0 {
            return Some((loaded as f64 / total as f64).min(1.0));
        }
        let sum: f64 = self.items.iter().map(|item| item.progress).sum();
        Some(sum / self.items.len() as f64 / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_progress_done_leaves_empty() {
        let mut tracker = ProgressTracker::new();
        tracker.on_file_initiated(ProgressItem::new("model.bin"));
        assert!(tracker.on_file_progress("model.bin", 50.0, ProgressUpdate::default()));
        assert_eq!(tracker.get("model.bin").unwrap().progress, 50.0);
        assert!(tracker.on_file_done("model.bin"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_overall_saturates_on_huge_totals() {
        let mut tracker = ProgressTracker::new();
        tracker.on_file_initiated(ProgressItem {
            loaded: Some(u64::MAX),
            total: Some(u64::MAX),
            ..ProgressItem::new("a")
        });
        tracker.on_file_initiated(ProgressItem {
            loaded: Some(0),
            total: Some(10),
            ..ProgressItem::new("b")
        });
        let overall = tracker.overall().unwrap();
        assert!((0.0..=1.0).contains(&overall));
    }

    #[test]
    fn test_overall_clamps_loaded_to_total() {
        let mut tracker = ProgressTracker::new();
        tracker.on_file_initiated(ProgressItem::new("a"));
        tracker.on_file_progress("a", 10.0, ProgressUpdate { loaded: Some(50), total: Some(100) });
        tracker.on_file_progress("a", 20.0, ProgressUpdate { loaded: None, total: Some(40) });
        assert_eq!(tracker.overall(), Some(1.0));
    }

    #[test]
    fn test_done_twice_is_noop() {
        let mut tracker = ProgressTracker::new();
        tracker.on_file_initiated(ProgressItem::new("a"));
        tracker.on_file_initiated(ProgressItem::new("b"));
        assert!(tracker.on_file_done("a"));
        assert!(!tracker.on_file_done("a"));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.items()[0].file, "b");
    }

    #[test]
    fn test_duplicate_initiate_keeps_single_item() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.on_file_initiated(ProgressItem::new("a")));
        tracker.on_file_progress("a", 40.0, ProgressUpdate::default());
        assert!(!tracker.on_file_initiated(ProgressItem::new("a")));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("a").unwrap().progress, 40.0);
    }

    #[test]
    fn test_unknown_file_progress_is_noop() {
        let mut tracker = ProgressTracker::new();
        assert!(!tracker.on_file_progress("ghost", 10.0, ProgressUpdate::default()));
        assert!(!tracker.on_file_done("ghost"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_progress_never_decreases_and_merges_extra() {
        let mut tracker = ProgressTracker::new();
        tracker.on_file_initiated(ProgressItem::new("a"));
        tracker.on_file_progress("a", 60.0, ProgressUpdate { loaded: Some(60), total: Some(100) });
        tracker.on_file_progress("a", 30.0, ProgressUpdate { loaded: Some(61), total: None });
        let item = tracker.get("a").unwrap();
        assert_eq!(item.progress, 60.0);
        assert_eq!(item.loaded, Some(61));
        assert_eq!(item.total, Some(100));
    }

    #[test]
    fn test_keys_stay_unique_over_mixed_sequence() {
        let mut tracker = ProgressTracker::new();
        let files = ["a", "b", "a", "c", "b", "a"];
        for (i, file) in files.iter().enumerate() {
            match i % 3 {
                0 => {
                    tracker.on_file_initiated(ProgressItem::new(*file));
                }
                1 => {
                    tracker.on_file_progress(file, i as f64 * 10.0, ProgressUpdate::default());
                }
                _ => {
                    tracker.on_file_initiated(ProgressItem::new(*file));
                }
            }
            let mut keys: Vec<&str> = tracker.items().iter().map(|item| item.file.as_str()).collect();
            let len = keys.len();
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), len);
        }
    }

    #[test]
    fn test_overall_prefers_byte_counts() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.overall(), None);
        tracker.on_file_initiated(ProgressItem::new("a"));
        tracker.on_file_initiated(ProgressItem::new("b"));
        tracker.on_file_progress("a", 50.0, ProgressUpdate::default());
        assert_eq!(tracker.overall(), Some(0.25));

        tracker.on_file_progress("a", 50.0, ProgressUpdate { loaded: Some(10), total: Some(40) });
        tracker.on_file_progress("b", 10.0, ProgressUpdate { loaded: Some(10), total: Some(60) });
        assert_eq!(tracker.overall(), Some(0.2));
    }
}
