use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use browser_llm::format::download_label;
use browser_llm::ProgressTracker;

pub struct Progress {
    spinner: Option<ProgressBar>,
}

impl Progress {
    pub fn new() -> Self {
        Self { spinner: None }
    }

    pub fn spinner(&mut self, message: &str) {
        if let Some(ref spinner) = self.spinner {
            spinner.set_message(message.to_string());
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    pub fn stop_and_clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// One bar per file the tracker currently holds.
pub struct DownloadBars {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: Option<ProgressStyle>,
}

impl DownloadBars {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style: ProgressStyle::default_bar()
                .template("{prefix:<28} [{bar:40.cyan/blue}] {msg}")
                .ok()
                .map(|s| s.progress_chars("=> ")),
        }
    }

    pub fn sync(&mut self, tracker: &ProgressTracker) {
        for item in tracker.items() {
            let bar = self.bars.entry(item.file.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                if let Some(style) = &self.style {
                    bar.set_style(style.clone());
                }
                bar.set_prefix(item.file.clone());
                bar
            });
            bar.set_position(item.progress.round() as u64);
            bar.set_message(download_label(item.progress, item.loaded, item.total));
        }

        let finished: Vec<String> = self
            .bars
            .keys()
            .filter(|file| tracker.get(file).is_none())
            .cloned()
            .collect();
        for file in finished {
            if let Some(bar) = self.bars.remove(&file) {
                bar.finish_and_clear();
                self.multi.remove(&bar);
            }
        }
    }

    pub fn clear(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
    }
}

impl Default for DownloadBars {
    fn default() -> Self {
        Self::new()
    }
}
