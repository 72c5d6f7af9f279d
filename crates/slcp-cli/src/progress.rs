//! Terminal progress display for image transfers.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use slcp_net::{Direction, TransferProgress};
use std::collections::HashMap;

/// One bar per transfer in flight, keyed by direction and peer.
pub struct TransferBars {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<(Direction, String), ProgressBar>,
}

impl Default for TransferBars {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferBars {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("  {prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .expect("valid template")
            .progress_chars("##-");
        Self {
            multi: MultiProgress::new(),
            style,
            bars: HashMap::new(),
        }
    }

    /// Apply a progress report, creating the bar on first sight and
    /// clearing it once the transfer completes.
    pub fn update(&mut self, progress: &TransferProgress) {
        let key = (progress.direction, progress.peer.clone());
        let bar = self.bars.entry(key.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(progress.total));
            bar.set_style(self.style.clone());
            bar.set_prefix(match progress.direction {
                Direction::Send => format!("to {}", progress.peer),
                Direction::Receive => format!("from {}", progress.peer),
            });
            bar
        });
        bar.set_length(progress.total);
        bar.set_position(progress.transferred);

        if progress.is_complete() {
            bar.finish_and_clear();
            self.bars.remove(&key);
        }
    }

    /// Drop the bar for a transfer that ended early.
    pub fn abandon(&mut self, direction: Direction, peer: &str) {
        if let Some(bar) = self.bars.remove(&(direction, peer.to_string())) {
            bar.abandon_with_message("failed");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.bars.len()
    }

    /// Suspend progress bars for clean println output, then resume.
    pub fn suspend<F: FnOnce()>(&self, f: F) {
        self.multi.suspend(f);
    }
}
