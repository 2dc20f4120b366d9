use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_secs(1);

/// Cosmetic once-per-second bar shown while a sweep window is open.
pub struct ProgressReporter {
    bar: ProgressBar,
    seconds: u64,
}

impl ProgressReporter {
    pub fn new(seconds: u64) -> Self {
        let bar = ProgressBar::new(seconds);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len}s {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message("waiting for echo replies");
        Self { bar, seconds }
    }

    /// A reporter that draws nothing.
    pub fn hidden(seconds: u64) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            seconds,
        }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Tick once per second for the configured number of seconds, or until
    /// `stop` fires.
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            // First tick completes immediately.
            interval.tick().await;
            let mut ticks = 0;
            while ticks < self.seconds {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        self.bar.inc(1);
                        ticks += 1;
                    }
                }
            }
            self.bar.finish_and_clear();
            ticks
        })
    }
}
