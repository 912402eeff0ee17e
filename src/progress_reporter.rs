use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use thousands::Separable;

/// Interval between progress log lines when no progress bar is shown
const PERIODIC_REPORT_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct PeriodicLogState {
    total: u64,
    event_label: String,
    progress: AtomicU64,
    is_running: AtomicBool,
}

impl PeriodicLogState {
    fn report(&self) {
        let progress = self.progress.load(Ordering::SeqCst);
        let percent = if self.total > 0 {
            (100 * progress) / self.total
        } else {
            0
        };
        info!(
            "Processed {} of {} {} ({}%)",
            progress.separate_with_commas(),
            self.total.separate_with_commas(),
            self.event_label,
            percent,
        );
    }
}

enum ReporterType {
    Bar(ProgressBar),
    PeriodicLog(Arc<PeriodicLogState>),
}

/// Progress reporter for region processing
///
/// A progress bar is shown on a tty, otherwise progress is periodically written to the log.
///
pub struct ProgressReporter {
    reporter_type: ReporterType,
}

impl ProgressReporter {
    pub fn new(event_count: u64, event_label: &str) -> Self {
        let template = format!(
            "[{{elapsed_precise}}] [{{bar:40}}] Processed {{human_pos}} of {{human_len}} {event_label} ({{percent}}%)"
        );
        let progress_bar = ProgressBar::new(event_count);
        if let Ok(style) = ProgressStyle::with_template(&template) {
            progress_bar.set_style(style.progress_chars("=> "));
        }

        let reporter_type = if progress_bar.is_hidden() {
            let state = Arc::new(PeriodicLogState {
                total: event_count,
                event_label: event_label.to_string(),
                progress: AtomicU64::new(0),
                is_running: AtomicBool::new(true),
            });
            {
                let state = state.clone();
                std::thread::spawn(move || loop {
                    std::thread::sleep(PERIODIC_REPORT_INTERVAL);
                    if !state.is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    state.report();
                });
            }
            ReporterType::PeriodicLog(state)
        } else {
            progress_bar.tick();
            ReporterType::Bar(progress_bar)
        };

        Self { reporter_type }
    }

    pub fn inc(&self, delta: u64) {
        match &self.reporter_type {
            ReporterType::Bar(progress_bar) => progress_bar.inc(delta),
            ReporterType::PeriodicLog(state) => {
                state.progress.fetch_add(delta, Ordering::SeqCst);
            }
        }
    }

    /// Clear the progress bar, or write the final progress log line
    pub fn finish(&self) {
        match &self.reporter_type {
            ReporterType::Bar(progress_bar) => progress_bar.finish_and_clear(),
            ReporterType::PeriodicLog(state) => {
                if state.is_running.swap(false, Ordering::Relaxed) {
                    state.report();
                }
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}
