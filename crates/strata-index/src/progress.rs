//! Live progress reporting for indexing runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DISPLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressStats {
    pub total: u64,
    pub processed: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub deleted: u64,
    pub current_file: Option<String>,
    pub elapsed: Duration,
}

impl ProgressStats {
    /// Processed share of `total`, clamped to `0..=100`.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.processed as f64 / self.total as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }

    #[must_use]
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.processed as f64 / secs;
        rate
    }

    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.files_per_second();
        let remaining = self.total.saturating_sub(self.processed);
        if rate <= 0.0 || remaining == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = remaining as f64 / rate;
        Some(Duration::from_secs_f64(secs.floor()))
    }
}

/// `45s`, `3m12s`, `2h5m`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    processed: AtomicU64,
    indexed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    deleted: AtomicU64,
    current_file: Mutex<Option<String>>,
    extractors: Mutex<BTreeMap<String, u64>>,
}

struct Display {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Thread-safe counters plus an optional once-per-second log line.
///
/// Snapshots are also published on a [`watch`] channel for callers that
/// render their own progress.
pub struct ProgressTracker {
    enabled: bool,
    counters: Arc<Counters>,
    started: Mutex<Instant>,
    display: Mutex<Option<Display>>,
    tx: watch::Sender<ProgressStats>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        let (tx, _rx) = watch::channel(ProgressStats::default());
        Self {
            enabled,
            counters: Arc::new(Counters::default()),
            started: Mutex::new(Instant::now()),
            display: Mutex::new(None),
            tx,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressStats> {
        self.tx.subscribe()
    }

    /// Zero the counters and restart the clock. When enabled, also starts
    /// the display loop; a second call while running only resets.
    pub fn start(self: &Arc<Self>) {
        self.reset();
        if !self.enabled {
            return;
        }
        let mut display = self.display.lock().unwrap_or_else(PoisonError::into_inner);
        if display.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let tracker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DISPLAY_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => tracker.report(),
                }
            }
        });
        *display = Some(Display { token, handle });
    }

    /// Stop the display loop, then log the final line and a summary.
    pub async fn stop(&self) {
        let display = self
            .display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(display) = display else {
            return;
        };
        display.token.cancel();
        if let Err(e) = display.handle.await {
            tracing::debug!("progress display task ended abnormally: {e}");
        }
        self.report();
        self.log_summary();
    }

    fn reset(&self) {
        let c = &self.counters;
        for counter in [&c.total, &c.processed, &c.indexed, &c.skipped, &c.failed, &c.deleted] {
            counter.store(0, Ordering::Relaxed);
        }
        *c.current_file.lock().unwrap_or_else(PoisonError::into_inner) = None;
        c.extractors.lock().unwrap_or_else(PoisonError::into_inner).clear();
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn set_total(&self, total: u64) {
        self.counters.total.store(total, Ordering::Relaxed);
    }

    pub fn inc_total(&self) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_current_file(&self, file: &str) {
        if self.enabled {
            *self
                .counters
                .current_file
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(file.to_owned());
        }
    }

    /// Count one finished document as indexed.
    pub fn record_indexed(&self) {
        self.counters.indexed.fetch_add(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extractor(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        *self
            .counters
            .extractors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_owned())
            .or_default() += 1;
    }

    #[must_use]
    pub fn extractor_stats(&self) -> BTreeMap<String, u64> {
        self.counters
            .extractors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        let c = &self.counters;
        ProgressStats {
            total: c.total.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            indexed: c.indexed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            deleted: c.deleted.load(Ordering::Relaxed),
            current_file: c
                .current_file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            elapsed: self
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed(),
        }
    }

    fn report(&self) {
        let stats = self.stats();
        self.tx.send_replace(stats.clone());
        if stats.total == 0 {
            return;
        }
        let eta = stats.eta().map(format_duration).unwrap_or_default();
        tracing::info!(
            processed = stats.processed,
            total = stats.total,
            failed = stats.failed,
            files_per_sec = format!("{:.1}", stats.files_per_second()),
            eta = %eta,
            current = stats.current_file.as_deref().unwrap_or(""),
            "indexing progress {:.1}%",
            stats.percentage()
        );
    }

    fn log_summary(&self) {
        let stats = self.stats();
        tracing::info!(
            total = stats.total,
            indexed = stats.indexed,
            skipped = stats.skipped,
            failed = stats.failed,
            deleted = stats.deleted,
            elapsed = %format_duration(stats.elapsed),
            "indexing complete"
        );
        for (extractor, count) in self.extractor_stats() {
            tracing::info!(extractor = %extractor, count, "extractor usage");
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(192)), "3m12s");
        assert_eq!(format_duration(Duration::from_secs(7500)), "2h5m");
    }

    #[test]
    fn percentage_is_clamped() {
        let stats = ProgressStats {
            total: 4,
            processed: 6,
            ..ProgressStats::default()
        };
        assert!((stats.percentage() - 100.0).abs() < f64::EPSILON);
        assert!(ProgressStats::default().percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn eta_needs_progress_and_remaining_work() {
        let stats = ProgressStats {
            total: 10,
            processed: 5,
            elapsed: Duration::from_secs(10),
            ..ProgressStats::default()
        };
        assert_eq!(stats.eta(), Some(Duration::from_secs(10)));
        let done = ProgressStats {
            processed: 10,
            ..stats.clone()
        };
        assert_eq!(done.eta(), None);
    }

    #[test]
    fn counters_accumulate() {
        let t = ProgressTracker::new(false);
        t.set_total(3);
        t.record_indexed();
        t.record_skipped();
        t.record_failed();
        t.record_deleted();
        t.record_extractor("TextExtractor");
        t.record_extractor("TextExtractor");
        t.record_extractor("");
        let s = t.stats();
        assert_eq!((s.processed, s.indexed, s.skipped, s.failed, s.deleted), (3, 1, 1, 1, 1));
        assert_eq!(t.extractor_stats().get("TextExtractor"), Some(&2));
        assert_eq!(t.extractor_stats().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn display_loop_publishes_snapshots() {
        let t = Arc::new(ProgressTracker::new(true));
        let mut rx = t.subscribe();
        t.start();
        t.set_total(2);
        t.record_indexed();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().processed, 1);
        t.stop().await;
        t.stop().await;
    }
}
