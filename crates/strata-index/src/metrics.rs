//! Counters for indexing runs and query traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default, Clone, Copy)]
struct RunWindow {
    started: Option<(Instant, DateTime<Utc>)>,
    finished: Option<(Instant, DateTime<Utc>)>,
}

/// Per-store indexing and search counters.
#[derive(Debug)]
pub struct IndexMetrics {
    store_name: String,
    total: AtomicU64,
    indexed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    search_count: AtomicU64,
    search_latency_sum: AtomicU64,
    search_latency_max: AtomicU64,
    search_latency_last: AtomicU64,
    window: Mutex<RunWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMetricsSnapshot {
    pub store_name: String,
    pub total_docs: u64,
    pub indexed_docs: u64,
    pub skipped_docs: u64,
    pub error_docs: u64,
    pub docs_per_second: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub search_count: u64,
    pub avg_search_latency: Duration,
    pub max_search_latency: Duration,
    pub last_search_latency: Duration,
}

impl IndexMetrics {
    #[must_use]
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            total: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            search_count: AtomicU64::new(0),
            search_latency_sum: AtomicU64::new(0),
            search_latency_max: AtomicU64::new(0),
            search_latency_last: AtomicU64::new(0),
            window: Mutex::new(RunWindow::default()),
        }
    }

    fn window(&self) -> std::sync::MutexGuard<'_, RunWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.indexed,
            &self.skipped,
            &self.errors,
            &self.search_count,
            &self.search_latency_sum,
            &self.search_latency_max,
            &self.search_latency_last,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.window() = RunWindow::default();
    }

    pub fn mark_started(&self) {
        let mut w = self.window();
        w.started = Some((Instant::now(), Utc::now()));
        w.finished = None;
    }

    pub fn mark_finished(&self) {
        self.window().finished = Some((Instant::now(), Utc::now()));
    }

    pub fn inc_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_indexed(&self) {
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self, latency: Duration) {
        let ns = nanos(latency);
        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.search_latency_sum.fetch_add(ns, Ordering::Relaxed);
        self.search_latency_last.store(ns, Ordering::Relaxed);
        self.search_latency_max.fetch_max(ns, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexMetricsSnapshot {
        let window = *self.window();
        let indexed = self.indexed.load(Ordering::Relaxed);
        let docs_per_second = window.started.map_or(0.0, |(start, _)| {
            let end = window.finished.map_or_else(Instant::now, |(end, _)| end);
            let secs = end.saturating_duration_since(start).as_secs_f64();
            #[allow(clippy::cast_precision_loss)]
            let rate = if secs > 0.0 { indexed as f64 / secs } else { 0.0 };
            rate
        });
        let search_count = self.search_count.load(Ordering::Relaxed);
        let avg = self
            .search_latency_sum
            .load(Ordering::Relaxed)
            .checked_div(search_count)
            .unwrap_or(0);

        IndexMetricsSnapshot {
            store_name: self.store_name.clone(),
            total_docs: self.total.load(Ordering::Relaxed),
            indexed_docs: indexed,
            skipped_docs: self.skipped.load(Ordering::Relaxed),
            error_docs: self.errors.load(Ordering::Relaxed),
            docs_per_second,
            start_time: window.started.map(|(_, t)| t),
            end_time: window.finished.map(|(_, t)| t),
            search_count,
            avg_search_latency: Duration::from_nanos(avg),
            max_search_latency: Duration::from_nanos(self.search_latency_max.load(Ordering::Relaxed)),
            last_search_latency: Duration::from_nanos(self.search_latency_last.load(Ordering::Relaxed)),
        }
    }
}

/// Per-engine query counters.
#[derive(Debug)]
pub struct SearchMetrics {
    total: AtomicU64,
    with_results: AtomicU64,
    empty: AtomicU64,
    latency_sum: AtomicU64,
    latency_min: AtomicU64,
    latency_max: AtomicU64,
    hyde: AtomicU64,
    rerank: AtomicU64,
    multi_query: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMetricsSnapshot {
    pub total_searches: u64,
    pub successful_searches: u64,
    pub empty_results: u64,
    pub avg_latency: Duration,
    /// Zero until the first search is recorded.
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub hyde_usage: u64,
    pub rerank_usage: u64,
    pub multi_query_usage: u64,
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            with_results: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_min: AtomicU64::new(u64::MAX),
            latency_max: AtomicU64::new(0),
            hyde: AtomicU64::new(0),
            rerank: AtomicU64::new(0),
            multi_query: AtomicU64::new(0),
        }
    }
}

/// Pipeline stages that actually ran for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagesUsed {
    pub hyde: bool,
    pub multi_query: bool,
    pub rerank: bool,
}

impl SearchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration, result_count: usize, stages: StagesUsed) {
        let ns = nanos(latency);
        self.total.fetch_add(1, Ordering::Relaxed);
        if result_count > 0 {
            self.with_results.fetch_add(1, Ordering::Relaxed);
        } else {
            self.empty.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum.fetch_add(ns, Ordering::Relaxed);
        self.latency_min.fetch_min(ns, Ordering::Relaxed);
        self.latency_max.fetch_max(ns, Ordering::Relaxed);
        for (used, counter) in [
            (stages.hyde, &self.hyde),
            (stages.multi_query, &self.multi_query),
            (stages.rerank, &self.rerank),
        ] {
            if used {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SearchMetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let min = self.latency_min.load(Ordering::Relaxed);
        SearchMetricsSnapshot {
            total_searches: total,
            successful_searches: self.with_results.load(Ordering::Relaxed),
            empty_results: self.empty.load(Ordering::Relaxed),
            avg_latency: Duration::from_nanos(
                self.latency_sum.load(Ordering::Relaxed).checked_div(total).unwrap_or(0),
            ),
            min_latency: Duration::from_nanos(if min == u64::MAX { 0 } else { min }),
            max_latency: Duration::from_nanos(self.latency_max.load(Ordering::Relaxed)),
            hyde_usage: self.hyde.load(Ordering::Relaxed),
            rerank_usage: self.rerank.load(Ordering::Relaxed),
            multi_query_usage: self.multi_query.load(Ordering::Relaxed),
        }
    }
}
