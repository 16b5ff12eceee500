//! Liveness probes for the embedder, the vector provider and a document
//! store, aggregated by [`HealthChecker`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use strata_llm::{BoxFuture, Embedder};
use strata_memory::{VectorProvider, VectorStoreError};

use crate::store::DocumentStore;

const PROBE_TEXT: &str = "health check";
const UNHEALTHY_ERROR_RATIO: f64 = 0.5;

/// Ordered from best to worst so the aggregate is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub latency: Duration,
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    fn new(component: &str, status: HealthStatus, message: impl Into<String>, started: Instant) -> Self {
        Self {
            component: component.to_owned(),
            status,
            message: message.into(),
            latency: started.elapsed(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_owned(), value.to_string());
        self
    }
}

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self) -> BoxFuture<'_, HealthReport>;
}

/// Embeds a fixed probe and compares the vector length with the declared
/// dimension.
pub struct EmbedderHealthCheck {
    embedder: Arc<dyn Embedder>,
}

impl EmbedderHealthCheck {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl HealthCheck for EmbedderHealthCheck {
    fn name(&self) -> &str {
        "embedder"
    }

    fn check(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            let started = Instant::now();
            let expected = self.embedder.dimension();
            match self.embedder.embed(PROBE_TEXT).await {
                Ok(vector) if expected == 0 || vector.len() == expected => {
                    HealthReport::new(self.name(), HealthStatus::Healthy, "embedder responding", started)
                        .with_detail("dimension", vector.len())
                }
                Ok(vector) => HealthReport::new(
                    self.name(),
                    HealthStatus::Degraded,
                    format!("dimension mismatch: expected {expected}, got {}", vector.len()),
                    started,
                )
                .with_detail("dimension", vector.len()),
                Err(e) => HealthReport::new(
                    self.name(),
                    HealthStatus::Unhealthy,
                    format!("embedding probe failed: {e}"),
                    started,
                ),
            }
        })
    }
}

/// Runs a one-result search against a collection.
pub struct VectorProviderHealthCheck {
    provider: Arc<dyn VectorProvider>,
    collection: String,
    dimension: usize,
}

impl VectorProviderHealthCheck {
    #[must_use]
    pub fn new(provider: Arc<dyn VectorProvider>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider,
            collection: collection.into(),
            dimension,
        }
    }
}

impl HealthCheck for VectorProviderHealthCheck {
    fn name(&self) -> &str {
        "vector_provider"
    }

    fn check(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            let started = Instant::now();
            let probe = vec![0.0; self.dimension.max(1)];
            match self.provider.search(&self.collection, probe, 1).await {
                Ok(_) => {
                    let points = self.provider.count(&self.collection).await.unwrap_or(0);
                    HealthReport::new(self.name(), HealthStatus::Healthy, "vector provider responding", started)
                        .with_detail("provider", self.provider.name())
                        .with_detail("collection", &self.collection)
                        .with_detail("points", points)
                }
                Err(VectorStoreError::CollectionNotFound(_)) => HealthReport::new(
                    self.name(),
                    HealthStatus::Degraded,
                    format!("collection {} does not exist yet", self.collection),
                    started,
                )
                .with_detail("provider", self.provider.name()),
                Err(e) => HealthReport::new(
                    self.name(),
                    HealthStatus::Unhealthy,
                    format!("search probe failed: {e}"),
                    started,
                )
                .with_detail("provider", self.provider.name()),
            }
        })
    }
}

/// Judges a store by the share of failed documents in its last run.
pub struct StoreHealthCheck {
    store: Arc<DocumentStore>,
}

impl StoreHealthCheck {
    #[must_use]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

fn store_status(errors: u64, attempted: u64) -> HealthStatus {
    if errors == 0 {
        return HealthStatus::Healthy;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = errors as f64 / attempted.max(1) as f64;
    if ratio > UNHEALTHY_ERROR_RATIO {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

impl HealthCheck for StoreHealthCheck {
    fn name(&self) -> &str {
        "document_store"
    }

    fn check(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            let started = Instant::now();
            let stats = self.store.stats();
            let attempted = stats.indexed_docs + stats.error_docs;
            let status = store_status(stats.error_docs, attempted);
            let message = match status {
                HealthStatus::Healthy => "no indexing errors".to_owned(),
                _ => format!("{} of {attempted} documents failed", stats.error_docs),
            };
            HealthReport::new(self.name(), status, message, started)
                .with_detail("store", &stats.name)
                .with_detail("indexed", stats.indexed_docs)
                .with_detail("errors", stats.error_docs)
                .with_detail("watching", stats.watching)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: Vec<HealthReport>,
}

#[derive(Default)]
pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_check(mut self, check: impl HealthCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn register(&mut self, check: Box<dyn HealthCheck>) {
        self.checks.push(check);
    }

    /// Run every check concurrently; the overall status is the worst one.
    pub async fn check_all(&self) -> SystemHealth {
        let components = futures::future::join_all(self.checks.iter().map(|c| c.check())).await;
        let status = components
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        for report in components.iter().filter(|r| r.status != HealthStatus::Healthy) {
            tracing::warn!(
                component = %report.component,
                status = %report.status,
                "health check: {}",
                report.message
            );
        }
        SystemHealth { status, components }
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checks.iter().map(|c| c.name()).collect();
        f.debug_struct("HealthChecker").field("checks", &names).finish()
    }
}
