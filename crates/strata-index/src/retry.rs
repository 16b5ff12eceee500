//! Exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result, RetryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the delay added or subtracted at random, in `0.0..=1.0`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Case-insensitive substrings that mark an error as transient.
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retryable_errors() -> Vec<String> {
    [
        "connection refused",
        "connection reset",
        "timeout",
        "rate limit",
        "429",
        "500",
        "502",
        "503",
        "504",
        "temporarily unavailable",
        "too many requests",
        "ECONNREFUSED",
        "ETIMEDOUT",
        "ECONNRESET",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Retryer {
    config: RetryConfig,
    patterns: Vec<String>,
}

impl Default for Retryer {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Retryer {
    #[must_use]
    pub fn new(mut config: RetryConfig) -> Self {
        if config.base_delay_ms == 0 {
            config.base_delay_ms = default_base_delay_ms();
        }
        if config.max_delay_ms == 0 {
            config.max_delay_ms = default_max_delay_ms();
        }
        config.jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            default_jitter()
        };
        let patterns = config
            .retryable_errors
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        Self { config, patterns }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Cancellation and exhausted retries are final; otherwise the error
    /// message is matched against the configured patterns.
    #[must_use]
    pub fn is_retryable(&self, err: &RagError) -> bool {
        if err.is_cancelled() {
            return false;
        }
        if let RagError::Retry(r) = err
            && r.is_exhausted()
        {
            return false;
        }
        let msg = err.to_string().to_lowercase();
        self.patterns.iter().any(|p| msg.contains(p.as_str()))
    }

    /// `2^attempt * base`, shifted by up to `jitter` of itself either way, and
    /// clamped to the configured maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay().as_secs_f64();
        let mut delay = base * 2f64.powi(i32::try_from(attempt.min(62)).unwrap_or(62));
        let (magnitude, negative) = random_unit();
        let jitter = magnitude * delay * self.config.jitter;
        if negative {
            delay -= jitter;
        } else {
            delay += jitter;
        }
        let max = self.config.max_delay().as_secs_f64();
        Duration::from_secs_f64(delay.clamp(0.0, max))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts `max_retries`.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error when it is not retryable,
    /// [`RetryError::Exhausted`] once attempts run out, and
    /// [`RagError::Cancelled`] if `token` fires first.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.config.max_retries;
        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Err(RagError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.is_retryable(&err) {
                tracing::debug!(operation, attempt = attempt + 1, "non-retryable error: {err}");
                return Err(err);
            }

            if attempt >= max {
                tracing::warn!(operation, attempts = attempt + 1, "max retries exceeded: {err}");
                return Err(RetryError::Exhausted {
                    operation: operation.to_owned(),
                    attempts: attempt + 1,
                    last_error: Box::new(err),
                }
                .into());
            }

            let delay = self.delay_for(attempt);
            tracing::debug!(
                operation,
                attempt = attempt + 1,
                max_attempts = max + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying: {err}"
            );

            tokio::select! {
                () = token.cancelled() => return Err(RagError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Jitter magnitude in `[0, 1)` and its sign.
fn random_unit() -> (f64, bool) {
    (rand::random::<f64>(), rand::random::<bool>())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_retries: u32) -> Retryer {
        Retryer::new(RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn classification() {
        let r = Retryer::default();
        assert!(r.is_retryable(&RagError::Other("Connection Refused by peer".into())));
        assert!(r.is_retryable(&RagError::Other("HTTP 503".into())));
        assert!(r.is_retryable(&RagError::Other("got ETIMEDOUT".into())));
        assert!(!r.is_retryable(&RagError::Other("invalid input".into())));
        assert!(!r.is_retryable(&RagError::Cancelled));
        let exhausted = RagError::Retry(RetryError::Exhausted {
            operation: "op".into(),
            attempts: 4,
            last_error: Box::new(RagError::Other("timeout".into())),
        });
        assert!(!r.is_retryable(&exhausted));
    }

    #[test]
    fn delay_doubles_and_clamps() {
        let r = Retryer::new(RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter: 0.0,
            ..RetryConfig::default()
        });
        assert_eq!(r.delay_for(0), Duration::from_millis(100));
        assert_eq!(r.delay_for(1), Duration::from_millis(200));
        assert_eq!(r.delay_for(2), Duration::from_millis(400));
        assert_eq!(r.delay_for(3), Duration::from_millis(500));
        assert_eq!(r.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_band() {
        let r = Retryer::new(RetryConfig {
            base_delay_ms: 1000,
            jitter: 0.1,
            ..RetryConfig::default()
        });
        for _ in 0..50 {
            let d = r.delay_for(0);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100), "{d:?}");
        }
    }

    #[test]
    fn jitter_varies_in_both_directions() {
        let r = Retryer::new(RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter: 0.5,
            ..RetryConfig::default()
        });
        let base = Duration::from_millis(1000);
        let delays: Vec<_> = (0..200).map(|_| r.delay_for(0)).collect();
        assert!(delays.iter().any(|d| *d < base));
        assert!(delays.iter().any(|d| *d > base));
        let (unit, _) = random_unit();
        assert!((0.0..1.0).contains(&unit));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = fast(3)
            .run(&CancellationToken::new(), "embed", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RagError::Other("connection reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = fast(2)
            .run(&CancellationToken::new(), "upsert", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RagError::Other("timeout".into()))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RagError::Retry(r) => {
                assert!(r.is_exhausted());
                assert_eq!(r.attempts(), 3);
                assert_eq!(r.to_string(), "upsert failed after 3 attempts: timeout");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = fast(5)
            .run(&CancellationToken::new(), "parse", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RagError::Other("malformed".into()))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RagError::Other(_)));
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let err = fast(0)
            .run(&CancellationToken::new(), "op", || async {
                Err::<(), _>(RagError::Other("503".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Retry(ref r) if r.attempts() == 1));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let r = Retryer::new(RetryConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            jitter: 0.0,
            ..RetryConfig::default()
        });
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });
        let err = r
            .run(&token, "op", || async {
                Err::<(), _>(RagError::Other("timeout".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let err = fast(3)
            .run(&token, "op", || async { Ok::<_, RagError>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }
}
