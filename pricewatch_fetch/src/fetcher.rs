//! HTTP fetcher for retailer product pages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::proxy::{ProxyIdentity, ProxyPool};
use crate::user_agent::get_user_agent;
use crate::FetchError;

/// Markers of the retailer's robot-check interstitial.
const ROBOT_CHECK_MARKERS: &[&str] = &[
    "/errors/validateCaptcha",
    "Enter the characters you see below",
    "api-services-support@amazon.com",
];

/// Timeout and retry policy for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per fetch, including the first.
    pub max_attempts: usize,
    /// Per-attempt timeout covering connect, headers and body.
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
    /// Apply +/-20% jitter to backoff delays.
    pub jitter: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_millis(30000),
            jitter: true,
        }
    }
}

impl FetchConfig {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base_ms = self.backoff_base.as_millis() as f64;
        let max_ms = self.backoff_max.as_millis() as f64;
        let delay_ms = (base_ms * self.backoff_multiplier.max(1.0).powi(exponent)).min(max_ms);
        let jitter = if self.jitter {
            rand::thread_rng().gen_range(0.8..1.2)
        } else {
            1.0
        };
        Duration::from_millis((delay_ms * jitter) as u64)
    }
}

/// Raw response for a product page.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub body: String,
    /// Label of the proxy identity that served the page, `None` when direct.
    pub proxy: Option<String>,
    /// Number of attempts it took, starting at 1.
    pub attempts: usize,
}

/// Atomic counters of fetch outcomes.
#[derive(Debug, Default)]
pub struct FetchStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    backoff_ms: AtomicU64,
}

impl FetchStats {
    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, delay: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.backoff_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counters.
    pub fn summary(&self) -> FetchStatsSummary {
        FetchStatsSummary {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_backoff_secs: self.backoff_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Immutable snapshot of [`FetchStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStatsSummary {
    pub attempts: u64,
    pub successes: u64,
    pub retries: u64,
    pub failures: u64,
    pub total_backoff_secs: f64,
}

/// Fetches product pages through a rotating proxy pool.
///
/// Every attempt uses the next proxy identity and builds a fresh
/// `reqwest::Client` bound to it. Transient failures are retried with
/// exponential backoff until the attempt budget or the pool runs out;
/// permanent failures return immediately.
pub struct Fetcher {
    config: FetchConfig,
    pool: ProxyPool,
    stats: FetchStats,
}

impl Fetcher {
    pub fn new(config: FetchConfig, pool: ProxyPool) -> Self {
        Self {
            config,
            pool,
            stats: FetchStats::default(),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Fetches `url`, retrying transient failures.
    ///
    /// Returns `ProxyExhausted` when the pool holds fewer identities than
    /// `max_attempts` and every one of them failed transiently.
    pub async fn fetch(&self, url: &Url) -> Result<RawPage, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let identities: Vec<Option<&ProxyIdentity>> = if self.pool.is_direct() {
            vec![None; max_attempts]
        } else {
            self.pool
                .checkout(max_attempts.min(self.pool.len()))
                .into_iter()
                .map(Some)
                .collect()
        };
        let budget = identities.len();

        let mut last_err = FetchError::Timeout;
        for (index, identity) in identities.into_iter().enumerate() {
            let attempt = index + 1;
            let label = identity.map(|id| id.label.as_str()).unwrap_or("direct");
            tracing::debug!("GET {} via {} (attempt {}/{})", url, label, attempt, budget);
            self.stats.record_attempt();

            match self.attempt(url, identity).await {
                Ok((final_url, status, body)) => {
                    self.stats.record_success();
                    return Ok(RawPage {
                        url: final_url,
                        status,
                        body,
                        proxy: identity.map(|id| id.label.clone()),
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_transient() => {
                    tracing::error!("Fetch of {} via {} failed permanently: {}", url, label, err);
                    self.stats.record_failure();
                    return Err(err);
                }
                Err(err) => {
                    if attempt < budget {
                        let delay = self.config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Fetch of {} via {} failed (attempt {}/{}): {}, retrying in {:.1}s",
                            url,
                            label,
                            attempt,
                            budget,
                            err,
                            delay.as_secs_f64()
                        );
                        self.stats.record_retry(delay);
                        tokio::time::sleep(delay).await;
                    }
                    last_err = err;
                }
            }
        }

        self.stats.record_failure();
        if budget < max_attempts {
            tracing::error!(
                "Fetch of {} exhausted all {} proxy identities: {}",
                url,
                budget,
                last_err
            );
            return Err(FetchError::ProxyExhausted { attempts: budget });
        }
        tracing::error!("Fetch of {} failed after {} attempts: {}", url, budget, last_err);
        Err(last_err)
    }

    async fn attempt(
        &self,
        url: &Url,
        identity: Option<&ProxyIdentity>,
    ) -> Result<(Url, u16, String), FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(self.config.timeout)
            .gzip(true);
        if let Some(identity) = identity {
            builder = builder.proxy(identity.to_proxy()?);
            if self.pool.accepts_invalid_certs() {
                builder = builder.danger_accept_invalid_certs(true);
            }
        } else {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|e| {
            tracing::error!("Failed to build HTTP client: {}", e);
            FetchError::Client(e.to_string())
        })?;

        let resp = client
            .get(url.clone())
            .header("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("accept-language", "en-US,en;q=0.9")
            .header("upgrade-insecure-requests", "1")
            .header("cache-control", "no-cache")
            .header("pragma", "no-cache")
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = resp.status();
        let final_url = resp.url().clone();
        if !status.is_success() {
            return Err(FetchError::Blocked {
                status: status.as_u16(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;
        if is_robot_check(&body) {
            return Err(FetchError::RobotCheck);
        }
        Ok((final_url, status.as_u16(), body))
    }
}

fn is_robot_check(body: &str) -> bool {
    ROBOT_CHECK_MARKERS.iter().any(|marker| body.contains(marker))
}
