//! The `poll` subcommand: track every known product on an interval.
//!
//! Each round runs one cycle per tracked product using the Semaphore +
//! JoinSet + mpsc pattern, bounded by `--concurrency`. Cycles carry a
//! per-cycle deadline and are cancelled on Ctrl-C; a cancelled cycle
//! records nothing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use pricewatch_lib::{
    validation, Db, PipelineError, PriceWatch, ProductIdentity, Stage, TrackOutcome,
    TrackedProduct,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const CIRCUIT_BREAKER_THRESHOLD: usize = 5;

#[derive(Args)]
pub struct PollArgs {
    /// Seconds between polling rounds
    #[arg(long, default_value = "3600")]
    pub interval: u64,

    /// Run a single round and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds before an individual product cycle is abandoned
    #[arg(long, default_value = "120")]
    pub deadline: u64,

    /// Maximum number of products fetched at the same time
    #[arg(long, default_value = "4")]
    pub concurrency: usize,
}

/// Message sent from cycle tasks to the round collector.
struct CycleResult {
    identity: ProductIdentity,
    result: Result<TrackOutcome, PipelineError>,
}

#[derive(Debug, Default, PartialEq)]
struct RoundSummary {
    recorded: usize,
    unchanged: usize,
    alerts: usize,
    failed: usize,
    cancelled: usize,
    skipped: usize,
}

impl RoundSummary {
    fn record(&mut self, result: &Result<TrackOutcome, PipelineError>) {
        match result {
            Ok(outcome) if outcome.appended => {
                self.recorded += 1;
                self.alerts += outcome.alerts.len();
            }
            Ok(_) => self.unchanged += 1,
            Err(PipelineError::Cancelled { .. }) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }

    fn finish(&mut self, total: usize) {
        let seen = self.recorded + self.unchanged + self.failed + self.cancelled;
        self.skipped = total.saturating_sub(seen);
    }
}

/// Stops a round after repeated fetch failures, typically every proxy
/// session being blocked.
struct CircuitBreaker {
    consecutive_failures: usize,
    threshold: usize,
}

impl CircuitBreaker {
    fn new(threshold: usize) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }
}

pub async fn run(args: &PollArgs, watch: Arc<PriceWatch>, db: &Db) -> Result<()> {
    validation::validate_interval_secs(args.interval)?;
    if args.concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }
    if args.deadline == 0 {
        bail!("--deadline must be at least 1 second");
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Received Ctrl-C, cancelling in-flight cycles");
            signal.cancel();
        }
    });

    let mut round = 0usize;
    loop {
        round += 1;
        let products = db.tracked_products()?;
        if products.is_empty() {
            eprintln!("No products tracked yet. Run `pricewatch track <URL>` first.");
            return Ok(());
        }

        eprintln!("Round {}: polling {} product(s)", round, products.len());
        let summary = poll_round(&watch, &products, args, &shutdown).await;
        db.set_meta("last_poll_at", &Utc::now().to_rfc3339())?;
        eprintln!(
            "Round {} done: {} recorded, {} unchanged, {} alerts, {} failed, {} cancelled, {} skipped",
            round,
            summary.recorded,
            summary.unchanged,
            summary.alerts,
            summary.failed,
            summary.cancelled,
            summary.skipped
        );

        if args.once || shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
        }
    }

    let stats = watch.fetcher().stats().summary();
    eprintln!(
        "Fetch totals: {} attempts, {} successes, {} retries, {} failures, {:.1}s backoff",
        stats.attempts, stats.successes, stats.retries, stats.failures, stats.total_backoff_secs
    );
    Ok(())
}

async fn poll_round(
    watch: &Arc<PriceWatch>,
    products: &[TrackedProduct],
    args: &PollArgs,
    shutdown: &CancellationToken,
) -> RoundSummary {
    let round_token = shutdown.child_token();
    let semaphore = Arc::new(Semaphore::new(args.concurrency));
    let (tx, mut rx) = mpsc::channel::<CycleResult>(args.concurrency * 2);
    let deadline = Duration::from_secs(args.deadline);
    let mut join_set = JoinSet::new();

    for product in products {
        let sem = Arc::clone(&semaphore);
        let sender = tx.clone();
        let watch = Arc::clone(watch);
        let token = round_token.clone();
        let identity = product.identity.clone();
        let url = product.page_url();

        join_set.spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            if token.is_cancelled() {
                return;
            }
            let result =
                match tokio::time::timeout(deadline, watch.track_with_cancel(&url, &token)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Cancelled {
                        identity: identity.clone(),
                    }),
                };
            let _ = sender.send(CycleResult { identity, result }).await;
        });
    }
    drop(tx);

    let mut summary = RoundSummary::default();
    let mut breaker = CircuitBreaker::new(CIRCUIT_BREAKER_THRESHOLD);
    while let Some(cycle) = rx.recv().await {
        summary.record(&cycle.result);
        match &cycle.result {
            Ok(outcome) => {
                breaker.record_success();
                for alert in &outcome.alerts {
                    println!("ALERT {}: {}", cycle.identity, alert.reason);
                }
            }
            Err(PipelineError::Cancelled { .. }) => {}
            Err(err) => {
                eprintln!("  Warning: {}: {}", cycle.identity, err);
                if err.stage() == Stage::Fetch {
                    breaker.record_failure();
                } else {
                    breaker.record_success();
                }
            }
        }

        if breaker.is_tripped() {
            eprintln!(
                "Circuit breaker tripped after {} consecutive fetch failures, stopping round",
                CIRCUIT_BREAKER_THRESHOLD
            );
            round_token.cancel();
            break;
        }
    }
    drop(rx);
    while join_set.join_next().await.is_some() {}

    summary.finish(products.len());
    summary
}
