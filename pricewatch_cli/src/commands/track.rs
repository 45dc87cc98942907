//! The `track` subcommand: run one tracking cycle for a product.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use pricewatch_lib::{Db, PriceWatch};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct TrackArgs {
    /// Product page URL
    pub url: String,

    /// Abandon the cycle after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,
}

pub async fn run(
    args: &TrackArgs,
    watch: &PriceWatch,
    db: &Db,
    format: &OutputFormat,
) -> Result<()> {
    let result = match args.deadline {
        Some(secs) => {
            watch
                .track_with_deadline(&args.url, Duration::from_secs(secs))
                .await
        }
        None => watch.track(&args.url).await,
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            let message = err.user_message();
            return Err(err).context(message);
        }
    };
    let (url, identity) = watch.identify(&args.url)?;
    db.set_product_url(&identity, &identity.canonical_url_with_scheme(url.scheme()))?;

    if *format == OutputFormat::Json {
        return output::print_json(&outcome);
    }

    output::print_snapshots(std::slice::from_ref(&outcome.snapshot), format)?;
    if !outcome.appended {
        eprintln!("Unchanged since the last observation; nothing recorded.");
    }
    if !outcome.alerts.is_empty() {
        output::print_alerts(&outcome.alerts, format)?;
    }
    for diagnostic in &outcome.diagnostics {
        eprintln!(
            "Warning: rule {} skipped: {}",
            diagnostic.rule_id, diagnostic.message
        );
    }
    let via = outcome.proxy.as_deref().unwrap_or("direct connection");
    eprintln!("Fetched via {} in {} attempt(s)", via, outcome.attempts);
    Ok(())
}
