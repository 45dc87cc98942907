//! The `history` subcommand: show recorded snapshots for a product.

use anyhow::{Context, Result};
use clap::Args;
use pricewatch_lib::{currency, PriceWatch};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HistoryArgs {
    /// Product page URL
    pub url: String,

    /// Show only the most recent N snapshots
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn run(args: &HistoryArgs, watch: &PriceWatch, format: &OutputFormat) -> Result<()> {
    let history = watch
        .history(&args.url)
        .with_context(|| format!("failed to load history for {}", args.url))?;

    if history.is_empty() {
        eprintln!("No snapshots recorded for {}", args.url);
        return Ok(());
    }

    let entries = history.entries();
    let shown = match args.limit {
        Some(limit) if limit < entries.len() => &entries[entries.len() - limit..],
        _ => entries,
    };
    output::print_snapshots(shown, format)?;

    if let Some(stats) = history.stats() {
        eprintln!(
            "{} observations: current {}, lowest {}, highest {}, average {}",
            stats.observations,
            currency::format_minor(stats.current, &stats.currency),
            currency::format_minor(stats.lowest, &stats.currency),
            currency::format_minor(stats.highest, &stats.currency),
            currency::format_minor(stats.average, &stats.currency),
        );
    }
    Ok(())
}
