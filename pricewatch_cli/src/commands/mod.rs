//! CLI subcommand implementations.

pub mod history;
pub mod poll;
pub mod products;
pub mod rules;
pub mod track;

use std::sync::Arc;

use anyhow::Result;
use pricewatch_lib::{Config, Db, PriceWatch, TracingNotifier};

/// Builds the tracking pipeline over the command's database.
pub fn build_watch(config: &Config, db: Arc<Db>) -> Result<PriceWatch> {
    Ok(PriceWatch::from_config(
        config,
        db,
        Arc::new(TracingNotifier),
    )?)
}
