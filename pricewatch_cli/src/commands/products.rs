//! The `products` subcommand: list every tracked product.

use anyhow::Result;
use pricewatch_lib::Db;

use crate::output::{self, OutputFormat};

pub fn run(db: &Db, format: &OutputFormat) -> Result<()> {
    let products = db.tracked_products()?;
    if products.is_empty() {
        eprintln!("No products tracked yet. Run `pricewatch track <URL>` first.");
        return Ok(());
    }
    output::print_products(&products, format)
}
