//! The `rules` subcommand: manage alert rules.

use anyhow::{bail, Result};
use clap::{ArgGroup, Args, Subcommand};
use pricewatch_lib::{currency, validation, AlertKind, Db, PriceWatch};

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Subcommand)]
pub enum RulesCommand {
    /// Add an alert rule for a product
    Add(AddRuleArgs),
    /// List alert rules, optionally for one product
    List {
        /// Product page URL
        url: Option<String>,
    },
    /// Remove an alert rule by id
    Remove {
        /// Rule id as shown by `rules list`
        id: i64,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("condition")
        .required(true)
        .args(["below", "back_in_stock", "drop_percent"]),
))]
pub struct AddRuleArgs {
    /// Product page URL
    pub url: String,

    /// Alert when the price falls to or below this amount (e.g. 24.99)
    #[arg(long)]
    pub below: Option<String>,

    /// Alert when the product becomes available again
    #[arg(long)]
    pub back_in_stock: bool,

    /// Alert when the price drops by at least this percent between observations
    #[arg(long)]
    pub drop_percent: Option<i64>,

    /// Currency of --below; defaults to the marketplace currency
    #[arg(long)]
    pub currency: Option<String>,
}

pub fn run(args: &RulesArgs, db: &Db, watch: &PriceWatch, format: &OutputFormat) -> Result<()> {
    match &args.command {
        RulesCommand::Add(add) => {
            let (url, identity) = watch.identify(&add.url)?;
            let (kind, threshold, code) = if let Some(ref price) = add.below {
                let code = match &add.currency {
                    Some(code) => validation::validate_currency(code)?,
                    None => match currency::for_marketplace(&identity.marketplace) {
                        Some(code) => code.to_string(),
                        None => bail!(
                            "cannot infer the currency of {}; pass --currency",
                            identity.marketplace
                        ),
                    },
                };
                let threshold = validation::validate_price(price, &code)?;
                (AlertKind::PriceBelow, Some(threshold), Some(code))
            } else if let Some(percent) = add.drop_percent {
                (
                    AlertKind::PriceDropPercent,
                    Some(validation::validate_percent(percent)?),
                    None,
                )
            } else {
                (AlertKind::BackInStock, None, None)
            };

            let rule = db.add_rule(&identity, &kind, threshold, code.as_deref())?;
            db.set_product_url(&identity, &identity.canonical_url_with_scheme(url.scheme()))?;
            eprintln!("Added rule {} for {}", rule.id, identity);
            output::print_rules(&[rule], format)
        }
        RulesCommand::List { url } => {
            let identity = match url {
                Some(url) => Some(watch.identify(url)?.1),
                None => None,
            };
            let rules = db.list_rules(identity.as_ref())?;
            if rules.is_empty() {
                eprintln!("No alert rules defined.");
                return Ok(());
            }
            output::print_rules(&rules, format)
        }
        RulesCommand::Remove { id } => {
            if !db.remove_rule(*id)? {
                bail!("no alert rule with id {}", id);
            }
            eprintln!("Removed rule {}", id);
            Ok(())
        }
    }
}
