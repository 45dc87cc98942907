use anyhow::Result;
use pricewatch_lib::currency;
use pricewatch_lib::{AlertEvent, AlertKind, AlertRule, ProductSnapshot, TrackedProduct};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Markdown,
}

#[derive(Tabled, Serialize)]
struct SnapshotRow {
    #[tabled(rename = "Fetched")]
    #[serde(rename = "Fetched")]
    fetched_at: String,
    #[tabled(rename = "Title")]
    #[serde(rename = "Title")]
    title: String,
    #[tabled(rename = "Price")]
    #[serde(rename = "Price")]
    price: String,
    #[tabled(rename = "Rating")]
    #[serde(rename = "Rating")]
    rating: String,
    #[tabled(rename = "Reviews")]
    #[serde(rename = "Reviews")]
    reviews: String,
    #[tabled(rename = "Stock")]
    #[serde(rename = "Stock")]
    stock: String,
}

#[derive(Tabled, Serialize)]
struct ProductRow {
    #[tabled(rename = "Product")]
    #[serde(rename = "Product")]
    product: String,
    #[tabled(rename = "Title")]
    #[serde(rename = "Title")]
    title: String,
    #[tabled(rename = "Price")]
    #[serde(rename = "Price")]
    price: String,
    #[tabled(rename = "Observations")]
    #[serde(rename = "Observations")]
    observations: i64,
    #[tabled(rename = "Last Seen")]
    #[serde(rename = "Last Seen")]
    last_seen: String,
}

#[derive(Tabled, Serialize)]
struct RuleRow {
    #[tabled(rename = "ID")]
    #[serde(rename = "ID")]
    id: i64,
    #[tabled(rename = "Product")]
    #[serde(rename = "Product")]
    product: String,
    #[tabled(rename = "Kind")]
    #[serde(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Threshold")]
    #[serde(rename = "Threshold")]
    threshold: String,
}

#[derive(Tabled, Serialize)]
struct AlertRow {
    #[tabled(rename = "Rule")]
    #[serde(rename = "Rule")]
    rule: i64,
    #[tabled(rename = "Product")]
    #[serde(rename = "Product")]
    product: String,
    #[tabled(rename = "Reason")]
    #[serde(rename = "Reason")]
    reason: String,
}

// -- Row builders --

fn build_snapshot_rows(snapshots: &[ProductSnapshot]) -> Vec<SnapshotRow> {
    snapshots
        .iter()
        .map(|s| SnapshotRow {
            fetched_at: s.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            title: truncate(&s.title, 60),
            price: s.display_price(),
            rating: s.rating.map(|r| format!("{:.1}", r)).unwrap_or_default(),
            reviews: s.review_count.map(|c| c.to_string()).unwrap_or_default(),
            stock: if s.in_stock { "in stock" } else { "out of stock" }.to_string(),
        })
        .collect()
}

fn build_product_rows(products: &[TrackedProduct]) -> Vec<ProductRow> {
    products
        .iter()
        .map(|p| ProductRow {
            product: p.identity.to_string(),
            title: truncate(p.title.as_deref().unwrap_or(""), 50),
            price: match (p.latest_price_minor, p.currency.as_deref()) {
                (Some(price), Some(code)) => currency::format_minor(price, code),
                _ => String::new(),
            },
            observations: p.observations,
            last_seen: p
                .last_seen
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect()
}

fn build_rule_rows(rules: &[AlertRule]) -> Vec<RuleRow> {
    rules
        .iter()
        .map(|r| RuleRow {
            id: r.id,
            product: r.identity.to_string(),
            kind: r.kind.to_string(),
            threshold: describe_threshold(r),
        })
        .collect()
}

fn build_alert_rows(events: &[AlertEvent]) -> Vec<AlertRow> {
    events
        .iter()
        .map(|e| AlertRow {
            rule: e.rule.id,
            product: e.identity.to_string(),
            reason: e.reason.clone(),
        })
        .collect()
}

// -- Printers --

pub fn print_snapshots(snapshots: &[ProductSnapshot], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&snapshots),
        other => print_rows(build_snapshot_rows(snapshots), other),
    }
}

pub fn print_products(products: &[TrackedProduct], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&products),
        other => print_rows(build_product_rows(products), other),
    }
}

pub fn print_rules(rules: &[AlertRule], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&rules),
        other => print_rows(build_rule_rows(rules), other),
    }
}

pub fn print_alerts(events: &[AlertEvent], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&events),
        other => print_rows(build_alert_rows(events), other),
    }
}

fn print_rows<R: Tabled + Serialize>(rows: Vec<R>, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Markdown => {
            let mut table = Table::new(rows);
            table.with(Style::markdown());
            println!("{}", table);
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        }
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(())
}

pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

fn describe_threshold(rule: &AlertRule) -> String {
    match (&rule.kind, rule.threshold) {
        (AlertKind::PriceBelow, Some(t)) => {
            let code = rule
                .currency
                .as_deref()
                .or_else(|| currency::for_marketplace(&rule.identity.marketplace));
            match code {
                Some(code) => format!("<= {}", currency::format_minor(t, code)),
                None => format!("<= {} (minor units)", t),
            }
        }
        (AlertKind::PriceDropPercent, Some(p)) => format!("-{}%", p),
        (_, Some(t)) => t.to_string(),
        (_, None) => "-".to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
