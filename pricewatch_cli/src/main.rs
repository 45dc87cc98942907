mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pricewatch_lib::{Config, Db};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "pricewatch")]
#[command(about = "Track product prices through rotating proxies and alert on changes")]
struct Cli {
    /// Output format: table, json, csv or markdown
    #[arg(long, default_value = "table", global = true)]
    output: String,

    /// SQLite database path
    #[arg(long, default_value = "pricewatch.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a product page once and record its snapshot
    Track(commands::track::TrackArgs),
    /// Show recorded snapshots for a product
    History(commands::history::HistoryArgs),
    /// Manage alert rules
    Rules(commands::rules::RulesArgs),
    /// List tracked products
    Products,
    /// Poll every tracked product on an interval
    Poll(commands::poll::PollArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pricewatch=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        "md" | "markdown" => OutputFormat::Markdown,
        _ => OutputFormat::Table,
    };

    let config = Config::from_env()?;
    let db = Arc::new(Db::open(&cli.db)?);
    db.init()?;
    let watch = commands::build_watch(&config, db.clone())?;

    match &cli.command {
        Commands::Track(args) => commands::track::run(args, &watch, &db, &format).await?,
        Commands::History(args) => commands::history::run(args, &watch, &format)?,
        Commands::Rules(args) => commands::rules::run(args, &db, &watch, &format)?,
        Commands::Products => commands::products::run(&db, &format)?,
        Commands::Poll(args) => commands::poll::run(args, Arc::new(watch), &db).await?,
    }

    Ok(())
}
