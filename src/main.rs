mod browser;
mod config;
mod db;
mod dedup;
mod extract;
mod lookup;
mod paginate;
mod passes;
mod runner;
mod schedule;
mod seeds;
mod selectors;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use browser::ChromeSession;
use passes::Pipeline;
use schedule::Weekday;

#[derive(Parser)]
#[command(name = "merchant_scraper", about = "Storefront merchant scraper and enricher")]
struct Cli {
    /// Settings file (TOML); missing file means defaults
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or widen the merchants table
    Init,
    /// Scrape every seed listing page and save new merchants
    Listing,
    /// Read CNPJs from merchant pages
    Registry {
        /// Max merchants to visit (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Look up owners for stored CNPJs
    Owners {
        /// Max registry ids to look up
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Read opening hours from merchant pages
    Schedule {
        /// Max merchants to visit
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Listing, registry, owners and schedule in sequence
    Run,
    /// Show enrichment progress
    Stats,
    /// Print one stored merchant
    Show {
        /// Merchant name (case-insensitive)
        name: String,
    },
}

impl Commands {
    fn needs_browser(&self) -> bool {
        matches!(
            self,
            Commands::Listing | Commands::Registry { .. } | Commands::Schedule { .. } | Commands::Run
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = config::load(&cli.config)?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;

    let result = if cli.command.needs_browser() {
        info!(
            "Starting {} at {}",
            command_name(&cli.command),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let mut browser = ChromeSession::launch(&settings.browser).await?;
        let outcome = run_browser_command(&cli.command, &conn, &settings, &mut browser).await;
        // The browser is released on every path, including failed passes.
        browser.close().await;
        outcome
    } else {
        run_store_command(&cli.command, &conn, &settings).await
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_browser_command(
    command: &Commands,
    conn: &rusqlite::Connection,
    settings: &config::Settings,
    browser: &mut ChromeSession,
) -> Result<()> {
    let pipeline = |limit| Pipeline {
        conn,
        settings,
        limit,
    };

    match command {
        Commands::Listing => {
            pipeline(None).listing(browser).await?;
        }
        Commands::Registry { limit } => {
            pipeline(*limit).registry(browser).await?;
        }
        Commands::Schedule { limit } => {
            pipeline(*limit).schedule(browser).await?;
        }
        Commands::Run => {
            let p = pipeline(None);
            p.listing(browser).await?;
            p.registry(browser).await?;
            p.owners().await?;
            p.schedule(browser).await?;
        }
        _ => unreachable!("store-only command routed to the browser"),
    }
    Ok(())
}

async fn run_store_command(
    command: &Commands,
    conn: &rusqlite::Connection,
    settings: &config::Settings,
) -> Result<()> {
    match command {
        Commands::Init => {
            let s = db::get_stats(conn)?;
            println!(
                "Database ready at {:?} ({} merchants, {} owner slots).",
                settings.database_path,
                s.total,
                db::MAX_OWNERS
            );
        }
        Commands::Owners { limit } => {
            let pipeline = Pipeline {
                conn,
                settings,
                limit: *limit,
            };
            pipeline.owners().await?;
        }
        Commands::Stats => {
            let s = db::get_stats(conn)?;
            println!("As of {}", chrono::Local::now().format("%Y-%m-%d %H:%M"));
            println!("Merchants:     {}", s.total);
            println!("With CNPJ:     {}", s.with_registry);
            println!("With owners:   {}", s.with_owners);
            println!("With schedule: {}", s.with_schedule);
        }
        Commands::Show { name } => {
            let key = dedup::normalize_key(name);
            let Some(row) = db::fetch_by_key(conn, &key)? else {
                println!("No merchant named {:?}.", name);
                return Ok(());
            };
            println!("#{} {}", row.id, row.name);
            println!("  url:    {}", row.url.as_deref().unwrap_or("-"));
            println!("  cnpj:   {}", row.registry_id.as_deref().unwrap_or("-"));
            let owners = row.owner_names();
            if owners.is_empty() {
                println!("  owners: -");
            } else {
                println!("  owners: {}", owners.join(", "));
            }
            for day in Weekday::ALL {
                if let Some(hours) = row.schedule.get(day) {
                    println!("  {}:    {}", day.column(), hours);
                }
            }
        }
        _ => unreachable!("browser command routed to the store"),
    }
    Ok(())
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init => "init",
        Commands::Listing => "listing",
        Commands::Registry { .. } => "registry",
        Commands::Owners { .. } => "owners",
        Commands::Schedule { .. } => "schedule",
        Commands::Run => "run",
        Commands::Stats => "stats",
        Commands::Show { .. } => "show",
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
