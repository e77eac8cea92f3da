mod catalog;
mod db;
mod decompose;
mod error;
mod ingest;
mod ledger;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use catalog::CatalogClient;
use ingest::{Ingestor, PageRange};
use ledger::PageLedger;
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "food_catalog_ingest",
    about = "Paginated food catalog ingestion into a normalized SQLite store"
)]
struct Cli {
    /// SQLite database file (overrides FOODCAT_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the entity tables and the ledger
    Init,
    /// Crawl the catalog page by page
    Run {
        /// First page to process (default: FOODCAT_START_PAGE or 1)
        #[arg(short, long, conflicts_with = "resume")]
        start_page: Option<u32>,
        /// Last page to process (default: last catalog page)
        #[arg(short, long)]
        end_page: Option<u32>,
        /// Start after the highest page the ledger records as successful
        #[arg(long)]
        resume: bool,
    },
    /// Reprocess pages whose latest ledger entry is a failure
    RetryFailed,
    /// Show ledger and table totals
    Stats,
    /// List the most recent failed page attempts
    Failures {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
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
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }
    info!(database = ?settings.database_path, base_url = %settings.base_url, "Settings loaded");

    // Held for the whole command and dropped on every exit path.
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;

    match cli.command {
        Commands::Init => {
            println!("Schema ready in {:?}", settings.database_path);
        }
        Commands::Run {
            start_page,
            end_page,
            resume,
        } => {
            let start = if resume {
                match ledger::last_completed_page(&conn)? {
                    Some(page) => page + 1,
                    None => {
                        println!("Ledger is empty, starting from page 1.");
                        1
                    }
                }
            } else {
                start_page.unwrap_or(settings.start_page)
            };

            let ingestor = Ingestor::new(
                CatalogClient::new(&settings)?,
                &conn,
                PageLedger::new(&conn, ledger::new_run_id()),
                settings.page_size,
            )
            .progress_every(settings.progress_every)
            .show_progress(true);

            let summary = ingestor
                .run(PageRange {
                    start,
                    end: end_page,
                })
                .await?;
            summary.print();
            if summary.failed > 0 {
                println!("Run 'failures' to inspect, 'retry-failed' to reprocess.");
            }
        }
        Commands::RetryFailed => {
            let pages = ledger::failed_pages(&conn)?;
            if pages.is_empty() {
                println!("No failed pages in the ledger.");
                return Ok(());
            }
            println!("Retrying {} failed pages...", pages.len());

            let ingestor = Ingestor::new(
                CatalogClient::new(&settings)?,
                &conn,
                PageLedger::new(&conn, ledger::new_run_id()),
                settings.page_size,
            )
            .progress_every(settings.progress_every)
            .show_progress(true);

            ingestor.run_pages(&pages).await?.print();
        }
        Commands::Stats => {
            let s = ledger::summary(&conn)?;
            println!("Ledger rows:      {}", s.rows);
            println!("Runs:             {}", s.runs);
            println!("Page successes:   {}", s.succeeded);
            println!("Page failures:    {}", s.failed);
            println!("Still failing:    {}", s.pending_failures);
            match s.last_completed {
                Some(p) => println!("Last completed:   {}", p),
                None => println!("Last completed:   -"),
            }
            println!();
            for (table, n) in db::table_counts(&conn)? {
                println!("{:<20} {:>10}", table, n);
            }
        }
        Commands::Failures { limit } => {
            let rows = ledger::recent_failures(&conn, limit)?;
            if rows.is_empty() {
                println!("No failed pages.");
                return Ok(());
            }
            println!(
                "{:>6} | {:<10} | {:<24} | {:<28} | Error",
                "Page", "Kind", "Run", "Logged at"
            );
            println!("{}", "-".repeat(110));
            for r in &rows {
                println!(
                    "{:>6} | {:<10} | {:<24} | {:<28} | {}",
                    r.page,
                    r.kind.as_deref().unwrap_or("-"),
                    r.run_id,
                    r.logged_at,
                    truncate(r.message.as_deref().unwrap_or(""), 60)
                );
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
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
