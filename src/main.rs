mod config;
mod crawler;
mod db;
mod dedup;
mod error;
mod model;
mod parser;
mod renderer;
mod site;

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::config::CrawlConfig;
use crate::crawler::{CrawlOutcome, Crawler, StopReason};
use crate::model::JobRecord;
use crate::renderer::chrome::ChromeLauncher;

#[derive(Parser)]
#[command(name = "job_scraper", about = "Job listing crawler backed by headless Chrome")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl search results and save new listings
    Crawl {
        /// Job position / title to search for
        #[arg(short, long)]
        position: String,
        /// Location to search in
        #[arg(short, long)]
        location: String,
        /// Stop after this many result pages (default: 50)
        #[arg(long, conflicts_with = "unbounded")]
        max_pages: Option<usize>,
        /// Stop fetching new pages after this many seconds
        #[arg(long, conflicts_with = "unbounded")]
        deadline_secs: Option<u64>,
        /// Follow next-page links with no page or time limit
        #[arg(long)]
        unbounded: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored jobs
    Jobs {
        /// Case-insensitive title substring
        #[arg(short, long)]
        position: Option<String>,
        /// Case-insensitive location substring
        #[arg(short, long)]
        location: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl {
            position,
            location,
            max_pages,
            deadline_secs,
            unbounded,
            json,
        } => {
            if position.trim().is_empty() || location.trim().is_empty() {
                bail!("Position and location cannot be empty");
            }
            let mut cfg = CrawlConfig::from_env()?;
            if max_pages.is_some() {
                cfg.max_pages = max_pages;
            }
            if let Some(secs) = deadline_secs {
                cfg.deadline = Some(Duration::from_secs(secs));
            }
            if unbounded {
                cfg.max_pages = None;
                cfg.deadline = None;
            }
            cfg.validate()?;
            run_crawl(position.trim(), location.trim(), cfg, json).await
        }
        Commands::Jobs {
            position,
            location,
            limit,
            json,
        } => {
            let conn = db::connect(&config::db_path())?;
            let filter = db::JobFilter::new(position, location, limit);
            let rows = db::search_jobs(&conn, &filter)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "total_jobs": rows.len(),
                        "filters": filter,
                        "jobs": rows,
                    }))?
                );
                return Ok(());
            }
            if rows.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<32} | {:<20} | {:<22} | {:<18} | {:<10}",
                "Id", "Title", "Company", "Location", "Salary", "Extracted"
            );
            println!("{}", "-".repeat(122));
            for j in &rows {
                let r = &j.record;
                println!(
                    "{:>5} | {:<32} | {:<20} | {:<22} | {:<18} | {:<10}",
                    j.id,
                    truncate(&r.title, 32),
                    truncate(&r.company, 20),
                    truncate(&r.location, 22),
                    truncate(&r.salary, 18),
                    r.extracted_at
                );
            }
            println!("\n{} jobs", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&config::db_path())?;
            let s = db::get_stats(&conn)?;
            println!("Jobs:           {}", s.jobs);
            println!("Companies:      {}", s.companies);
            println!(
                "Last extracted: {}",
                s.latest_extract.as_deref().unwrap_or("-")
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

#[derive(Serialize)]
struct CrawlReport<'a> {
    jobs: &'a [JobRecord],
    total_jobs_scraped: usize,
    new_jobs_saved: usize,
    pages_scraped: usize,
    position_searched: &'a str,
    location_searched: &'a str,
    scraped_at: String,
}

async fn run_crawl(
    position: &str,
    location: &str,
    cfg: CrawlConfig,
    json: bool,
) -> anyhow::Result<()> {
    // Open the store first so a bad path fails before a long crawl.
    let conn = db::connect(&config::db_path())?;
    let crawler = Crawler::new(ChromeLauncher::new(config::chrome_path()), cfg);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Crawling '{}' in '{}'...", position, location));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let outcome = crawler.crawl(position, location).await;
    spinner.finish_and_clear();
    let outcome = outcome.context("Crawl failed")?;

    let novel = match dedup::commit(&conn, &outcome.records) {
        Ok(novel) => novel,
        Err(e) => {
            println!(
                "Scraped {} jobs from {} pages, but saved 0: the batch was rolled back.",
                outcome.records.len(),
                outcome.pages_visited
            );
            return Err(e).context("Failed to save scraped jobs");
        }
    };

    if json {
        let report = CrawlReport {
            jobs: &outcome.records,
            total_jobs_scraped: outcome.records.len(),
            new_jobs_saved: novel.len(),
            pages_scraped: outcome.pages_visited,
            position_searched: position,
            location_searched: location,
            scraped_at: chrono::Local::now().to_rfc3339(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&outcome, novel.len());
    }
    Ok(())
}

fn print_summary(outcome: &CrawlOutcome, saved: usize) {
    println!("Scraped:   {}", outcome.records.len());
    println!("New saved: {}", saved);
    println!("Pages:     {}", outcome.pages_visited);
    println!("Extracted: {}", outcome.extracted_at);
    match outcome.stop {
        StopReason::Exhausted => {}
        StopReason::PageLimit => println!("Stopped at the page limit."),
        StopReason::Deadline => println!("Stopped at the deadline."),
    }

    let failed: Vec<_> = outcome.pages.iter().filter(|p| p.n_failed() > 0).collect();
    if !failed.is_empty() {
        println!("\n--- Skipped cards ---");
        for p in failed {
            println!("  page {} ({}):", p.page, p.url);
            for f in &p.failures {
                println!("    card {}: {}", f.index, f.error);
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
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
