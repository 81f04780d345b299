mod config;
mod db;
mod error;
mod page;
mod parser;
mod session;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, warn};

use crate::config::Settings;
use crate::db::Store;
use crate::page::{HttpSource, PageSource, SnapshotSource};
use crate::session::{Session, SessionReport};

#[derive(Parser)]
#[command(name = "profile_scraper", about = "Profile experience and skills extractor")]
struct Cli {
    /// SQLite database path (overrides settings)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Register profile URLs from a file (one per line)
    Add { file: PathBuf },
    /// Extract one profile
    Extract {
        url: String,
        /// Replay saved pages from a directory with an index.json manifest
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
    /// Extract every profile that has not been checked yet
    Run {
        /// Max profiles to process (default: all unchecked)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Replay saved pages from a directory with an index.json manifest
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
    /// Show table counts
    Stats,
}

fn main() -> Result<()> {
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
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Init => {
            let store = open_store(&settings)?;
            println!("Schema ready at {}", store.path().display());
            Ok(())
        }
        Commands::Add { file } => {
            let mut store = open_store(&settings)?;
            let urls = read_profile_urls(&file)?;
            let inserted = store.insert_profiles(&urls)?;
            println!("Registered {} new profiles ({} in file)", inserted, urls.len());
            Ok(())
        }
        Commands::Extract { url, snapshots } => {
            let mut store = open_store(&settings)?;
            let mut source = page_source(&settings, snapshots.as_deref())?;
            let user_id = store.ensure_user(&url)?;
            let user = store
                .user(user_id)?
                .with_context(|| format!("User {} vanished", user_id))?;
            let report = new_session(&mut *source, &mut store, &settings).run(&user)?;
            print_report(&report);
            Ok(())
        }
        Commands::Run { limit, snapshots } => {
            let mut store = open_store(&settings)?;
            let users = store.fetch_unchecked(limit)?;
            if users.is_empty() {
                println!("No unchecked profiles. Run 'add' first.");
                return Ok(());
            }
            let mut source = page_source(&settings, snapshots.as_deref())?;
            println!("Extracting {} profiles...", users.len());
            run_profiles(&mut *source, &mut store, &settings, &users)
        }
        Commands::Stats => {
            let mut store = open_store(&settings)?;
            let s = store.stats()?;
            println!("Users:      {}", s.users);
            println!("Checked:    {}", s.checked);
            println!("Unchecked:  {}", s.users.saturating_sub(s.checked));
            println!("Experience: {}", s.experience);
            println!("Skills:     {}", s.skills);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> Result<Store> {
    if let Some(dir) = settings.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let mut store = Store::open(&settings.db_path, settings.retry_policy())?;
    store.init_schema()?;
    Ok(store)
}

fn page_source(settings: &Settings, snapshots: Option<&Path>) -> Result<Box<dyn PageSource>> {
    Ok(match snapshots {
        Some(dir) => Box::new(
            SnapshotSource::from_dir(dir)
                .with_context(|| format!("Failed to load snapshots from {}", dir.display()))?,
        ),
        None => Box::new(HttpSource::new(
            &settings.user_agent,
            settings.request_timeout(),
            settings.session_cookie.as_deref(),
        )?),
    })
}

fn new_session<'a, 's>(
    source: &'a mut (dyn PageSource + 's),
    store: &'a mut Store,
    settings: &Settings,
) -> Session<'a, dyn PageSource + 's> {
    let today = chrono::Local::now().date_naive();
    Session::new(source, store, today)
        .with_waits(settings.waits())
        .with_overflow_depth(settings.overflow_depth)
}

fn read_profile_urls(file: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut urls = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match page::parse_url(line) {
            Ok(_) => urls.push(line.to_string()),
            Err(e) => warn!(line = n + 1, "skipping: {}", e),
        }
    }
    Ok(urls)
}

/// One session per profile. A failed profile is logged and skipped; a
/// persistence failure ends the run.
fn run_profiles(
    source: &mut dyn PageSource,
    store: &mut Store,
    settings: &Settings,
    users: &[db::UserRow],
) -> Result<()> {
    let pb = ProgressBar::new(users.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut totals = RunTotals::default();
    for user in users {
        pb.set_message(user.profile_url.clone());
        match new_session(source, store, settings).run(user) {
            Ok(report) => totals.add(&report),
            Err(e) if e.is_fatal_for_run() => {
                pb.abandon();
                error!(user_id = user.user_id, "stopping run: {}", e);
                totals.print();
                return Err(e.into());
            }
            Err(_) => totals.failed += 1,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    totals.print();
    Ok(())
}

#[derive(Default)]
struct RunTotals {
    profiles: usize,
    failed: usize,
    positions: usize,
    experience_inserted: usize,
    skills_inserted: usize,
}

impl RunTotals {
    fn add(&mut self, report: &SessionReport) {
        self.profiles += 1;
        self.positions += report.positions;
        self.experience_inserted += report.experience_inserted;
        self.skills_inserted += report.skills_inserted;
    }

    fn print(&self) {
        println!(
            "Extracted {} profiles ({} failed): {} positions, {} new experience rows, {} new skill rows.",
            self.profiles, self.failed, self.positions, self.experience_inserted, self.skills_inserted,
        );
    }
}

fn print_report(r: &SessionReport) {
    println!("User {}: {} companies, {} positions", r.user_id, r.companies, r.positions);
    println!(
        "  experience: {} new | skills: {} found, {} new",
        r.experience_inserted, r.skills_found, r.skills_inserted
    );
    if r.overflow_failures > 0 {
        println!("  {} companies kept truncated position lists", r.overflow_failures);
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
